//! # Checkpoint Module
//!
//! Crash-safe persistence of search progress.
//!
//! A checkpoint file carries a four-byte magic tag and a format version,
//! followed by one binary [`CheckpointRecord`]: the working tree and model
//! parameters, the append-only result lists, and a coarse stage marker.
//! Every write goes to a temporary file in the same directory, is synced,
//! and is renamed over the previous checkpoint, so readers observe either
//! the old record or the new one in full. In a multi-process grid only the
//! master rank's manager writes; the other ranks hold [mirrors] that apply
//! the same updates in memory without touching the file.
//!
//! On startup a missing file simply starts a fresh run; an unreadable one is
//! a fatal error rather than a silent restart, since quietly discarding days
//! of progress is worse than asking the operator to delete the file.
//!
//! [mirrors]: CheckpointManager::open_mirror

use crate::core::tree::topology::Topology;
use crate::engine::error::EngineError;
use crate::engine::kernel::PartitionModel;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

const CHECKPOINT_MAGIC: [u8; 4] = *b"CLCP";
const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStage {
    Start,
    ParamOptimization,
    TopologySearch { round: u32 },
    Converged,
}

/// Where a tree search stands: the stage reached and the score to beat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressMarker {
    pub stage: SearchStage,
    pub loglh: f64,
}

impl Default for ProgressMarker {
    fn default() -> Self {
        Self {
            stage: SearchStage::Start,
            loglh: f64::NEG_INFINITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTree {
    pub loglh: f64,
    pub topology: Topology,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub taxon_count: usize,
    pub partition_count: usize,
    pub models: Vec<PartitionModel>,
    pub tree: Topology,
    pub ml_results: Vec<ScoredTree>,
    pub bootstrap_results: Vec<ScoredTree>,
    pub marker: ProgressMarker,
    pub elapsed_secs: u64,
}

pub struct CheckpointManager {
    path: PathBuf,
    current: Option<CheckpointRecord>,
    loaded: Option<CheckpointRecord>,
    session_start: Instant,
    elapsed_base: u64,
    persist: bool,
}

impl CheckpointManager {
    /// Binds a manager to `path`, recovering any record stored there when
    /// `resume` is set. A fresh run with `resume` unset leaves existing
    /// files untouched until the first flush overwrites them.
    pub fn open(path: &Path, resume: bool) -> Result<Self, EngineError> {
        let loaded = if resume { read_record(path)? } else { None };
        let elapsed_base = loaded.as_ref().map(|r| r.elapsed_secs).unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            current: None,
            loaded,
            session_start: Instant::now(),
            elapsed_base,
            persist: true,
        })
    }

    /// Like [`open`], but flushes and removals become no-ops: the manager
    /// only tracks the record in memory. Ranks other than the master follow
    /// the shared record this way, so result counts and markers stay
    /// identical across ranks without a second writer on the file.
    ///
    /// [`open`]: CheckpointManager::open
    pub fn open_mirror(path: &Path, resume: bool) -> Result<Self, EngineError> {
        let mut manager = Self::open(path, resume)?;
        manager.persist = false;
        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Installs the starting record: the recovered one when it matches the
    /// data set's shape, the freshly built `fallback` otherwise. A recovered
    /// record with a different shape is an error, not a silent restart.
    pub fn seed(&mut self, fallback: CheckpointRecord) -> Result<(), EngineError> {
        match self.loaded.take() {
            Some(loaded)
                if loaded.taxon_count == fallback.taxon_count
                    && loaded.partition_count == fallback.partition_count =>
            {
                info!(
                    ml_done = loaded.ml_results.len(),
                    bootstrap_done = loaded.bootstrap_results.len(),
                    stage = ?loaded.marker.stage,
                    loglh = loaded.marker.loglh,
                    "Resuming from checkpoint"
                );
                self.current = Some(loaded);
                Ok(())
            }
            Some(loaded) => Err(EngineError::InvalidInput(format!(
                "checkpoint at '{}' describes {} taxa over {} partitions, expected {} over {}",
                self.path.display(),
                loaded.taxon_count,
                loaded.partition_count,
                fallback.taxon_count,
                fallback.partition_count
            ))),
            None => {
                self.current = Some(fallback);
                Ok(())
            }
        }
    }

    pub fn record(&self) -> Result<&CheckpointRecord, EngineError> {
        self.current.as_ref().ok_or_else(|| {
            EngineError::Internal("checkpoint record accessed before seeding".to_string())
        })
    }

    fn current_mut(&mut self) -> Result<&mut CheckpointRecord, EngineError> {
        self.current.as_mut().ok_or_else(|| {
            EngineError::Internal("checkpoint record accessed before seeding".to_string())
        })
    }

    pub fn progress(&self) -> ProgressMarker {
        self.current
            .as_ref()
            .map(|r| r.marker)
            .unwrap_or_default()
    }

    /// Updates the working tree and model parameters in memory only; pair
    /// with [`set_progress`] to persist a consistent stage transition.
    ///
    /// [`set_progress`]: CheckpointManager::set_progress
    pub fn stage_working_state(
        &mut self,
        tree: &Topology,
        models: &[PartitionModel],
    ) -> Result<(), EngineError> {
        let record = self.current_mut()?;
        record.tree = tree.clone();
        record.models = models.to_vec();
        Ok(())
    }

    pub fn set_progress(&mut self, marker: ProgressMarker) -> Result<(), EngineError> {
        self.current_mut()?.marker = marker;
        self.flush()
    }

    /// Appends a finished tree. The marker returns to its default in the
    /// same flush, so a crash between trees can never double-record one.
    pub fn record_ml_result(&mut self, result: ScoredTree) -> Result<(), EngineError> {
        let record = self.current_mut()?;
        record.ml_results.push(result);
        record.marker = ProgressMarker::default();
        self.flush()
    }

    pub fn record_bootstrap_result(&mut self, result: ScoredTree) -> Result<(), EngineError> {
        let record = self.current_mut()?;
        record.bootstrap_results.push(result);
        record.marker = ProgressMarker::default();
        self.flush()
    }

    pub fn flush(&mut self) -> Result<(), EngineError> {
        let elapsed = self.elapsed_secs();
        self.current_mut()?.elapsed_secs = elapsed;
        if !self.persist {
            return Ok(());
        }
        let record = self.record()?;

        let mut payload = Vec::with_capacity(256);
        payload.extend_from_slice(&CHECKPOINT_MAGIC);
        payload.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        bincode::serialize_into(&mut payload, record)
            .map_err(|err| EngineError::Internal(format!("checkpoint encoding failed: {err}")))?;

        atomic_write(&self.path, &payload)?;
        debug!(
            path = %self.path.display(),
            bytes = payload.len(),
            "Checkpoint flushed"
        );
        Ok(())
    }

    pub fn remove(&self) -> Result<(), EngineError> {
        if !self.persist {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EngineError::Io(err)),
        }
    }

    /// Wall-clock seconds spent on this analysis, across resumed sessions.
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_base + self.session_start.elapsed().as_secs()
    }
}

fn read_record(path: &Path) -> Result<Option<CheckpointRecord>, EngineError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(EngineError::Io(err)),
    };
    let corrupt = |reason: String| EngineError::CheckpointCorruption {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.len() < 8 || bytes[..4] != CHECKPOINT_MAGIC {
        return Err(corrupt("missing checkpoint signature".to_string()));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != CHECKPOINT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let record = bincode::deserialize(&bytes[8..]).map_err(|err| corrupt(err.to_string()))?;
    Ok(Some(record))
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("checkpoint");
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let tmp = path.with_file_name(format!(".{name}.tmp.{}.{nanos}", std::process::id()));

    if let Err(err) = write_synced(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(EngineError::Io(err));
    }
    fs::rename(&tmp, path)?;
    // Rename durability needs the directory entry synced as well; treat it
    // as best effort on filesystems that refuse to open directories.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
