//! # Parallel Module
//!
//! The lockstep execution grid: a fixed pool of worker threads per rank,
//! optionally bridged across ranks by a [`transport::RankTransport`].
//!
//! ## Overview
//!
//! [`ParallelContext::spawn`] runs one entry function on every local thread;
//! together with the threads of the other ranks these form a flat pool of
//! execution units, numbered `rank * threads_per_rank + thread_id`. Units
//! coordinate exclusively through [`UnitContext::barrier`] and
//! [`UnitContext::reduce`], and every unit observes bit-identical reduction
//! results: local slots are combined in unit order on one thread before the
//! cross-rank exchange, so thread scheduling never reorders floating-point
//! sums.
//!
//! ## Failure Discipline
//!
//! Entry functions must reach every collective call in the same order on
//! every unit; a unit that skips a collective its peers enter would block the
//! grid forever, and no runtime detection is attempted. What the grid does
//! guarantee is that a unit which *fails* - returns an error or unwinds -
//! poisons the synchronization gate, waking all blocked peers with
//! [`EngineError::Poisoned`] so the grid unwinds instead of deadlocking.
//! [`ParallelContext::spawn`] then reports the root-cause error in preference
//! to the poison fallout.

pub mod transport;

use crate::engine::error::EngineError;
use std::sync::{Condvar, Mutex, MutexGuard};
use transport::RankTransport;

use self::transport::SoloTransport;

struct SyncState {
    arrived: usize,
    generation: u64,
    poisoned: bool,
}

// A reusable barrier that can be poisoned: failed units flip the flag and
// wake everyone, so peers blocked here error out instead of waiting forever.
struct SyncPoint {
    state: Mutex<SyncState>,
    signal: Condvar,
}

impl SyncPoint {
    fn new() -> Self {
        Self {
            state: Mutex::new(SyncState {
                arrived: 0,
                generation: 0,
                poisoned: false,
            }),
            signal: Condvar::new(),
        }
    }

    fn wait(&self, expected: usize) -> Result<(), EngineError> {
        let mut state = self.state.lock().map_err(|_| EngineError::Poisoned)?;
        if state.poisoned {
            return Err(EngineError::Poisoned);
        }
        state.arrived += 1;
        if state.arrived == expected {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.signal.notify_all();
            return Ok(());
        }
        let generation = state.generation;
        while state.generation == generation && !state.poisoned {
            state = self
                .signal
                .wait(state)
                .map_err(|_| EngineError::Poisoned)?;
        }
        if state.poisoned {
            Err(EngineError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn poison(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.poisoned = true;
        }
        self.signal.notify_all();
    }
}

fn lock<'m, T>(mutex: &'m Mutex<T>) -> Result<MutexGuard<'m, T>, EngineError> {
    mutex.lock().map_err(|_| EngineError::Poisoned)
}

pub struct ParallelContext {
    threads: usize,
    transport: Box<dyn RankTransport>,
    gate: SyncPoint,
    slots: Vec<Mutex<Vec<f64>>>,
    combined: Mutex<Vec<f64>>,
    capacity: usize,
}

impl ParallelContext {
    pub fn new(threads: usize, transport: Box<dyn RankTransport>) -> Result<Self, EngineError> {
        if threads == 0 {
            return Err(EngineError::InvalidInput(
                "execution grids require at least one thread per rank".to_string(),
            ));
        }
        Ok(Self {
            threads,
            transport,
            gate: SyncPoint::new(),
            slots: Vec::new(),
            combined: Mutex::new(Vec::new()),
            capacity: 0,
        })
    }

    pub fn solo(threads: usize) -> Result<Self, EngineError> {
        Self::new(threads, Box::new(SoloTransport))
    }

    /// Sizes the reduction scratch space. Must happen before [`spawn`]; the
    /// exclusive borrow guarantees no unit is running.
    ///
    /// [`spawn`]: ParallelContext::spawn
    pub fn reserve_reduce_buffer(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.slots = (0..self.threads)
            .map(|_| Mutex::new(vec![0.0; capacity]))
            .collect();
        self.combined = Mutex::new(vec![0.0; capacity]);
    }

    pub fn threads_per_rank(&self) -> usize {
        self.threads
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn rank_count(&self) -> usize {
        self.transport.rank_count()
    }

    pub fn unit_count(&self) -> usize {
        self.transport.rank_count() * self.threads
    }

    pub fn reduce_capacity(&self) -> usize {
        self.capacity
    }

    /// Runs `entry` on every local execution unit and joins them all.
    ///
    /// The calling thread doubles as unit 0 of this rank. When several units
    /// fail, the error reported is the first non-poison failure in unit
    /// order; pure poison fallout is reported only when no root cause exists.
    pub fn spawn<F>(&self, entry: F) -> Result<(), EngineError>
    where
        F: Fn(&UnitContext<'_>) -> Result<(), EngineError> + Sync,
    {
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.threads - 1);
            for thread_id in 1..self.threads {
                let entry = &entry;
                let spawned = std::thread::Builder::new()
                    .name(format!("clade-unit-{thread_id}"))
                    .spawn_scoped(scope, move || self.run_unit(thread_id, entry));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        // Workers already running will block on the first
                        // collective; release them before bailing out.
                        self.gate.poison();
                        for handle in handles {
                            let _ = handle.join();
                        }
                        return Err(EngineError::Io(err));
                    }
                }
            }

            let mut first = absorb(None, self.run_unit(0, &entry));
            for handle in handles {
                first = match handle.join() {
                    Ok(result) => absorb(first, result),
                    Err(_) => Some(first.unwrap_or_else(|| {
                        EngineError::Internal("execution unit panicked".to_string())
                    })),
                };
            }
            match first {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn run_unit<F>(&self, thread_id: usize, entry: &F) -> Result<(), EngineError>
    where
        F: Fn(&UnitContext<'_>) -> Result<(), EngineError> + Sync,
    {
        let mut guard = PoisonGuard {
            gate: &self.gate,
            armed: true,
        };
        let unit = UnitContext {
            grid: self,
            thread_id,
        };
        let result = entry(&unit);
        guard.armed = result.is_err();
        result
    }
}

// Poisons the gate when a unit unwinds or fails, waking blocked peers.
struct PoisonGuard<'a> {
    gate: &'a SyncPoint,
    armed: bool,
}

impl Drop for PoisonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.gate.poison();
        }
    }
}

fn absorb(current: Option<EngineError>, result: Result<(), EngineError>) -> Option<EngineError> {
    match (current, result) {
        (None, Err(err)) => Some(err),
        (Some(EngineError::Poisoned), Err(err)) if !matches!(err, EngineError::Poisoned) => {
            Some(err)
        }
        (current, _) => current,
    }
}

pub struct UnitContext<'a> {
    grid: &'a ParallelContext,
    thread_id: usize,
}

impl UnitContext<'_> {
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    pub fn rank(&self) -> usize {
        self.grid.rank()
    }

    pub fn unit_id(&self) -> usize {
        self.grid.rank() * self.grid.threads + self.thread_id
    }

    pub fn unit_count(&self) -> usize {
        self.grid.unit_count()
    }

    pub fn reduce_capacity(&self) -> usize {
        self.grid.capacity
    }

    pub fn is_master_thread(&self) -> bool {
        self.thread_id == 0
    }

    pub fn is_master_rank(&self) -> bool {
        self.grid.rank() == 0
    }

    /// True on exactly one unit of the whole grid.
    pub fn is_master(&self) -> bool {
        self.is_master_thread() && self.is_master_rank()
    }

    pub fn barrier(&self) -> Result<(), EngineError> {
        self.grid.gate.wait(self.grid.threads)?;
        if self.grid.rank_count() > 1 {
            if self.is_master_thread() {
                if let Err(err) = self.grid.transport.barrier() {
                    self.grid.gate.poison();
                    return Err(err);
                }
            }
            self.grid.gate.wait(self.grid.threads)?;
        }
        Ok(())
    }

    /// Element-wise sum of `data` across every unit of the grid.
    ///
    /// On return, every unit holds the identical combined vector: local slots
    /// are summed in thread order on the master thread, then exchanged across
    /// ranks, so the result does not depend on scheduling. All units must call
    /// with the same length, which may not exceed the reserved capacity.
    pub fn reduce(&self, data: &mut [f64]) -> Result<(), EngineError> {
        if data.len() > self.grid.capacity {
            return Err(EngineError::ResourceExhaustion {
                needed: data.len(),
                reserved: self.grid.capacity,
            });
        }

        {
            let mut slot = lock(&self.grid.slots[self.thread_id])?;
            slot[..data.len()].copy_from_slice(data);
        }
        self.grid.gate.wait(self.grid.threads)?;

        if self.is_master_thread() {
            let combine = || -> Result<(), EngineError> {
                let mut sum = vec![0.0; data.len()];
                for slot in &self.grid.slots {
                    let slot = lock(slot)?;
                    for (acc, value) in sum.iter_mut().zip(&slot[..data.len()]) {
                        *acc += value;
                    }
                }
                if self.grid.rank_count() > 1 {
                    self.grid.transport.allreduce_sum(&mut sum)?;
                }
                let mut combined = lock(&self.grid.combined)?;
                combined[..data.len()].copy_from_slice(&sum);
                Ok(())
            };
            if let Err(err) = combine() {
                self.grid.gate.poison();
                return Err(err);
            }
        }
        self.grid.gate.wait(self.grid.threads)?;

        let combined = lock(&self.grid.combined)?;
        data.copy_from_slice(&combined[..data.len()]);
        Ok(())
    }
}
