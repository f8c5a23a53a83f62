use crate::engine::error::EngineError;

/// Cross-rank collective operations.
///
/// A rank is one process-level participant in the execution grid; threads
/// within a rank never cross this seam. Implementations must return
/// bit-identical reduction results on every rank, and only one thread per
/// rank (the rank's master thread) ever calls these methods.
pub trait RankTransport: Send + Sync {
    fn rank(&self) -> usize;
    fn rank_count(&self) -> usize;
    fn allreduce_sum(&self, buffer: &mut [f64]) -> Result<(), EngineError>;
    fn barrier(&self) -> Result<(), EngineError>;
}

/// The single-process transport: every collective is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloTransport;

impl RankTransport for SoloTransport {
    fn rank(&self) -> usize {
        0
    }

    fn rank_count(&self) -> usize {
        1
    }

    fn allreduce_sum(&self, _buffer: &mut [f64]) -> Result<(), EngineError> {
        Ok(())
    }

    fn barrier(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

// In-process stand-in for a multi-rank deployment: rank 0 gathers, sums in
// rank order, and broadcasts, so all ranks observe identical bytes.
#[cfg(test)]
pub(crate) struct LoopbackTransport {
    rank: usize,
    rank_count: usize,
    role: Role,
}

#[cfg(test)]
enum Role {
    Hub {
        gather: crossbeam_channel::Receiver<(usize, Vec<f64>)>,
        scatter: Vec<crossbeam_channel::Sender<Vec<f64>>>,
    },
    Leaf {
        gather: crossbeam_channel::Sender<(usize, Vec<f64>)>,
        scatter: crossbeam_channel::Receiver<Vec<f64>>,
    },
}

#[cfg(test)]
impl LoopbackTransport {
    pub(crate) fn create(rank_count: usize) -> Vec<Self> {
        let (gather_tx, gather_rx) = crossbeam_channel::unbounded();
        let mut scatter_txs = Vec::with_capacity(rank_count - 1);
        let mut leaves = Vec::with_capacity(rank_count - 1);
        for rank in 1..rank_count {
            let (tx, rx) = crossbeam_channel::unbounded();
            scatter_txs.push(tx);
            leaves.push(LoopbackTransport {
                rank,
                rank_count,
                role: Role::Leaf {
                    gather: gather_tx.clone(),
                    scatter: rx,
                },
            });
        }
        let mut transports = vec![LoopbackTransport {
            rank: 0,
            rank_count,
            role: Role::Hub {
                gather: gather_rx,
                scatter: scatter_txs,
            },
        }];
        transports.extend(leaves);
        transports
    }

    fn exchange(&self, buffer: &mut [f64]) -> Result<(), EngineError> {
        match &self.role {
            Role::Hub { gather, scatter } => {
                let mut parts: Vec<Option<Vec<f64>>> = vec![None; self.rank_count - 1];
                for _ in 1..self.rank_count {
                    let (rank, data) = gather.recv().map_err(disconnected)?;
                    parts[rank - 1] = Some(data);
                }
                for part in parts.into_iter().flatten() {
                    for (acc, value) in buffer.iter_mut().zip(&part) {
                        *acc += value;
                    }
                }
                for tx in scatter {
                    tx.send(buffer.to_vec()).map_err(|_| disconnected_send())?;
                }
                Ok(())
            }
            Role::Leaf { gather, scatter } => {
                gather
                    .send((self.rank, buffer.to_vec()))
                    .map_err(|_| disconnected_send())?;
                let sum = scatter.recv().map_err(disconnected)?;
                buffer.copy_from_slice(&sum);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
impl RankTransport for LoopbackTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn rank_count(&self) -> usize {
        self.rank_count
    }

    fn allreduce_sum(&self, buffer: &mut [f64]) -> Result<(), EngineError> {
        self.exchange(buffer)
    }

    fn barrier(&self) -> Result<(), EngineError> {
        self.exchange(&mut [])
    }
}

#[cfg(test)]
fn disconnected(_: crossbeam_channel::RecvError) -> EngineError {
    EngineError::Internal("rank transport disconnected".to_string())
}

#[cfg(test)]
fn disconnected_send() -> EngineError {
    EngineError::Internal("rank transport disconnected".to_string())
}
