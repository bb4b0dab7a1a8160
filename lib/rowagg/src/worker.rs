use crate::aggregate::{Aggregate, PartialAggregate};
use crate::error::{Participant, StageError};
use crate::parse::parse_line;
use crate::reader::Chunk;
use crate::stats::WorkerStats;
use crate::utils::elapsed_ms;
use crossbeam_channel::{Receiver, Sender};
use std::thread;
use std::time::Instant;
use tracing::{debug, error};

/// Worker stage body: drains `chunks` until the channel closes, then
/// publishes its aggregate once on `partials`.
///
/// On the first malformed line the worker stops receiving and returns the
/// parse error without publishing.
pub fn run_worker(
    worker: usize,
    chunks: Receiver<Chunk>,
    partials: Sender<PartialAggregate>,
) -> Result<WorkerStats, StageError> {
    let start = Instant::now();
    let mut aggregate = Aggregate::new();
    let mut stats = WorkerStats { worker, ..Default::default() };
    debug!(worker, "worker starting");

    for chunk in chunks.iter() {
        stats.chunks += 1;
        for line in chunk.lines() {
            let record = parse_line(line).map_err(|source| {
                error!(worker, chunk = chunk.seq(), line = %source.line, kind = %source.kind, "parse failed");
                StageError::Worker { worker, source }
            })?;
            aggregate.add(record.key, record.value);
            stats.lines += 1;
        }
    }

    stats.keys = aggregate.len() as u64;
    stats.wall_ms = elapsed_ms(start);
    debug!(worker, chunks = stats.chunks, lines = stats.lines, keys = stats.keys, "worker publishing");
    partials
        .send(PartialAggregate { worker, aggregate })
        .map_err(|_| StageError::Publish { worker })?;
    Ok(stats)
}

enum Slot {
    Running(thread::JoinHandle<Result<WorkerStats, StageError>>),
    Failed(StageError),
}

/// A fixed set of worker threads competing for chunks on one channel.
pub struct WorkerPool;

/// Join side of a [`WorkerPool`]; one slot per worker, indexed by id.
pub struct WorkerJoiner {
    slots: Vec<Slot>,
}

impl WorkerPool {
    /// Starts `workers` threads. A thread the OS refuses to start fills its
    /// slot with a spawn error; the remaining workers still run.
    pub fn spawn(workers: usize, chunks: &Receiver<Chunk>, partials: &Sender<PartialAggregate>) -> WorkerJoiner {
        let slots = (0..workers)
            .map(|id| {
                let chunks = chunks.clone();
                let partials = partials.clone();
                let spawned = thread::Builder::new()
                    .name(format!("rowagg-worker-{}", id))
                    .spawn(move || run_worker(id, chunks, partials));
                match spawned {
                    Ok(handle) => Slot::Running(handle),
                    Err(source) => {
                        error!(worker = id, error = %source, "failed to spawn worker");
                        Slot::Failed(StageError::Spawn { participant: Participant::Worker(id), source })
                    }
                }
            })
            .collect();
        WorkerJoiner { slots }
    }
}

impl WorkerJoiner {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Waits for every worker. Element `i` is worker `i`'s outcome.
    pub fn join_all(self) -> Vec<Result<WorkerStats, StageError>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(id, slot)| match slot {
                Slot::Running(handle) => handle.join().unwrap_or_else(|_| {
                    error!(worker = id, "worker thread panicked");
                    Err(StageError::Panicked { participant: Participant::Worker(id) })
                }),
                Slot::Failed(e) => Err(e),
            })
            .collect()
    }
}
