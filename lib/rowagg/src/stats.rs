use serde::Serialize;

#[derive(Default, Clone, Debug, Serialize)]
pub struct ReaderStats {
    pub chunks: u64,
    pub bytes: u64,
    pub max_chunk_bytes: u64,
    pub window_expansions: u64,
    /// Set when every worker had exited before the input was exhausted.
    pub stopped_early: bool,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct WorkerStats {
    pub worker: usize,
    pub chunks: u64,
    pub lines: u64,
    pub keys: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct MergeStats {
    pub partials: usize,
    pub keys: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct WorkerStatsAgg {
    pub workers: usize,
    pub total_chunks: u64,
    pub total_lines: u64,
    pub min_worker_ms: u64,
    pub max_worker_ms: u64,
}

/// Metrics of one successful run.
#[derive(Default, Clone, Debug, Serialize)]
pub struct RunReport {
    pub reader: ReaderStats,
    pub workers: Vec<WorkerStats>,
    pub merge: MergeStats,
    pub wall_ms: u64,
}

impl RunReport {
    pub fn worker_summary(&self) -> WorkerStatsAgg {
        let w = &self.workers;
        WorkerStatsAgg {
            workers: w.len(),
            total_chunks: w.iter().map(|s| s.chunks).sum(),
            total_lines: w.iter().map(|s| s.lines).sum(),
            min_worker_ms: w.iter().map(|s| s.wall_ms).min().unwrap_or(0),
            max_worker_ms: w.iter().map(|s| s.wall_ms).max().unwrap_or(0),
        }
    }
}
