use crate::aggregate::{FinalAggregate, MergeReducer, PartialAggregate};
use crate::constants::{
    DEFAULT_CHUNK_BYTES, DEFAULT_CHUNK_QUEUE_CAP, DEFAULT_WORKERS, ENV_CHUNK_BYTES, ENV_CHUNK_QUEUE_CAP, ENV_WORKERS,
    WORKERS_AUTO,
};
use crate::error::{CombinedError, Participant, StageError};
use crate::reader::{run_reader, CancelToken, Chunk, ChunkReader};
use crate::stats::{MergeStats, ReaderStats, RunReport};
use crate::utils::{elapsed_ms, process_env, var_is, var_usize};
use crate::worker::WorkerPool;
use crossbeam_channel as channel;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info};

/// Pool and queue sizing. Every value is at least 1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    pub workers: usize,
    pub chunk_bytes: usize,
    pub chunk_queue_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { workers: DEFAULT_WORKERS, chunk_bytes: DEFAULT_CHUNK_BYTES, chunk_queue_cap: DEFAULT_CHUNK_QUEUE_CAP }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `ROWAGG_*` environment overrides.
    pub fn from_env() -> Self {
        Self::from_vars(process_env)
    }

    /// Like [`PipelineConfig::from_env`], but reads overrides through `lookup`.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if var_is(&lookup, ENV_WORKERS, WORKERS_AUTO) {
            cfg.workers = num_cpus::get();
        } else if let Some(n) = var_usize(&lookup, ENV_WORKERS) {
            cfg.workers = n;
        }
        if let Some(n) = var_usize(&lookup, ENV_CHUNK_BYTES) {
            cfg.chunk_bytes = n;
        }
        if let Some(n) = var_usize(&lookup, ENV_CHUNK_QUEUE_CAP) {
            cfg.chunk_queue_cap = n;
        }
        cfg.clamped()
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }

    pub fn chunk_bytes(mut self, n: usize) -> Self {
        self.chunk_bytes = n.max(1);
        self
    }

    pub fn chunk_queue_cap(mut self, n: usize) -> Self {
        self.chunk_queue_cap = n.max(1);
        self
    }

    fn clamped(self) -> Self {
        Self { workers: self.workers.max(1), chunk_bytes: self.chunk_bytes.max(1), chunk_queue_cap: self.chunk_queue_cap.max(1) }
    }
}

/// Result of a successful run together with its metrics.
#[derive(Debug)]
pub struct RunOutcome {
    pub aggregate: FinalAggregate,
    pub report: RunReport,
}

/// Reader -> workers -> reducer, wired through bounded channels.
///
/// The reader owns the input, each worker owns its aggregate until it
/// publishes it, and the reducer owns the result; every hand-off is a move
/// through a channel, so no locks are taken.
pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancelToken,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config: config.clamped(), cancel: CancelToken::new() }
    }

    /// Shares `cancel` with the reader of every later run.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn run(&self, path: impl AsRef<Path>) -> Result<FinalAggregate, CombinedError> {
        self.run_detailed(path).map(|o| o.aggregate)
    }

    pub fn run_detailed(&self, path: impl AsRef<Path>) -> Result<RunOutcome, CombinedError> {
        let path = path.as_ref();
        let reader = ChunkReader::open(path, self.config.chunk_bytes).map_err(|e| {
            error!(path = %path.display(), error = %e, "cannot open input");
            CombinedError::single(e)
        })?;
        self.execute(reader)
    }

    /// Runs over an arbitrary byte source; `origin` names it in errors.
    pub fn run_stream<R>(&self, origin: impl Into<PathBuf>, source: R) -> Result<FinalAggregate, CombinedError>
    where
        R: Read + Send + 'static,
    {
        self.run_stream_detailed(origin, source).map(|o| o.aggregate)
    }

    pub fn run_stream_detailed<R>(&self, origin: impl Into<PathBuf>, source: R) -> Result<RunOutcome, CombinedError>
    where
        R: Read + Send + 'static,
    {
        self.execute(ChunkReader::new(source, self.config.chunk_bytes).with_origin(origin))
    }

    fn execute<R>(&self, reader: ChunkReader<R>) -> Result<RunOutcome, CombinedError>
    where
        R: Read + Send + 'static,
    {
        let run_start = Instant::now();
        let workers = self.config.workers;
        info!(
            origin = %reader.origin().display(), workers, chunk_bytes = self.config.chunk_bytes,
            chunk_queue_cap = self.config.chunk_queue_cap,
            "pipeline starting"
        );

        let (chunk_tx, chunk_rx) = channel::bounded::<Chunk>(self.config.chunk_queue_cap);
        let (partial_tx, partial_rx) = channel::bounded::<PartialAggregate>(workers);

        let cancel = self.cancel.clone();
        let reader_handle = thread::Builder::new()
            .name("rowagg-reader".into())
            .spawn(move || run_reader(reader, chunk_tx, cancel));
        let pool = WorkerPool::spawn(workers, &chunk_rx, &partial_tx);
        // Only the stages hold channel ends from here on, so closing follows
        // their exits.
        drop(chunk_rx);
        drop(partial_tx);

        let reader_result: Result<ReaderStats, StageError> = match reader_handle {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                error!("reader thread panicked");
                Err(StageError::Panicked { participant: Participant::Reader })
            }),
            Err(source) => {
                error!(error = %source, "failed to spawn reader");
                Err(StageError::Spawn { participant: Participant::Reader, source })
            }
        };
        let worker_results = pool.join_all();

        // One write-once slot per participant: reader first, then workers.
        let mut slots: Vec<Option<StageError>> = Vec::with_capacity(workers + 1);
        let mut reader_stats = ReaderStats::default();
        match reader_result {
            Ok(s) => {
                reader_stats = s;
                slots.push(None);
            }
            Err(e) => slots.push(Some(e)),
        }
        let mut worker_stats = Vec::with_capacity(workers);
        for r in worker_results {
            match r {
                Ok(s) => {
                    worker_stats.push(s);
                    slots.push(None);
                }
                Err(e) => slots.push(Some(e)),
            }
        }

        if let Some(err) = CombinedError::join(slots) {
            error!(failures = err.errors().len(), wall_ms = elapsed_ms(run_start), "pipeline failed");
            return Err(err);
        }

        info!(phase = "read",
              chunks = reader_stats.chunks, bytes = reader_stats.bytes,
              max_chunk_bytes = reader_stats.max_chunk_bytes, window_expansions = reader_stats.window_expansions,
              wall_ms = reader_stats.wall_ms,
              "Read phase complete");
        let report_workers = RunReport { workers: worker_stats, ..Default::default() };
        let summary = report_workers.worker_summary();
        info!(phase = "work",
              workers = summary.workers, total_chunks = summary.total_chunks, total_lines = summary.total_lines,
              min_worker_ms = summary.min_worker_ms, max_worker_ms = summary.max_worker_ms,
              "Worker phase complete");

        // Every worker has exited and the last sender is gone, so this drains
        // exactly the published partials and stops.
        let merge_start = Instant::now();
        let mut reducer = MergeReducer::new();
        for partial in partial_rx.iter() {
            reducer.absorb(partial);
        }
        let partials = reducer.received();
        debug_assert_eq!(partials, workers);
        let aggregate = reducer.finish();
        let merge = MergeStats { partials, keys: aggregate.len() as u64, wall_ms: elapsed_ms(merge_start) };
        info!(phase = "merge", partials = merge.partials, keys = merge.keys, wall_ms = merge.wall_ms, "Merge phase complete");

        let report = RunReport { reader: reader_stats, merge, wall_ms: elapsed_ms(run_start), ..report_workers };
        debug!(wall_ms = report.wall_ms, "pipeline finished");
        Ok(RunOutcome { aggregate, report })
    }
}

/// Aggregates `path` with [`PipelineConfig::default`].
pub fn aggregate_file(path: impl AsRef<Path>) -> Result<FinalAggregate, CombinedError> {
    Pipeline::default().run(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Stats;
    use std::io::{self, Cursor};

    /// Serves `data` for `ok_reads` calls, then fails every read.
    struct FailingSource {
        data: Cursor<Vec<u8>>,
        ok_reads: usize,
    }

    impl Read for FailingSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.ok_reads == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "device gone"));
            }
            self.ok_reads -= 1;
            self.data.read(buf)
        }
    }

    fn run(input: &str, config: PipelineConfig) -> Result<FinalAggregate, CombinedError> {
        Pipeline::new(config).run_stream("mem", Cursor::new(input.as_bytes().to_vec()))
    }

    #[test]
    fn config_defaults_and_clamping() {
        let cfg = PipelineConfig::default();
        assert_eq!((cfg.workers, cfg.chunk_bytes, cfg.chunk_queue_cap), (3, 4096, 32));
        let cfg = PipelineConfig::new().workers(0).chunk_bytes(0).chunk_queue_cap(0);
        assert_eq!((cfg.workers, cfg.chunk_bytes, cfg.chunk_queue_cap), (1, 1, 1));
        let p = Pipeline::new(PipelineConfig { workers: 0, chunk_bytes: 0, chunk_queue_cap: 0 });
        assert_eq!(p.config().workers, 1);
    }

    #[test]
    fn scenario_merges_across_workers() {
        let agg = run("Berlin:23.4\nHamburg:10.0\nBerlin:25.0\n", PipelineConfig::new().chunk_bytes(12)).unwrap();
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.get("Berlin"), Some(&Stats { sum: 484, count: 2, min: 234, max: 250 }));
        assert_eq!(agg.get("Hamburg"), Some(&Stats { sum: 100, count: 1, min: 100, max: 100 }));
    }

    #[test]
    fn detailed_run_reports_every_worker() {
        let input: String = (0..200).map(|i| format!("c{}:{}.5\n", i % 5, i)).collect();
        let outcome = Pipeline::new(PipelineConfig::new().workers(4).chunk_bytes(32))
            .run_stream_detailed("mem", Cursor::new(input.clone().into_bytes()))
            .unwrap();
        assert_eq!(outcome.report.workers.len(), 4);
        assert_eq!(outcome.report.merge.partials, 4);
        assert_eq!(outcome.report.merge.keys, 5);
        assert_eq!(outcome.report.reader.bytes, input.len() as u64);
        assert_eq!(outcome.report.worker_summary().total_lines, 200);
    }

    #[test]
    fn parse_failure_fails_whole_run() {
        let err = run("Berlin:23.4\nBerlinOnly\n", PipelineConfig::new()).unwrap_err();
        let lines: Vec<&str> = err.parse_errors().map(|p| p.line.as_str()).collect();
        assert_eq!(lines, vec!["BerlinOnly"]);
    }

    #[test]
    fn every_worker_failing_does_not_hang() {
        let input = "bad\n".repeat(10_000);
        let err = run(&input, PipelineConfig::new().workers(2).chunk_bytes(8).chunk_queue_cap(1)).unwrap_err();
        assert_eq!(err.errors().len(), 2);
        assert!(err.errors().iter().all(|e| matches!(e.participant(), Participant::Worker(_))));
    }

    #[test]
    fn huge_values_sum_exactly_through_pipeline() {
        let agg = run("a:900000000000000000.0\na:900000000000000000.0\n", PipelineConfig::new().workers(1)).unwrap();
        let s = agg.get("a").unwrap();
        assert_eq!(s.sum, 18_000_000_000_000_000_000i128);
        assert_eq!((s.count, s.min, s.max), (2, 9_000_000_000_000_000_000, 9_000_000_000_000_000_000));
    }

    #[test]
    fn reader_failure_is_reported_before_worker_failures() {
        let source = FailingSource { data: Cursor::new(b"bad\nbad\n".to_vec()), ok_reads: 1 };
        let err = Pipeline::new(PipelineConfig::new().workers(1).chunk_bytes(8))
            .run_stream("flaky", source)
            .unwrap_err();
        assert_eq!(err.errors().len(), 2);
        assert!(matches!(&err.errors()[0], StageError::Read { path, .. } if path.as_os_str() == "flaky"));
        assert_eq!(err.errors()[0].participant(), Participant::Reader);
        assert_eq!(err.errors()[1].participant(), Participant::Worker(0));
        assert!(err.to_string().starts_with("failed to read file 'flaky': device gone\nworker 0: "));
    }

    #[test]
    fn reader_failure_alone_fails_the_run() {
        let source = FailingSource { data: Cursor::new(b"a:1.0\n".to_vec()), ok_reads: 1 };
        let err = Pipeline::new(PipelineConfig::new().workers(2).chunk_bytes(6)).run_stream("flaky", source).unwrap_err();
        assert_eq!(err.errors().len(), 1);
        assert_eq!(err.errors()[0].participant(), Participant::Reader);
        assert_eq!(err.parse_errors().count(), 0);
    }

    #[test]
    fn config_from_vars_applies_overrides() {
        let lookup = |name: &str| match name {
            ENV_WORKERS => Some("5".to_string()),
            ENV_CHUNK_BYTES => Some("0".to_string()),
            ENV_CHUNK_QUEUE_CAP => Some("lots".to_string()),
            _ => None,
        };
        let cfg = PipelineConfig::from_vars(lookup);
        assert_eq!(cfg, PipelineConfig { workers: 5, chunk_bytes: 1, chunk_queue_cap: DEFAULT_CHUNK_QUEUE_CAP });

        let auto = PipelineConfig::from_vars(|name: &str| (name == ENV_WORKERS).then(|| "Auto".to_string()));
        assert_eq!(auto.workers, num_cpus::get().max(1));
        assert_eq!(PipelineConfig::from_vars(|_: &str| None), PipelineConfig::default());
    }

    #[test]
    fn cancelled_run_is_an_error() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let pipeline = Pipeline::default().with_cancel(cancel);
        let err = pipeline.run_stream("mem", Cursor::new(b"a:1.0\n".to_vec())).unwrap_err();
        assert!(err.is_cancelled());
        assert!(pipeline.cancel_token().is_cancelled());
    }

    #[test]
    fn missing_file_fails_before_starting_stages() {
        let err = Pipeline::default().run("/no/such/dir/input.txt").unwrap_err();
        assert_eq!(err.errors().len(), 1);
        assert!(matches!(err.errors()[0], StageError::FileOpen { .. }));
    }
}
