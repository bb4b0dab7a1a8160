use anyhow::{Context, Result};
use clap::Parser;
use rowagg::{Pipeline, PipelineConfig, RunReport, Stats};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Input file with one `name:<int>.<digit>` record per line
    #[arg(long)]
    input: String,
    /// Worker threads (defaults to ROWAGG_WORKERS or 3)
    #[arg(long)]
    workers: Option<usize>,
    /// Target chunk size in bytes
    #[arg(long)]
    chunk_bytes: Option<usize>,
    /// Chunks buffered between reader and workers
    #[arg(long)]
    queue_cap: Option<usize>,
    /// Print the result (and run metrics) as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct JsonOut<'a> {
    cities: &'a [(String, Stats)],
    report: &'a RunReport,
}

fn tenths(v: i64) -> String {
    let sign = if v < 0 { "-" } else { "" };
    format!("{}{}.{}", sign, v.unsigned_abs() / 10, v.unsigned_abs() % 10)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut config = PipelineConfig::from_env();
    if let Some(n) = args.workers { config = config.workers(n); }
    if let Some(n) = args.chunk_bytes { config = config.chunk_bytes(n); }
    if let Some(n) = args.queue_cap { config = config.chunk_queue_cap(n); }

    let start = Instant::now();
    let outcome = Pipeline::new(config)
        .run_detailed(&args.input)
        .with_context(|| format!("aggregating {}", args.input))?;
    let cities = outcome.aggregate.into_sorted();

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    if args.json {
        serde_json::to_writer_pretty(&mut out, &JsonOut { cities: &cities, report: &outcome.report })?;
        writeln!(out)?;
    } else {
        for (name, s) in &cities {
            let mean = s.mean().unwrap_or(0.0) / 10.0;
            writeln!(out, "{}\tmin={}\tmean={:.1}\tmax={}\tcount={}", name, tenths(s.min), mean, tenths(s.max), s.count)?;
        }
    }
    out.flush()?;

    info!(cities = cities.len(), wall_ms = start.elapsed().as_millis() as u64, "done");
    Ok(())
}
