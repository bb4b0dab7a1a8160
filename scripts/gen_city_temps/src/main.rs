use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// City list, one `name<TAB>population` per line
    #[arg(long)]
    cities: String,
    /// Output file of `name:<int>.<digit>` lines
    #[arg(long)]
    output: String,
    /// Number of lines to generate
    #[arg(long, default_value_t = 1_000_000)]
    rows: usize,
    /// Seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

fn read_cities(path: &str) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path).with_context(|| format!("open {}", path))?);
    let mut names = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path))?;
        let (name, population) = line.split_once('\t').with_context(|| format!("failed to parse '{}'", line))?;
        population.trim().parse::<u64>().with_context(|| format!("failed to parse '{}'", line))?;
        names.push(name.to_string());
    }
    if names.is_empty() {
        bail!("no cities in {}", path);
    }
    Ok(names)
}

fn write_rows<W: Write, R: Rng>(out: &mut W, cities: &[String], rows: usize, rng: &mut R) -> Result<()> {
    for _ in 0..rows {
        let name = cities.choose(rng).context("empty city list")?;
        let value: u32 = rng.gen_range(0..350); // 0.0 - 34.9 degrees
        writeln!(out, "{}:{}.{}", name, value / 10, value % 10)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let cities = read_cities(&args.cities)?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let file = File::create(&args.output).with_context(|| format!("create {}", &args.output))?;
    let mut w = BufWriter::with_capacity(1 << 20, file);
    write_rows(&mut w, &cities, args.rows, &mut rng)?;
    w.flush().with_context(|| format!("flush {}", &args.output))?;

    info!(cities = cities.len(), rows = args.rows, output = %args.output, "generated city temperatures");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_have_the_expected_shape() {
        let cities = vec!["Berlin".to_string(), "Hamburg".to_string()];
        let mut buf = Vec::new();
        write_rows(&mut buf, &cities, 200, &mut StdRng::seed_from_u64(7)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 200);
        for line in text.lines() {
            let (name, value) = line.split_once(':').unwrap();
            assert!(cities.iter().any(|c| c == name));
            let (whole, frac) = value.split_once('.').unwrap();
            assert!(whole.parse::<u32>().unwrap() < 35);
            assert_eq!(frac.len(), 1);
        }
    }

    #[test]
    fn same_seed_same_output() {
        let cities = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut first = Vec::new();
        let mut second = Vec::new();
        write_rows(&mut first, &cities, 50, &mut StdRng::seed_from_u64(1)).unwrap();
        write_rows(&mut second, &cities, 50, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(first, second);
    }
}
