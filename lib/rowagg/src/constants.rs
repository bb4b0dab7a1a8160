//! Centralized environment variable names and default values for pipeline tuning.

// Environment variable names
pub const ENV_WORKERS: &str = "ROWAGG_WORKERS";
pub const ENV_CHUNK_BYTES: &str = "ROWAGG_CHUNK_BYTES";
pub const ENV_CHUNK_QUEUE_CAP: &str = "ROWAGG_CHUNK_QUEUE_CAP";

/// Value of `ROWAGG_WORKERS` that sizes the pool from the CPU count.
pub const WORKERS_AUTO: &str = "auto";

// Defaults
pub const DEFAULT_WORKERS: usize = 3;
// Target chunk size; lines longer than this widen the read window instead
pub const DEFAULT_CHUNK_BYTES: usize = 4 * 1024; // 4 KiB
// Chunks buffered between reader and workers before the reader blocks
pub const DEFAULT_CHUNK_QUEUE_CAP: usize = 32;

/// Separator between key and value on each line.
pub const KEY_DELIMITER: u8 = b':';
/// Line terminator.
pub const LINE_TERMINATOR: u8 = b'\n';
