use crate::constants::LINE_TERMINATOR;
use crate::error::StageError;
use crate::stats::ReaderStats;
use crate::utils::elapsed_ms;
use crossbeam_channel::Sender;
use memchr::{memchr, memrchr};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// A line-aligned run of input bytes. Starts right after a terminator (or at
/// the start of input) and ends on a terminator (or at end of input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    seq: u64,
    bytes: Vec<u8>,
}

impl Chunk {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lines with their terminator stripped, in order.
    pub fn lines(&self) -> Lines<'_> {
        Lines { rest: &self.bytes }
    }
}

pub struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        match memchr(LINE_TERMINATOR, self.rest) {
            Some(i) => {
                let line = &self.rest[..i];
                self.rest = &self.rest[i + 1..];
                Some(line)
            }
            None => Some(std::mem::take(&mut self.rest)),
        }
    }
}

/// Splits a byte stream into [`Chunk`]s of roughly `chunk_bytes`, never
/// cutting a line in two.
///
/// Bytes after the last terminator of a window are carried into the next
/// chunk. When a window holds no terminator at all the window doubles until
/// one turns up or the input ends, so a single line may exceed `chunk_bytes`.
/// Whatever is left at end of input is emitted as the final chunk, terminated
/// or not.
pub struct ChunkReader<R> {
    inner: R,
    origin: PathBuf,
    chunk_bytes: usize,
    carry: Vec<u8>,
    next_seq: u64,
    expansions: u64,
    eof: bool,
    done: bool,
}

impl ChunkReader<File> {
    pub fn open(path: impl AsRef<Path>, chunk_bytes: usize) -> Result<Self, StageError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| StageError::FileOpen { path: path.to_path_buf(), source })?;
        Ok(Self::new(file, chunk_bytes).with_origin(path))
    }
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R, chunk_bytes: usize) -> Self {
        Self {
            inner,
            origin: PathBuf::from("<stream>"),
            chunk_bytes: chunk_bytes.max(1),
            carry: Vec::new(),
            next_seq: 0,
            expansions: 0,
            eof: false,
            done: false,
        }
    }

    /// Name used in read errors.
    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// How many times a window had to grow to reach a terminator.
    pub fn expansions(&self) -> u64 {
        self.expansions
    }

    /// Reads until `buf` holds `limit` bytes or the input is exhausted.
    fn fill(&mut self, buf: &mut Vec<u8>, limit: usize) -> io::Result<()> {
        while buf.len() < limit && !self.eof {
            let start = buf.len();
            buf.resize(limit, 0);
            match self.inner.read(&mut buf[start..]) {
                Ok(0) => {
                    buf.truncate(start);
                    self.eof = true;
                }
                Ok(n) => buf.truncate(start + n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => buf.truncate(start),
                Err(e) => {
                    buf.truncate(start);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }
        let mut staging = std::mem::take(&mut self.carry);
        let mut window = self.chunk_bytes;
        let mut scanned = 0usize;
        loop {
            self.fill(&mut staging, window)?;
            let end = staging.len().min(window);
            if let Some(i) = memrchr(LINE_TERMINATOR, &staging[scanned..end]) {
                self.carry = staging.split_off(scanned + i + 1);
                return Ok(Some(self.emit(staging)));
            }
            if self.eof && end == staging.len() {
                self.done = true;
                return Ok(if staging.is_empty() { None } else { Some(self.emit(staging)) });
            }
            scanned = end;
            window = window.saturating_mul(2);
            self.expansions += 1;
        }
    }

    fn emit(&mut self, bytes: Vec<u8>) -> Chunk {
        let seq = self.next_seq;
        self.next_seq += 1;
        Chunk { seq, bytes }
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Cooperative stop signal for the reader. Chunks already queued still drain.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Reader stage body: pushes every chunk into `chunks` until the input ends.
///
/// Dropping `chunks` on return closes the channel, which is how workers learn
/// the input is exhausted. The reader (and with it the file) is dropped on
/// every exit path.
pub fn run_reader<R: Read>(
    mut reader: ChunkReader<R>,
    chunks: Sender<Chunk>,
    cancel: CancelToken,
) -> Result<ReaderStats, StageError> {
    let start = Instant::now();
    let mut stats = ReaderStats::default();
    debug!(origin = %reader.origin().display(), chunk_bytes = reader.chunk_bytes, "reader starting");

    loop {
        if cancel.is_cancelled() {
            info!(chunks = stats.chunks, "reader cancelled; queued chunks will drain");
            return Err(StageError::Cancelled);
        }
        let chunk = match reader.next() {
            Some(Ok(chunk)) => chunk,
            Some(Err(source)) => {
                error!(origin = %reader.origin().display(), error = %source, "read failed");
                return Err(StageError::Read { path: reader.origin().to_path_buf(), source });
            }
            None => break,
        };
        stats.chunks += 1;
        stats.bytes += chunk.len() as u64;
        stats.max_chunk_bytes = stats.max_chunk_bytes.max(chunk.len() as u64);
        if chunks.send(chunk).is_err() {
            // Every worker has gone away; their errors already fail the run.
            debug!(chunks = stats.chunks, "no workers left to receive chunks; reader stopping early");
            stats.stopped_early = true;
            break;
        }
    }

    stats.window_expansions = reader.expansions();
    stats.wall_ms = elapsed_ms(start);
    Ok(stats)
}
