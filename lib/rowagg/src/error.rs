use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a line was rejected by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("missing ':' delimiter")]
    MissingDelimiter,
    #[error("integer part is not a decimal number")]
    InvalidInteger,
    #[error("fractional part must be exactly one digit")]
    InvalidFraction,
    #[error("line is not valid UTF-8")]
    InvalidEncoding,
}

/// A malformed line, carried verbatim so the caller can locate it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to parse '{line}': {kind}")]
pub struct ParseError {
    pub line: String,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) fn new(line: &[u8], kind: ParseErrorKind) -> Self {
        Self { line: String::from_utf8_lossy(line).into_owned(), kind }
    }
}

/// Owner of one error slot in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    Reader,
    Worker(usize),
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Participant::Reader => write!(f, "reader"),
            Participant::Worker(id) => write!(f, "worker {}", id),
        }
    }
}

/// The single error a pipeline stage reports for its own share of the work.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to open file '{}': {source}", .path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("worker {worker}: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: ParseError,
    },
    #[error("reader cancelled before end of input")]
    Cancelled,
    #[error("failed to start {participant} thread: {source}")]
    Spawn {
        participant: Participant,
        #[source]
        source: io::Error,
    },
    #[error("{participant} thread panicked")]
    Panicked { participant: Participant },
    #[error("worker {worker} could not publish its aggregate: channel closed")]
    Publish { worker: usize },
}

impl StageError {
    pub fn participant(&self) -> Participant {
        match self {
            StageError::FileOpen { .. } | StageError::Read { .. } | StageError::Cancelled => Participant::Reader,
            StageError::Worker { worker, .. } | StageError::Publish { worker } => Participant::Worker(*worker),
            StageError::Spawn { participant, .. } | StageError::Panicked { participant } => *participant,
        }
    }

    pub fn as_parse_error(&self) -> Option<&ParseError> {
        match self {
            StageError::Worker { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Every stage failure of one pipeline run, in slot order (reader first, then
/// workers by id). Never empty when returned by the pipeline.
#[derive(Debug)]
pub struct CombinedError {
    errors: Vec<StageError>,
}

impl CombinedError {
    /// Joins the non-empty slots. Returns `None` when every slot is empty.
    pub fn join<I>(slots: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<StageError>>,
    {
        let errors: Vec<StageError> = slots.into_iter().flatten().collect();
        if errors.is_empty() { None } else { Some(Self { errors }) }
    }

    pub fn single(error: StageError) -> Self {
        Self { errors: vec![error] }
    }

    pub fn errors(&self) -> &[StageError] {
        &self.errors
    }

    pub fn parse_errors(&self) -> impl Iterator<Item = &ParseError> {
        self.errors.iter().filter_map(StageError::as_parse_error)
    }

    pub fn is_cancelled(&self) -> bool {
        self.errors.iter().any(|e| matches!(e, StageError::Cancelled))
    }
}

impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for CombinedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors.first().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<StageError> for CombinedError {
    fn from(error: StageError) -> Self {
        Self::single(error)
    }
}
