use std::path::PathBuf;
use thiserror::Error;

/// A move that cannot be replayed against the current board. Abandons
/// the rest of the record; merges already applied are kept.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unparseable move `{0}` at ply {1}")]
    BadSan(String, usize),
    #[error("illegal move `{0}` at ply {1}")]
    IllegalMove(String, usize),
}

/// Snapshot persistence failures. An I/O failure during a checkpoint is
/// the one fatal condition of an ingestion run.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt snapshot at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Session-local conditions. The session state is unchanged whenever
/// one of these is reported.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid move `{0}`")]
    InvalidMove(String),
    #[error("no suggestion to accept")]
    NoSuggestion,
}
