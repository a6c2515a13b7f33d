//! Error types for the chain engine.
//!
//! Rule violations on a block or transaction are not errors: they are
//! reported through the verification contexts in [`crate::verification`].
//! The types here cover structural and fatal conditions only.

use ringchain_types::ParseError;
use thiserror::Error;

use crate::checkpoints::CheckpointError;

/// Failure reported by a storage backend. A missing record is never an
/// error; lookups return `Option` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("storage corrupt: {0}")]
    Corrupt(String),

    #[error("storage i/o failure: {0}")]
    Io(String),
}

/// Fatal engine error. Callers should stop processing blocks when they see
/// one of these.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("difficulty computed as zero at height {0}")]
    ZeroDifficulty(u64),

    #[error("cannot pop the genesis block")]
    GenesisPop,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot build block template: {0}")]
    Template(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type ChainResult<T> = Result<T, ChainError>;
