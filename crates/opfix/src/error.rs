use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::report::FailureReport;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("invalid opcode metadata: {0}")]
    Metadata(String),

    #[error("corpus file {} unavailable: {source}", path.display())]
    Acquisition {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The corpus file was read but its records do not have the expected shape.
    #[error("corpus file {} is malformed: {source}", path.display())]
    MalformedCorpus {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt fixture: {0}")]
    Structural(&'static str),

    #[error("malformed corpus record {index} ({name:?}): {reason}")]
    MalformedRecord {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("cpu step failed at vector {index} ({name:?}): {message}")]
    Step {
        index: usize,
        name: String,
        message: String,
    },

    #[error("{0}")]
    Mismatch(FailureReport),
}

impl Error {
    /// Whether a batch run has to stop on this error. Only an unavailable or unreadable corpus
    /// file is absorbed; the affected class is skipped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Acquisition { .. })
    }
}

/// The opcode metadata table and the corpus disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("opcode {0:02X} is not present in the opcode metadata")]
    MissingOpcode(u8),

    #[error("opcode {opcode:02X} has no sub-opcode {sub} in the opcode metadata")]
    MissingSubOpcode { opcode: u8, sub: u8 },
}
