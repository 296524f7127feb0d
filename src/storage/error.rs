use thiserror::Error;

/// Coarse classification of a [StorageError](StorageError).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoCurrentRecord,
    RecordNotFound,
    InvalidRange,
    InvalidArgument,
    CursorClosed,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// The cursor is not positioned on a record, or a move crossed the end of the index/range.
    #[error("no current record")]
    NoCurrentRecord,

    /// No record satisfies a seek.
    #[error("record not found")]
    RecordNotFound,

    #[error("invalid index range; {reason}")]
    InvalidRange { reason: String },

    #[error("invalid argument `{name}`; {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("cursor has been closed")]
    CursorClosed,
}

impl StorageError {
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_range(reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoCurrentRecord => ErrorKind::NoCurrentRecord,
            Self::RecordNotFound => ErrorKind::RecordNotFound,
            Self::InvalidRange { .. } => ErrorKind::InvalidRange,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::CursorClosed => ErrorKind::CursorClosed,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
