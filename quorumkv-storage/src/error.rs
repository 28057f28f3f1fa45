use thiserror::Error;

/// Failure surfaced by a `Log` or `Archive` backend.
///
/// An Acceptor treats any `StorageError` from its injected log/archive as
/// fatal: it transitions to `Panicked` and stops answering mailbox input.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] bincode::Error),

    #[error("record not found")]
    NotFound,

    #[error("log record framed with unknown tag {0}")]
    UnknownRecordTag(u32),
}
