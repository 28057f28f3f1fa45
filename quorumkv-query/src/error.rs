use thiserror::Error;

/// Errors a `ScanDirector` can surface to its caller. Empty pages, lost
/// messages, and rouse/reissue traffic are never surfaced — only retry
/// exhaustion and a failure raised by the consumer's own batch handling are.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan exhausted its rouse budget without reaching quorum")]
    Timeout,

    #[error("scan aborted by consumer: {0}")]
    ConsumerAborted(String),
}
