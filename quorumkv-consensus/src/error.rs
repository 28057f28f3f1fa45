use bytes::Bytes;
use thiserror::Error;

/// Errors an Acceptor can surface to a caller. Storage failures make the
/// acceptor `Panicked`; everything else is handled as a state transition and
/// never reaches here.
#[derive(Debug, Error)]
pub enum AcceptorError {
    #[error("acceptor has panicked after a storage failure and is no longer serving requests")]
    Panicked,

    #[error("safety violation: acceptor was asked to choose {got:?} but had already chosen {expected:?}")]
    Disagreement { expected: Bytes, got: Bytes },
}

/// Errors a Proposer can surface to a learner.
#[derive(Debug, Clone, Error)]
pub enum ProposerError {
    #[error("proposer exhausted its retry budget without reaching quorum")]
    Timeout,
}
