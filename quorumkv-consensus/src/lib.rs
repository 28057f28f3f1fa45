//! Single-decree Paxos core for `quorumkv`.
//!
//! Two actor kinds cooperate per decree `(key, time)`: an [`acceptor`] that
//! durably persists ballot/proposal commitments, and a [`proposer`] that
//! drives a ballot through a quorum of acceptors. [`registry`] holds the
//! live, per-decree actor handles; [`coordinator`] wires both registries to
//! a `Cluster` transport and gives an acceptor a way to run its own ballot
//! when `deliberatingTimeout` elapses with no proposer in sight.

pub mod acceptor;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod messages;
pub mod proposer;
pub mod registry;

pub use acceptor::{ActiveStatus, AcceptorHandle, AcceptorReply};
pub use config::{AcceptorConfig, ProposerConfig};
pub use coordinator::{Coordinator, DecreeProposer, LocalDecreeProposer};
pub use error::{AcceptorError, ProposerError};
pub use proposer::ProposerHandle;
pub use registry::{AcceptorRegistry, ProposerRegistry};
