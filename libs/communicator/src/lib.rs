//! Fully-connected player mesh with collective operations.
//!
//! A [SocketCommunicator] connects a fixed set of players into a mesh of
//! framed streams and provides the collective primitives the protocol
//! suites are built on: broadcast, scatter(v), gather(v), all-gather,
//! barrier, and tagged point-to-point messaging, plus revoke/shrink/split
//! recovery after player failures.

pub mod communicator;
pub mod connect;
pub mod errors;
mod mailboxes;
pub mod run;
pub mod tags;

pub use communicator::{ReceiveHandle, SendHandle, SocketCommunicator, DEFAULT_TIMEOUT};
pub use connect::{direct, rendezvous, Host};
pub use errors::CommunicatorError;
pub use run::{run_local, run_local_with_timeout};
