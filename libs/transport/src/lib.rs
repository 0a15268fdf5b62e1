//! Framed byte transport for the player mesh.
//!
//! Every peer-to-peer stream carries netstring frames: an ASCII decimal
//! length, a colon, the payload bytes, and a trailing comma. The framing
//! layer is incremental so a single background task can multiplex any
//! number of peer streams.

pub mod address;
pub mod message;
pub mod netstring;
pub mod socket;

pub use address::{Address, AddressError};
pub use message::Message;
pub use netstring::{encode as encode_netstring, FrameError, NetstringDecoder};
pub use socket::{FeedOutcome, Listener, NetstringStream, Socket, StreamStats};
