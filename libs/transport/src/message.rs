//! The wire message record.

use serde::{Deserialize, Serialize};

/// A single routed message between two players.
///
/// Every payload traveling over a peer stream is one of these records,
/// serialized with bincode and wrapped in a netstring frame. The payload
/// itself is opaque at this layer; collectives serialize their own values
/// into it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Per-sender monotonically increasing serial number.
    pub serial: u64,

    /// Routing tag. Negative tags are reserved for internal operations.
    pub tag: i32,

    /// Rank of the sending player.
    pub sender: u32,

    /// Opaque serialized payload.
    pub payload: Vec<u8>,
}

impl Message {
    /// Serializes the record for framing.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Message serialization cannot fail: every field is a plain
        // fixed-width integer or byte vector.
        bincode::serialize(self).expect("message serialization failed")
    }

    /// Deserializes a record received from a peer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let message = Message { serial: 7, tag: -4, sender: 2, payload: vec![1, 2, 3] };
        let restored = Message::from_bytes(&message.to_bytes()).unwrap();
        assert_eq!(restored, message);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Message::from_bytes(&[0xff; 3]).is_err());
    }
}
