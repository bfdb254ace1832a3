//! Frame types for the Confab protocol.
//!
//! Frames are the fundamental unit of communication between clients and
//! the relay server. Each frame is serialized using MessagePack for
//! efficient binary encoding.

use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Identify = 0x03,
    Roster = 0x04,
    Direct = 0x05,
    Deliver = 0x06,
    Ack = 0x07,
    Error = 0x08,
    Ping = 0x09,
    Pong = 0x0A,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Identify),
            0x04 => Ok(FrameType::Roster),
            0x05 => Ok(FrameType::Direct),
            0x06 => Ok(FrameType::Deliver),
            0x07 => Ok(FrameType::Ack),
            0x08 => Ok(FrameType::Error),
            0x09 => Ok(FrameType::Ping),
            0x0A => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Error codes carried in [`Frame::Error`].
///
/// Relay misses (recipient offline) never produce an error frame; these
/// codes cover protocol-level failures only.
pub mod code {
    /// Malformed or unexpected frame.
    pub const BAD_FRAME: u16 = 1001;
    /// User identifier failed validation.
    pub const INVALID_USER: u16 = 1002;
    /// Connection limit reached.
    pub const AT_CAPACITY: u16 = 1003;
    /// Unsupported protocol version.
    pub const UNSUPPORTED_VERSION: u16 = 1004;
}

/// A protocol frame.
///
/// Frames are the messages exchanged between clients and the relay server.
/// Each frame type has specific fields relevant to its operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client hello.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
    },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Announce the stable user identifier for this connection.
    #[serde(rename = "identify")]
    Identify {
        /// Request ID for acknowledgment.
        id: u64,
        /// Stable user identifier.
        user: String,
    },

    /// Broadcast of the currently online user identifiers.
    #[serde(rename = "roster")]
    Roster {
        /// Online user identifiers.
        users: Vec<String>,
    },

    /// Relay an opaque payload to another user.
    #[serde(rename = "direct")]
    Direct {
        /// Optional request ID for acknowledgment.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Sender user identifier.
        from: String,
        /// Recipient user identifier.
        to: String,
        /// Opaque payload; never inspected by the relay.
        #[serde(with = "serde_bytes")]
        body: Vec<u8>,
    },

    /// Relayed payload delivered to the recipient connection only.
    #[serde(rename = "deliver")]
    Deliver {
        /// Sender user identifier, copied from the relayed frame.
        from: String,
        /// Opaque payload, byte-for-byte as sent.
        #[serde(with = "serde_bytes")]
        body: Vec<u8>,
    },

    /// Acknowledgment that a request frame was processed.
    ///
    /// This is not a delivery receipt: a `Direct` frame is acked once the
    /// relay lookup completed, whether or not the recipient was online.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`code`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Identify { .. } => FrameType::Identify,
            Frame::Roster { .. } => FrameType::Roster,
            Frame::Direct { .. } => FrameType::Direct,
            Frame::Deliver { .. } => FrameType::Deliver,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8) -> Self {
        Frame::Connect { version }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new Identify frame.
    #[must_use]
    pub fn identify(id: u64, user: impl Into<String>) -> Self {
        Frame::Identify {
            id,
            user: user.into(),
        }
    }

    /// Create a new Roster frame.
    #[must_use]
    pub fn roster(users: Vec<String>) -> Self {
        Frame::Roster { users }
    }

    /// Create a new Direct frame.
    #[must_use]
    pub fn direct(
        from: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::Direct {
            id: None,
            from: from.into(),
            to: to.into(),
            body: body.into(),
        }
    }

    /// Create a new Direct frame with ID for acknowledgment.
    #[must_use]
    pub fn direct_with_ack(
        id: u64,
        from: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::Direct {
            id: Some(id),
            from: from.into(),
            to: to.into(),
            body: body.into(),
        }
    }

    /// Create a new Deliver frame.
    #[must_use]
    pub fn deliver(from: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Frame::Deliver {
            from: from.into(),
            body: body.into(),
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Ping frame with timestamp.
    #[must_use]
    pub fn ping_with_timestamp(timestamp: u64) -> Self {
        Frame::Ping {
            timestamp: Some(timestamp),
        }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        let identify = Frame::identify(1, "alice");
        assert_eq!(identify.frame_type(), FrameType::Identify);

        let direct = Frame::direct("alice", "bob", b"hello".to_vec());
        assert_eq!(direct.frame_type(), FrameType::Direct);

        let roster = Frame::roster(vec!["alice".into()]);
        assert_eq!(roster.frame_type(), FrameType::Roster);
    }

    #[test]
    fn test_frame_type_conversion() {
        for byte in 0x01..=0x0A {
            let ft = FrameType::try_from(byte).unwrap();
            assert_eq!(u8::from(ft), byte);
        }
        assert!(FrameType::try_from(0x00).is_err());
        assert!(FrameType::try_from(0x0B).is_err());
    }

    #[test]
    fn test_direct_body_is_opaque() {
        // Arbitrary bytes, not valid UTF-8, must survive untouched
        let body = vec![0xFF, 0x00, 0xAB, 0x7F];
        let frame = Frame::direct("a", "b", body.clone());
        match frame {
            Frame::Direct { body: b, .. } => assert_eq!(b, body),
            _ => unreachable!(),
        }
    }
}
