//! # confab-protocol
//!
//! Wire protocol definitions for the Confab chat relay.
//!
//! This crate defines the binary protocol spoken between chat clients and
//! the relay server: frame types, the streaming codec, and versioning.
//!
//! ## Frame Types
//!
//! - `Identify` - announce the stable user identifier for a connection
//! - `Roster` - server broadcast of the currently online users
//! - `Direct` / `Deliver` - point-to-point relay of an opaque payload
//! - `Ack` / `Error` - request outcomes (never delivery receipts)
//! - `Ping` / `Pong` - keepalive
//!
//! Relay delivery is best-effort: an `Ack` means the server processed a
//! frame, not that anyone received the payload.
//!
//! ## Example
//!
//! ```rust
//! use confab_protocol::{Frame, codec};
//!
//! // Relay an opaque payload to another user
//! let frame = Frame::direct("alice", "bob", b"hello".to_vec());
//!
//! // Encode and decode
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{code, Frame, FrameType};
pub use version::{is_supported, PROTOCOL_VERSION};
