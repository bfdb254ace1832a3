//! # confab-core
//!
//! Presence tracking, relay routing, and the message history contract for
//! the Confab chat relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **PresenceRegistry** - bidirectional user/connection mapping
//! - **RelayRouter** - connection lifecycle and best-effort point-to-point relay
//! - **Event** - deliveries fanned out to connection handlers
//! - **MessageStore** - the decoupled history persistence contract
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│ RelayRouter │────▶│  Recipient  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Presence   │
//!                     │  Registry   │
//!                     └─────────────┘
//! ```
//!
//! The relay path and the history store are deliberately decoupled: a
//! relayed payload may be seen by the recipient before, or without, the
//! corresponding history record appearing.

pub mod event;
pub mod history;
pub mod presence;
pub mod relay;

pub use event::{DirectMessage, Event};
pub use history::{MemoryStore, MessageStore, StoreError, StoredMessage};
pub use presence::{validate_user_id, PresenceRegistry, UserId};
pub use relay::{RelayConfig, RelayError, RelayRouter, RelayStats};
