//! # confab-transport
//!
//! Transport abstraction layer for the Confab chat relay.
//!
//! A transport accepts persistent client connections and hands the server
//! each one already split into a frame reader and a frame writer, so the
//! connection handler can pump inbound frames and outbound deliveries
//! concurrently without sharing one object across tasks.
//!
//! ```rust,ignore
//! use confab_transport::{Accepted, Transport};
//!
//! async fn serve(transport: &dyn Transport) {
//!     while let Ok(accepted) = transport.accept().await {
//!         tokio::spawn(handle(accepted));
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Accepted, ConnectionId, FrameSink, FrameStream, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
