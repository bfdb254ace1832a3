//! Protocol versioning for Confab.

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Check whether a client-announced protocol version is supported.
///
/// There is a single wire version today; this exists so the handshake
/// has somewhere to grow.
#[must_use]
pub fn is_supported(version: u8) -> bool {
    version == PROTOCOL_VERSION
}
