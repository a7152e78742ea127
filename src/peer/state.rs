//! Peer session state
//!
//! Lifecycle of one peer wire session. States are ordered so that "at least
//! unchoked" checks are a comparison.

use std::fmt;

/// Where a `PeerConnection` is in its message exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SessionState {
    /// TCP connection open, nothing sent
    #[default]
    Connected,
    /// Our handshake is on the wire
    HandshakeSent,
    /// Peer's handshake checked
    HandshakeVerified,
    /// Peer's bitfield received
    BitfieldReceived,
    /// Interested sent, waiting for unchoke
    InterestedSent,
    /// Peer unchoked us; block requests allowed
    Unchoked,
    /// A block request is outstanding
    RequestInFlight,
    /// The requested block arrived
    BlockReceived,
    /// Every block of the current piece arrived
    PieceComplete,
}

impl SessionState {
    /// Whether block requests may be sent
    pub fn can_request(&self) -> bool {
        *self >= SessionState::Unchoked
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
