//! Session-level errors.

use thiserror::Error;

use pawl_core::{FrameError, RatchetError};

/// Failures that end a session or keep one from starting.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Binding the local address or dialing the peer failed.
    #[error("connect failed: {0}")]
    ConnectFailure(#[source] std::io::Error),

    /// Binding or listening on the local address failed.
    #[error("listen failed: {0}")]
    ListenFailure(#[source] std::io::Error),

    /// A handshake frame did not carry an X25519 public key.
    #[error("handshake public key must be 32 bytes, got {len}")]
    BadPublicKey { len: usize },

    /// Framing-layer failure (short read, oversize frame, write).
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Ratchet-layer failure (parse, authentication, replay).
    #[error(transparent)]
    Ratchet(#[from] RatchetError),
}
