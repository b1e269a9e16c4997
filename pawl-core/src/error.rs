//! Errors shared by the crypto, wire, and ratchet layers.

use thiserror::Error;

/// Failures while advancing the ratchet or handling a wire message.
#[derive(Debug, Error)]
pub enum RatchetError {
    /// The frame payload was not a valid ratchet message.
    #[error("malformed ratchet message: {0}")]
    ParseFailure(#[from] serde_json::Error),

    /// AEAD authentication failed: wrong key or tampered ciphertext.
    /// Deliberately carries no detail about which.
    #[error("message failed authentication")]
    AeadAuthFailure,

    /// AEAD refused to seal the payload (plaintext beyond the cipher's
    /// size bound).
    #[error("payload too large to seal")]
    SealFailure,

    /// The message index lies behind the receiving chain. The receive
    /// path is linear: keys for already-passed positions are spent.
    #[error("message index {count} is behind the receiving chain (at {chain_count})")]
    OutOfOrderReplay { count: i32, chain_count: i32 },

    /// The message index leaps further ahead of the receiving chain
    /// than one message may advance it. Caps what a forged index can
    /// make the receiver derive.
    #[error("message index {count} is too far ahead of the receiving chain (at {chain_count})")]
    TooManySkipped { count: i32, chain_count: i32 },
}
