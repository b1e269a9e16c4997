//! Double Ratchet protocol core.
//!
//! Everything needed to run one end of a ratcheted conversation,
//! minus the networking:
//!
//! - [`frame`] — length-prefixed framing over a byte stream
//! - [`crypto`] — X25519 agreement, HKDF-SHA256 chain derivation,
//!   AES-256-GCM sealing
//! - [`wire`] — the JSON message record both peers exchange
//! - [`ratchet`] — the state machine that turns plaintexts into
//!   [`wire::RatchetMessage`]s and back, rotating keys as it goes
//!
//! The transport layer owns the connection and the concurrency; this
//! crate owns the key schedule. See `pawl-transport` for the session
//! endpoints built on top.

pub mod crypto;
pub mod error;
pub mod frame;
pub mod ratchet;
pub mod wire;

pub use crypto::{KeyPair, PublicKey};
pub use error::RatchetError;
pub use frame::{FrameError, MAX_FRAME_LEN, read_frame, write_frame};
pub use ratchet::{RatchetState, Role};
pub use wire::RatchetMessage;
