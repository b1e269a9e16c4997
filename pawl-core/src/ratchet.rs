//! The Double Ratchet state machine.
//!
//! One [`RatchetState`] per session tracks the root chain, the
//! histories of sending and receiving chains, and which side acted
//! first. The first party to send becomes the [`Role::Sender`]; the
//! counters then decide, event by event, whether the acting direction
//! must fold a fresh DH secret into the root chain before deriving
//! message keys:
//!
//! - the Sender opens a new sending chain when the counters are level
//!   (it is starting a new round), and a new receiving chain when they
//!   are not (the peer has answered);
//! - the Receiver mirrors both conditions.
//!
//! Whichever side rotates its key pair does so on its own schedule:
//! the Receiver right before a send-side step, the Sender right after
//! a receive-side step. Either way the next outbound chain is keyed
//! under a DH contribution the previous root chain never saw, which is
//! what buys recovery after a compromise.
//!
//! [`RatchetState::seal`] and [`RatchetState::open`] are the only
//! mutating entry points. The session serializes calls through one
//! mutex, held for the whole handling of a message.

use std::fmt;

use zeroize::Zeroize;

use crate::crypto::{self, KEY_LEN, KeyPair, PublicKey};
use crate::error::RatchetError;
use crate::wire::RatchetMessage;

/// Furthest a single message may advance its receiving chain. Bounds
/// the key derivations (and the `i32` arithmetic behind them) that a
/// forged index can force from one frame.
pub const MAX_ADVANCE: i32 = 1024;

/// Which side of the session produced the first I/O event. Sticky for
/// the session lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This side sent before it received anything.
    Sender,
    /// This side received before it sent anything.
    Receiver,
}

/// One symmetric key chain.
///
/// The base key steps forward with every derivation; derived message
/// keys stay indexed so the receive path can address
/// `message_keys[message.count]` directly.
pub struct KeyChain {
    count: i32,
    base_key: [u8; KEY_LEN],
    message_keys: Vec<[u8; KEY_LEN]>,
}

impl KeyChain {
    fn new(seed: [u8; KEY_LEN]) -> Self {
        Self {
            count: -1,
            base_key: seed,
            message_keys: Vec::new(),
        }
    }

    /// Derive `times` further message keys, stepping the base key.
    fn step(&mut self, times: i32) {
        for _ in 0..times {
            let (base, message) = crypto::derive(&self.base_key, None);
            self.base_key = base;
            self.message_keys.push(message);
            self.count += 1;
        }
    }

    /// Index of the last derived message key; -1 before the first.
    pub fn count(&self) -> i32 {
        self.count
    }
}

impl Drop for KeyChain {
    fn drop(&mut self) {
        self.base_key.zeroize();
        for key in &mut self.message_keys {
            key.zeroize();
        }
    }
}

/// Complete ratchet state for one session, including the local key
/// pair and the peer's current public key. The transport guards the
/// whole struct with a single mutex.
pub struct RatchetState {
    role: Option<Role>,
    root_chain: [u8; KEY_LEN],
    send_chains: Vec<KeyChain>,
    recv_chains: Vec<KeyChain>,
    send_count: i32,
    recv_count: i32,
    local: KeyPair,
    remote_public: PublicKey,
}

impl RatchetState {
    /// Build the post-handshake state: the root chain holds the
    /// handshake secret, no chains exist yet, and neither side has
    /// acted.
    pub fn new(shared_secret: [u8; KEY_LEN], local: KeyPair, remote_public: PublicKey) -> Self {
        Self {
            role: None,
            root_chain: shared_secret,
            send_chains: Vec::new(),
            recv_chains: Vec::new(),
            send_count: -1,
            recv_count: -1,
            local,
            remote_public,
        }
    }

    /// Encrypt one outbound plaintext, advancing the ratchet.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<RatchetMessage, RatchetError> {
        let role = *self.role.get_or_insert(Role::Sender);

        let step_now = match role {
            Role::Sender => self.send_count == self.recv_count,
            Role::Receiver => self.send_count != self.recv_count,
        };
        if step_now {
            if role == Role::Receiver {
                // answering under a spent contribution would let one
                // root secret key two chains; rotate first
                self.local = KeyPair::generate();
            }
            let dh = self.local.agree(&self.remote_public);
            let (root, seed) = crypto::derive(&self.root_chain, Some(&dh));
            self.root_chain = root;
            self.send_chains.push(KeyChain::new(seed));
            self.send_count += 1;
        }

        let chain = self
            .send_chains
            .last_mut()
            .expect("first seal always opens a sending chain");
        chain.step(1);
        let message_key = chain.message_keys[chain.count as usize];
        let (nonce, ciphertext) = crypto::aead_encrypt(&message_key, plaintext)?;

        Ok(RatchetMessage {
            count: chain.count,
            nonce,
            ciphertext,
            public_key: self.local.public_bytes(),
        })
    }

    /// Decrypt one inbound message, advancing the ratchet. The
    /// message's public key becomes the peer's current DH key for
    /// everything that follows. The receiving chain advances linearly
    /// to the message's index, bounded per message by [`MAX_ADVANCE`].
    pub fn open(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, RatchetError> {
        self.remote_public = PublicKey::from(message.public_key);

        let role = *self.role.get_or_insert(Role::Receiver);

        let step_now = match role {
            Role::Receiver => self.send_count == self.recv_count,
            Role::Sender => self.send_count != self.recv_count,
        };
        if step_now {
            let dh = self.local.agree(&self.remote_public);
            let (root, seed) = crypto::derive(&self.root_chain, Some(&dh));
            self.root_chain = root;
            self.recv_chains.push(KeyChain::new(seed));
            self.recv_count += 1;
            if role == Role::Sender {
                // our old contribution is spent; the next send opens
                // its chain under a fresh pair
                self.local = KeyPair::generate();
            }
        }

        let chain = self
            .recv_chains
            .last_mut()
            .expect("first open always opens a receiving chain");
        if message.count < chain.count {
            return Err(RatchetError::OutOfOrderReplay {
                count: message.count,
                chain_count: chain.count,
            });
        }
        // saturating bound check first: the subtraction below must not
        // overflow on a hostile index
        if message.count > chain.count.saturating_add(MAX_ADVANCE) {
            return Err(RatchetError::TooManySkipped {
                count: message.count,
                chain_count: chain.count,
            });
        }
        chain.step(message.count - chain.count);
        let message_key = chain.message_keys[message.count as usize];
        crypto::aead_decrypt(&message_key, &message.nonce, &message.ciphertext)
    }

    /// The sticky role, once the first event has picked it.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Index of the active sending chain; -1 before the first send.
    pub fn send_count(&self) -> i32 {
        self.send_count
    }

    /// Index of the active receiving chain; -1 before the first
    /// receive.
    pub fn recv_count(&self) -> i32 {
        self.recv_count
    }
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.root_chain.zeroize();
    }
}

// Counters and role only; key material stays out of logs.
impl fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatchetState")
            .field("role", &self.role)
            .field("send_count", &self.send_count)
            .field("recv_count", &self.recv_count)
            .field(
                "send_chain_len",
                &self.send_chains.last().map(|c| c.count + 1),
            )
            .field(
                "recv_chain_len",
                &self.recv_chains.last().map(|c| c.count + 1),
            )
            .finish_non_exhaustive()
    }
}
