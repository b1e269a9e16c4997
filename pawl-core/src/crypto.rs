//! Cryptographic primitives for the ratchet.
//!
//! X25519 for Diffie-Hellman agreement, HKDF-SHA256 for both chain
//! steps, AES-256-GCM for message sealing. Every chain step has the
//! same shape: 64 bytes of HKDF output split into a (left, right)
//! pair. Root-chain steps salt the derivation with a fresh DH output;
//! message-key steps run unsalted.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::StaticSecret;
use zeroize::Zeroize;

pub use x25519_dalek::PublicKey;

use crate::error::RatchetError;

/// X25519 key length, which is also the AES-256 key length.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// An ephemeral X25519 key pair.
///
/// Created at the handshake and replaced whenever the local side must
/// introduce a fresh DH contribution into the root chain. The secret
/// half never leaves this struct.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh pair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Raw bytes of the public half, as carried on the wire.
    pub fn public_bytes(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    /// X25519 agreement with a peer public key.
    pub fn agree(&self, their_public: &PublicKey) -> [u8; KEY_LEN] {
        self.secret.diffie_hellman(their_public).to_bytes()
    }
}

/// Step a chain key: HKDF-SHA256 over `key`, 64 bytes out, split into
/// a (left, right) pair.
///
/// Root-chain steps pass `Some(dh_output)` as the salt; message-key
/// steps pass `None` (RFC 5869 zero salt). Pure: same inputs, same
/// output.
pub fn derive(key: &[u8; KEY_LEN], salt: Option<&[u8]>) -> ([u8; KEY_LEN], [u8; KEY_LEN]) {
    let hk = Hkdf::<Sha256>::new(salt, key);
    let mut okm = [0u8; 2 * KEY_LEN];
    hk.expand(&[], &mut okm)
        .expect("64 bytes is a valid HKDF-SHA256 output length");

    let mut left = [0u8; KEY_LEN];
    let mut right = [0u8; KEY_LEN];
    left.copy_from_slice(&okm[..KEY_LEN]);
    right.copy_from_slice(&okm[KEY_LEN..]);
    okm.zeroize();
    (left, right)
}

/// Seal one message under a one-time key: AES-256-GCM with a fresh
/// random 12-byte nonce and empty associated data.
///
/// Nothing besides the plaintext is bound into the tag; binding the
/// sender key or counters would change the wire contract.
pub fn aead_encrypt(
    key: &[u8; KEY_LEN],
    plaintext: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), RatchetError> {
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| RatchetError::SealFailure)?;
    Ok((nonce.into(), ciphertext))
}

/// Open one message. Fails if the key, nonce, or ciphertext do not
/// line up; no partial plaintext escapes.
pub fn aead_decrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, RatchetError> {
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| RatchetError::AeadAuthFailure)
}
