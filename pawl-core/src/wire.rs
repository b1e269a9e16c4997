//! The on-wire message record.
//!
//! Each ciphertext travels as one JSON object inside one frame. Field
//! names and encodings are pinned to Go's `encoding/json` conventions
//! — exported field names (`"Count"`, `"Nonce"`, `"Message"`,
//! `"PublicKey"`) and standard base64 for byte slices — so a Go peer
//! speaking the same protocol stays wire-compatible.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::crypto::{KEY_LEN, NONCE_LEN};
use crate::error::RatchetError;

/// One encrypted message as both peers exchange it.
#[derive(Clone, Serialize, Deserialize)]
pub struct RatchetMessage {
    /// Index of this message within its sending chain, 0-based.
    #[serde(rename = "Count")]
    pub count: i32,

    /// AES-GCM nonce chosen for this message.
    #[serde(rename = "Nonce", with = "b64_array")]
    pub nonce: [u8; NONCE_LEN],

    /// AEAD output: ciphertext with the tag appended.
    #[serde(rename = "Message", with = "b64_vec")]
    pub ciphertext: Vec<u8>,

    /// Sender's current DH ratchet public key.
    #[serde(rename = "PublicKey", with = "b64_array")]
    pub public_key: [u8; KEY_LEN],
}

impl RatchetMessage {
    /// Serialize for framing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RatchetError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a frame payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self, RatchetError> {
        let message: Self = serde_json::from_slice(data)?;
        if message.count < 0 {
            return Err(RatchetError::ParseFailure(serde_json::Error::custom(
                "Count must be non-negative",
            )));
        }
        Ok(message)
    }
}

mod b64_vec {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        B64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod b64_array {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(de: D) -> Result<[u8; N], D::Error> {
        let encoded = String::deserialize(de)?;
        let bytes = B64.decode(encoded).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|bytes: Vec<u8>| {
            serde::de::Error::custom(format!("expected {N} bytes, got {}", bytes.len()))
        })
    }
}
