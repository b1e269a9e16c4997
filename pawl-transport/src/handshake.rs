//! The two-round ephemeral key exchange that seeds a ratchet.
//!
//! Round one agrees on the secret that becomes the initial root
//! chain. Round two exchanges the key pairs the ratchet actually
//! starts from; no derivation happens here, the second pair's first
//! use is the first post-handshake message. The client writes first
//! in both rounds and the server mirrors, so neither side can
//! deadlock on a full socket buffer.
//!
//! Nothing here proves identity. The exchange is raw ephemeral X25519
//! and a path-active adversary can man-in-the-middle it; callers who
//! need authentication must layer it on top.

use tokio::io::{AsyncRead, AsyncWrite};

use pawl_core::crypto::{KEY_LEN, PublicKey};
use pawl_core::frame::{read_frame, write_frame};
use pawl_core::{KeyPair, RatchetState};

use crate::error::SessionError;

/// Dial-side handshake: write our public key first, then read the
/// peer's, twice.
pub async fn client<S>(stream: &mut S) -> Result<RatchetState, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = KeyPair::generate();
    write_frame(stream, &first.public_bytes()).await?;
    let their_first = read_public(stream).await?;
    let shared = first.agree(&their_first);

    let local = KeyPair::generate();
    write_frame(stream, &local.public_bytes()).await?;
    let remote = read_public(stream).await?;

    Ok(RatchetState::new(shared, local, remote))
}

/// Accept-side handshake: read the peer's public key first, then
/// write ours, twice.
pub async fn server<S>(stream: &mut S) -> Result<RatchetState, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = KeyPair::generate();
    let their_first = read_public(stream).await?;
    write_frame(stream, &first.public_bytes()).await?;
    let shared = first.agree(&their_first);

    let local = KeyPair::generate();
    let remote = read_public(stream).await?;
    write_frame(stream, &local.public_bytes()).await?;

    Ok(RatchetState::new(shared, local, remote))
}

async fn read_public<R>(reader: &mut R) -> Result<PublicKey, SessionError>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_frame(reader).await?;
    let key: [u8; KEY_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SessionError::BadPublicKey { len: bytes.len() })?;
    Ok(PublicKey::from(key))
}
