//! The two per-connection pumps that drive the ratchet.
//!
//! The send listener moves plaintexts from the outbound channel
//! through the ratchet onto the wire; the receive listener moves
//! frames off the wire through the ratchet into the inbound channel.
//! Each locks the shared state for the whole handling of one message,
//! so a chain step and the I/O it produces are atomic with respect to
//! the opposite direction.
//!
//! Any failure ends the listener: it logs, lets go of the lock, and
//! returns. Sessions never reconnect on their own; the layer above
//! decides whether to build a new one.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, watch};

use pawl_core::frame::{FrameError, read_frame, write_frame};
use pawl_core::{RatchetMessage, RatchetState};

/// Ratchet state shared by the two listeners of one connection.
pub(crate) type SharedRatchet = Arc<Mutex<RatchetState>>;

/// Outbound plaintext source, shared so a later connection on the
/// same session can take over after the current one dies.
pub(crate) type SharedOutbound = Arc<Mutex<mpsc::Receiver<Vec<u8>>>>;

/// Pump outbound plaintexts onto the wire until stopped, until the
/// producers hang up, or until the first failure.
pub(crate) async fn run_send<W>(
    mut writer: W,
    outbound: SharedOutbound,
    ratchet: SharedRatchet,
    mut stop: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut outbound = tokio::select! {
        _ = stop.wait_for(|stopped| *stopped) => return,
        guard = outbound.lock() => guard,
    };

    loop {
        let plaintext = tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => {
                tracing::debug!("send listener stopping");
                return;
            }
            received = outbound.recv() => match received {
                Some(plaintext) => plaintext,
                None => {
                    tracing::debug!("send channel closed, send listener exiting");
                    return;
                }
            },
        };

        // hold the ratchet for the full message: step, seal, write
        let mut state = ratchet.lock().await;
        let message = match state.seal(&plaintext) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("seal failed: {e}");
                return;
            }
        };
        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("message encode failed: {e}");
                return;
            }
        };
        if let Err(e) = write_frame(&mut writer, &payload).await {
            tracing::error!("frame write failed: {e}");
            return;
        }
    }
}

/// Pump wire frames into the inbound channel until stopped or until
/// the first failure. A clean peer close is not an error.
pub(crate) async fn run_recv<R>(
    mut reader: R,
    inbound: mpsc::Sender<Vec<u8>>,
    ratchet: SharedRatchet,
    mut stop: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let payload = tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => {
                tracing::debug!("receive listener stopping");
                return;
            }
            read = read_frame(&mut reader) => match read {
                Ok(payload) => payload,
                Err(FrameError::ShortRead(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    tracing::info!("connection closed by peer");
                    return;
                }
                Err(e) => {
                    tracing::warn!("frame read failed: {e}");
                    return;
                }
            },
        };

        let message = match RatchetMessage::from_bytes(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("message parse failed: {e}");
                return;
            }
        };

        let mut state = ratchet.lock().await;
        let plaintext = match state.open(&message) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!("message rejected: {e}");
                return;
            }
        };
        if inbound.send(plaintext).await.is_err() {
            tracing::debug!("receive channel closed, receive listener exiting");
            return;
        }
    }
}
