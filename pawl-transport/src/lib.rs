//! Encrypted peer-to-peer sessions over framed TCP.
//!
//! A [`Session`] is one end of a two-party conversation: the client
//! end dials, the server end accepts, and both then run the same pair
//! of listeners that pump bytes between the application's channels and
//! the ratcheted wire. Consumers only ever see plaintext byte
//! payloads; key management lives in `pawl-core` and stays behind the
//! session's mutex.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use pawl_transport::Session;
//!
//! let mut server = Session::server("127.0.0.1:7600".parse()?)?;
//! server.start();
//!
//! let mut client = Session::client(
//!     "127.0.0.1:7601".parse()?,
//!     "127.0.0.1:7600".parse()?,
//! )?;
//! client.start();
//!
//! client.sender().send(b"hello".to_vec()).await?;
//! let mut inbox = server.take_receiver().expect("first take");
//! let _plaintext = inbox.recv().await;
//! # Ok(())
//! # }
//! ```
//!
//! The handshake is raw ephemeral X25519 with no identity binding: a
//! path-active adversary can sit in the middle of it. That is the
//! protocol's documented trust model, not an oversight; pair it with
//! out-of-band verification if you need more.

pub mod error;
pub mod handshake;
mod listener;
pub mod session;

pub use error::SessionError;
pub use session::Session;
