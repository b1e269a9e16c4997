//! Session endpoints.
//!
//! One [`Session`] owns one end of a conversation: the byte channels
//! the application talks to, the stop signal, and the driver task
//! that runs the networking. The client driver dials and handshakes;
//! the server driver accepts and hands each connection to a handler
//! that does the same. Both end up in the identical pair of listeners.
//!
//! Sockets are bound eagerly with `SO_REUSEADDR` and `SO_REUSEPORT`:
//! a restarted process gets its port back immediately, and two peers
//! can dial each other from pinned addresses to punch through
//! symmetric NATs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use pawl_core::RatchetState;

use crate::error::SessionError;
use crate::handshake;
use crate::listener::{self, SharedOutbound, SharedRatchet};

/// Depth of the send and receive byte channels. A full send channel
/// blocks the producer; a full receive channel holds the reader,
/// which pushes back on the peer through TCP flow control.
const CHANNEL_CAPACITY: usize = 8;

/// Accept backlog for the listening side.
const BACKLOG: u32 = 1024;

enum Endpoint {
    Client {
        socket: TcpSocket,
        remote: SocketAddr,
    },
    Server {
        tcp_listener: TcpListener,
    },
}

/// One end of an encrypted two-party conversation.
///
/// Built with [`Session::client`] or [`Session::server`], launched
/// with [`Session::start`], torn down with [`Session::stop`]. The
/// application exchanges opaque byte payloads through [`sender`] and
/// [`take_receiver`]; everything cryptographic happens behind them.
///
/// [`sender`]: Session::sender
/// [`take_receiver`]: Session::take_receiver
pub struct Session {
    endpoint: Option<Endpoint>,
    local_addr: Option<SocketAddr>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_rx: SharedOutbound,
    inbound_tx: Option<mpsc::Sender<Vec<u8>>>,
    inbound_rx: Option<mpsc::Receiver<Vec<u8>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    driver: Option<JoinHandle<()>>,
}

impl Session {
    /// Prepare a dialing session. The local address is bound now so
    /// address problems surface before any networking starts; the
    /// connection itself is made by [`Session::start`].
    pub fn client(local: SocketAddr, remote: SocketAddr) -> Result<Self, SessionError> {
        let socket = bind_reusable(local).map_err(SessionError::ConnectFailure)?;
        let local_addr = socket.local_addr().ok();
        Ok(Self::with_endpoint(
            Endpoint::Client { socket, remote },
            local_addr,
        ))
    }

    /// Prepare a listening session, one peer at a time.
    pub fn server(listen: SocketAddr) -> Result<Self, SessionError> {
        let socket = bind_reusable(listen).map_err(SessionError::ListenFailure)?;
        let tcp_listener = socket.listen(BACKLOG).map_err(SessionError::ListenFailure)?;
        let local_addr = tcp_listener.local_addr().ok();
        Ok(Self::with_endpoint(
            Endpoint::Server { tcp_listener },
            local_addr,
        ))
    }

    fn with_endpoint(endpoint: Endpoint, local_addr: Option<SocketAddr>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            endpoint: Some(endpoint),
            local_addr,
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            inbound_tx: Some(inbound_tx),
            inbound_rx: Some(inbound_rx),
            stop_tx,
            stop_rx,
            driver: None,
        }
    }

    /// Launch networking. Must be called inside a tokio runtime; does
    /// nothing on a second call.
    pub fn start(&mut self) {
        let Some(endpoint) = self.endpoint.take() else {
            return;
        };
        let Some(inbound) = self.inbound_tx.take() else {
            return;
        };
        let outbound = Arc::clone(&self.outbound_rx);
        let stop = self.stop_rx.clone();

        self.driver = Some(match endpoint {
            Endpoint::Client { socket, remote } => tokio::spawn(async move {
                if let Err(e) = run_client(socket, remote, outbound, inbound, stop).await {
                    tracing::error!("client session ended: {e:#}");
                }
            }),
            Endpoint::Server { tcp_listener } => tokio::spawn(async move {
                run_server(tcp_listener, outbound, inbound, stop).await;
            }),
        });
    }

    /// Producer endpoint of the outbound byte channel. Clone freely.
    pub fn sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.outbound_tx.clone()
    }

    /// Consumer endpoint of the inbound byte channel. Yields `None`
    /// after the first call. The channel closes once the session's
    /// listeners are gone.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.inbound_rx.take()
    }

    /// Address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Signal shutdown and wait for the driver and every listener it
    /// spawned. Safe to call more than once.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                tracing::warn!("session driver panicked: {e}");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // best effort: wake the listeners; a clean join needs `stop`
        let _ = self.stop_tx.send(true);
    }
}

fn bind_reusable(addr: SocketAddr) -> std::io::Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    Ok(socket)
}

async fn run_client(
    socket: TcpSocket,
    remote: SocketAddr,
    outbound: SharedOutbound,
    inbound: mpsc::Sender<Vec<u8>>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let establish = async {
        let mut stream = socket
            .connect(remote)
            .await
            .map_err(SessionError::ConnectFailure)?;
        tracing::info!(%remote, "connected");
        let state = handshake::client(&mut stream).await?;
        Ok::<_, SessionError>((stream, state))
    };

    // a stop during dial or handshake abandons the attempt
    let (stream, state) = tokio::select! {
        _ = stop.wait_for(|stopped| *stopped) => return Ok(()),
        result = establish => result.context("establishing session")?,
    };

    run_listeners(stream, state, outbound, inbound, stop).await;
    tracing::info!(%remote, "session closed");
    Ok(())
}

async fn run_server(
    tcp_listener: TcpListener,
    outbound: SharedOutbound,
    inbound: mpsc::Sender<Vec<u8>>,
    stop: watch::Receiver<bool>,
) {
    let mut handlers: JoinSet<()> = JoinSet::new();
    loop {
        let mut stop_wait = stop.clone();
        tokio::select! {
            _ = stop_wait.wait_for(|stopped| *stopped) => break,
            accepted = tcp_listener.accept() => {
                let (mut stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                        continue;
                    }
                };
                tracing::info!(%peer, "peer connected");

                let outbound = Arc::clone(&outbound);
                let inbound = inbound.clone();
                let mut stop = stop.clone();
                handlers.spawn(async move {
                    // a stop during the handshake abandons the peer
                    let shaken = tokio::select! {
                        _ = stop.wait_for(|stopped| *stopped) => return,
                        result = handshake::server(&mut stream) => result,
                    };
                    match shaken {
                        Ok(state) => {
                            run_listeners(stream, state, outbound, inbound, stop).await
                        }
                        Err(e) => tracing::error!(%peer, "handshake failed: {e}"),
                    }
                    tracing::info!(%peer, "peer session ended");
                });
            }
        }
    }

    // stop accepting before draining the handlers
    drop(tcp_listener);
    while handlers.join_next().await.is_some() {}
}

/// Run both listeners over one handshaken connection and wait for
/// both to finish.
async fn run_listeners(
    stream: TcpStream,
    state: RatchetState,
    outbound: SharedOutbound,
    inbound: mpsc::Sender<Vec<u8>>,
    stop: watch::Receiver<bool>,
) {
    let ratchet: SharedRatchet = Arc::new(Mutex::new(state));
    let (reader, writer) = stream.into_split();
    tokio::join!(
        listener::run_send(writer, outbound, Arc::clone(&ratchet), stop.clone()),
        listener::run_recv(reader, inbound, ratchet, stop),
    );
}
