//! TCP relay to a deployed instance.
//!
//! A [`Relay`] listens on an OS-assigned local port and forwards every
//! accepted connection to one fixed remote address, byte for byte, in both
//! directions. It does not look at the payload, so any TCP protocol works.
//!
//! # Lifecycle
//!
//! - **Created**: remote address known, nothing bound
//! - **Listening**: after [`Relay::start`]; an accept loop runs in the
//!   background
//! - **Closed**: after [`Relay::stop`] or a fatal accept error
//!
//! A closed relay can be started again and binds a fresh port.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::error::{RecoError, Result};

/// Point-in-time view of a relay.
#[derive(Debug, Clone)]
pub struct RelayInfo {
    /// Local address; `None` unless the relay is listening
    pub listen: Option<SocketAddr>,
    pub remote: SocketAddr,
    /// Error that terminated the accept loop, if any
    pub error: Option<Arc<io::Error>>,
}

#[derive(Debug, Default)]
struct RelayState {
    listen: Option<SocketAddr>,
    error: Option<Arc<io::Error>>,
    /// Cancels the running accept loop
    stop: Option<CancellationToken>,
    /// Cancelled by the accept loop when it exits
    done: Option<CancellationToken>,
}

pub struct Relay {
    remote: SocketAddr,
    config: RelayConfig,
    state: Arc<RwLock<RelayState>>,
    /// Parent of every run's stop token, cancelled on drop
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(remote: SocketAddr, config: RelayConfig) -> Self {
        Self {
            remote,
            config,
            state: Arc::new(RwLock::new(RelayState::default())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Resolve `addr` (`host:port`) and create a relay to it.
    pub async fn resolve(addr: &str, config: RelayConfig) -> Result<Self> {
        let remote = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| RecoError::InvalidAddress(format!("{}: {}", addr, e)))?
            .next()
            .ok_or_else(|| RecoError::InvalidAddress(addr.to_string()))?;
        Ok(Self::new(remote, config))
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Bind a local port and start accepting connections in the background.
    ///
    /// Does nothing but return the current address if the relay is already
    /// listening.
    pub async fn start(&self) -> Result<SocketAddr> {
        let state = self.state.write().await;
        if let Some(addr) = state.listen {
            return Ok(addr);
        }

        let listener = TcpListener::bind((self.config.bind_ip, 0)).await?;
        let addr = listener.local_addr()?;
        self.launch(state, listener, addr);
        Ok(addr)
    }

    /// Record `addr` as the listen address and spawn the accept loop.
    fn launch<A: Acceptor>(
        &self,
        mut state: RwLockWriteGuard<'_, RelayState>,
        acceptor: A,
        addr: SocketAddr,
    ) {
        let stop = self.shutdown.child_token();
        let done = CancellationToken::new();

        state.listen = Some(addr);
        state.error = None;
        state.stop = Some(stop.clone());
        state.done = Some(done.clone());
        drop(state);

        tracing::info!(listen = %addr, remote = %self.remote, "Relay listening");
        tokio::spawn(accept_loop(
            acceptor,
            addr,
            self.remote,
            self.state.clone(),
            stop,
            done,
        ));
    }

    /// Close the listener and end the accept loop.
    ///
    /// Connections already being relayed are left to finish on their own.
    /// Stopping a relay that is not listening is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let (stop, done) = {
            let mut state = self.state.write().await;
            if state.listen.take().is_none() {
                return Ok(());
            }
            (state.stop.take(), state.done.clone())
        };

        if let Some(stop) = stop {
            stop.cancel();
        }
        // the listener is dropped when the loop exits
        if let Some(done) = done {
            done.cancelled().await;
        }
        tracing::info!(remote = %self.remote, "Relay stopped");
        Ok(())
    }

    /// Block until the accept loop has exited, whether through
    /// [`stop`](Self::stop) or a fatal accept error. Returns immediately
    /// for a relay that was never started.
    pub async fn wait(&self) {
        let done = self.state.read().await.done.clone();
        if let Some(done) = done {
            done.cancelled().await;
        }
    }

    pub async fn info(&self) -> RelayInfo {
        let state = self.state.read().await;
        RelayInfo {
            listen: state.listen,
            remote: self.remote,
            error: state.error.clone(),
        }
    }

    pub async fn is_listening(&self) -> bool {
        self.state.read().await.listen.is_some()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Source of inbound connections for the accept loop.
#[async_trait]
trait Acceptor: Send + 'static {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Errors from `accept` that concern a single pending connection rather
/// than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    listen: SocketAddr,
    remote: SocketAddr,
    state: Arc<RwLock<RelayState>>,
    stop: CancellationToken,
    done: CancellationToken,
) {
    let _done = done.drop_guard();

    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok((inbound, peer)) => {
                tokio::spawn(relay_connection(inbound, peer, remote));
            }
            Err(e) if is_transient(&e) => {
                tracing::warn!(listen = %listen, error = %e, "Accept failed, continuing");
            }
            Err(e) => {
                tracing::error!(listen = %listen, error = %e, "Relay listener failed");
                let mut state = state.write().await;
                // a stop/start may already have replaced this run
                if state.listen == Some(listen) {
                    state.listen = None;
                    state.stop = None;
                }
                state.error = Some(Arc::new(e));
                break;
            }
        }
    }
}

/// Relay one accepted connection until both directions are finished.
async fn relay_connection(inbound: TcpStream, peer: SocketAddr, remote: SocketAddr) {
    let outbound = match TcpStream::connect(remote).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(peer = %peer, remote = %remote, error = %e, "Dial failed, dropping connection");
            return;
        }
    };
    tracing::debug!(peer = %peer, remote = %remote, "Relaying connection");

    let (inbound_read, inbound_write) = inbound.into_split();
    let (outbound_read, outbound_write) = outbound.into_split();
    let teardown = CancellationToken::new();

    let upstream = tokio::spawn(pipe(inbound_read, outbound_write, teardown.clone()));
    let downstream = tokio::spawn(pipe(outbound_read, inbound_write, teardown));

    let (sent, received) = tokio::join!(upstream, downstream);
    match (sent, received) {
        (Ok(Ok(sent)), Ok(Ok(received))) => {
            tracing::debug!(peer = %peer, sent, received, "Connection closed");
        }
        (sent, received) => {
            tracing::debug!(peer = %peer, sent = ?sent, received = ?received, "Connection torn down");
        }
    }
}

/// Copy one direction. When it ends, by EOF or error, `teardown` aborts
/// the opposite direction as well so both sockets close and a peer blocked
/// on a silent counterpart is released.
async fn pipe(
    mut from: OwnedReadHalf,
    mut to: OwnedWriteHalf,
    teardown: CancellationToken,
) -> io::Result<u64> {
    let copied = tokio::select! {
        _ = teardown.cancelled() => {
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "peer direction ended"));
        }
        copied = tokio::io::copy(&mut from, &mut to) => copied,
    };

    if copied.is_ok() {
        // flush the FIN before the socket is dropped; a closed peer makes this fail
        let _ = to.shutdown().await;
    }
    teardown.cancel();
    copied
}
