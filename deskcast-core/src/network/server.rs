//! WebSocket stream server.
//!
//! One TCP listener; each accepted connection becomes a session with two
//! halves:
//!
//! - a send worker draining the session's outbound queue into the socket
//! - a reader loop feeding inbound messages to the session manager
//!
//! Connections beyond the configured limit complete the WebSocket
//! handshake and are then closed with code 1013. A peer that does not
//! finish the handshake within [`HANDSHAKE_TIMEOUT`] is dropped and its
//! slot released.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::JsonCodec;
use crate::error::DeskError;
use crate::session::manager::{CLOSE_GOING_AWAY, SessionManager};
use crate::session::state::Session;
use crate::stream::queue::Outbound;

/// Close reason sent to connections rejected at capacity.
pub const BUSY_REASON: &str = "Server busy: max connections reached";

/// How long shutdown waits for viewers to acknowledge the close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long a new connection may take to send its WebSocket upgrade.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the final close of a removed session's socket.
const CLOSE_FLUSH: Duration = Duration::from_millis(500);

type WsSource = SplitStream<WebSocketStream<TcpStream>>;

// ── StreamServer ─────────────────────────────────────────────────

pub struct StreamServer {
    listener: TcpListener,
    manager: Arc<SessionManager>,
    codec: JsonCodec,
    handshake_timeout: Duration,
}

impl StreamServer {
    /// Bind the listening socket. Failure here is a startup error.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        manager: Arc<SessionManager>,
    ) -> Result<Self, DeskError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            manager,
            codec: JsonCodec::new(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }

    /// Override [`HANDSHAKE_TIMEOUT`].
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DeskError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Accept viewers until `shutdown` fires, then close every session
    /// with code 1001.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), DeskError> {
        let addr = self.local_addr()?;
        info!(
            %addr,
            max_connections = self.manager.config().max_connections,
            "stream server listening"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                r = self.listener.accept() => r,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "set_nodelay failed");
            }

            let manager = Arc::clone(&self.manager);
            let codec = self.codec;
            let handshake_timeout = self.handshake_timeout;
            tokio::spawn(async move {
                handle_connection(manager, codec, handshake_timeout, stream, peer).await;
            });
        }

        self.shutdown_sessions().await;
        info!("stream server stopped");
        Ok(())
    }

    async fn shutdown_sessions(&self) {
        let live = self.manager.len();
        if live == 0 {
            return;
        }
        info!(sessions = live, "closing sessions");
        self.manager
            .close_all(CLOSE_GOING_AWAY, "Server shutting down");

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while !self.manager.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        for id in self.manager.session_ids() {
            self.manager.remove(id);
        }
    }
}

// ── Per-connection tasks ─────────────────────────────────────────

async fn handle_connection(
    manager: Arc<SessionManager>,
    codec: JsonCodec,
    handshake_timeout: Duration,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let session = match manager.accept(peer) {
        Ok(session) => session,
        Err(DeskError::ConnectionLimitExceeded { max }) => {
            warn!(%peer, max, "rejecting viewer: server busy");
            reject_busy(stream, peer, handshake_timeout).await;
            return;
        }
        Err(e) => {
            error!(%peer, error = %e, "accept failed");
            return;
        }
    };
    let id = session.id();

    let ws = match tokio::time::timeout(handshake_timeout, accept_async(stream)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            debug!(session = %id, %peer, error = %e, "websocket handshake failed");
            manager.remove(id);
            return;
        }
        Err(_) => {
            warn!(session = %id, %peer, "websocket handshake timed out");
            manager.remove(id);
            return;
        }
    };
    if let Err(e) = manager.activate(id) {
        warn!(session = %id, error = %e, "could not activate session");
        manager.remove(id);
        return;
    }
    info!(session = %id, %peer, "viewer connected");

    let (sink, source) = ws.split();
    let writer = tokio::spawn(send_loop(
        Arc::clone(&manager),
        Arc::clone(&session),
        codec,
        sink,
    ));

    read_loop(&manager, &session, source).await;
    manager.remove(id);

    if let Err(e) = writer.await {
        error!(session = %id, error = %e, "send worker panicked");
    }
}

/// Drain the session queue into the socket, oldest first.
///
/// Every await also watches the session token, so `remove` stops the
/// worker even while a write is stuck on a viewer that stopped reading.
async fn send_loop<S>(
    manager: Arc<SessionManager>,
    session: Arc<Session>,
    codec: JsonCodec,
    mut sink: S,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let id = session.id();

    loop {
        let item = tokio::select! {
            biased;
            _ = session.cancelled() => break,
            item = session.queue().pop() => item,
        };
        let Some(item) = item else { break };

        match item {
            Outbound::Frame(frame) => {
                let text = match codec.encode_frame(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(session = %id, error = %e, "frame not serialized; skipped");
                        continue;
                    }
                };
                let len = text.len();
                let sent = tokio::select! {
                    biased;
                    _ = session.cancelled() => {
                        debug!(session = %id, "send abandoned; session removed");
                        return;
                    }
                    sent = sink.send(Message::Text(text)) => sent,
                };
                if let Err(e) = sent {
                    warn!(session = %id, error = %e, "write failed; closing session");
                    let _ = session.begin_close();
                    manager.remove(id);
                    return;
                }
                session.record_sent(len);
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                let sent = tokio::select! {
                    biased;
                    _ = session.cancelled() => return,
                    sent = sink.send(Message::Close(Some(frame))) => sent,
                };
                if let Err(e) = sent {
                    debug!(session = %id, error = %e, "close frame not sent");
                }
                return;
            }
        }
    }

    // The session was removed; a viewer that stopped reading does not
    // get to hold the socket open.
    let _ = tokio::time::timeout(CLOSE_FLUSH, sink.close()).await;
}

/// Feed inbound messages to the manager until the peer leaves or the
/// session is removed.
async fn read_loop(manager: &SessionManager, session: &Session, mut source: WsSource) {
    let id = session.id();

    loop {
        let msg = tokio::select! {
            _ = session.cancelled() => break,
            msg = source.next() => msg,
        };

        // Decode and replay failures are logged by the manager.
        match msg {
            Some(Ok(Message::Text(text))) => {
                let _ = manager.on_inbound_message(id, text.as_bytes());
            }
            Some(Ok(Message::Binary(data))) => {
                let _ = manager.on_inbound_message(id, &data);
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(session = %id, ?frame, "viewer closed connection");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(session = %id, error = %e, "read failed");
                break;
            }
            None => break,
        }
    }
}

/// Finish the handshake, then close with 1013 so the viewer can tell
/// "busy" apart from "unreachable".
async fn reject_busy(stream: TcpStream, peer: SocketAddr, handshake_timeout: Duration) {
    let mut ws = match tokio::time::timeout(handshake_timeout, accept_async(stream)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            debug!(%peer, error = %e, "handshake failed on rejected connection");
            return;
        }
        Err(_) => {
            debug!(%peer, "handshake timed out on rejected connection");
            return;
        }
    };

    let frame = CloseFrame {
        code: CloseCode::Again,
        reason: BUSY_REASON.into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!(%peer, error = %e, "busy close not sent");
        return;
    }

    // Wait for the peer to acknowledge the close.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}
