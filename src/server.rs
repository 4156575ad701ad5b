//! Websocket side of the bridge.
//!
//! The server runs on a dedicated thread with a single-threaded tokio
//! runtime. Connections become tasks on that thread, so messages are handled
//! one at a time and never in parallel with each other.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

use crate::config::{BridgeConfig, SessionPolicy};
use crate::protocol::{encode_frame_reply, DecodeError, PoseMessage, POSE_COMPONENTS};
use crate::state::SharedRenderState;

/// Turns pose messages into state updates and frame replies.
///
/// There is one logical session: every connection served by the same
/// handler writes the same pose state.
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    state: Arc<SharedRenderState>,
}

impl ConnectionHandler {
    pub fn new(state: Arc<SharedRenderState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<SharedRenderState> {
        &self.state
    }

    /// Stores the decoded pose and returns the reply carrying the latest frame.
    ///
    /// The frame in the reply was rendered before this pose arrived.
    pub fn handle_binary(&self, payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let message = PoseMessage::decode(payload)?;
        if message.pose.len() != POSE_COMPONENTS {
            debug!(
                "pose message {} carries {} values instead of {POSE_COMPONENTS}",
                message.message_id,
                message.pose.len()
            );
        }
        self.state
            .publish_pose(message.message_id, message.speed_hint, message.pose);
        let frame = self.state.latest_frame();
        Ok(encode_frame_reply(frame.width, frame.height, &frame.pixels))
    }
}

/// Owns the server thread. Dropping the handle stops the server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting, drops open connections and joins the server thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|panic| anyhow!("websocket server thread panicked: {panic:?}")),
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Binds the configured endpoint and serves it from a background thread.
///
/// Returns once the listener is bound, so `local_addr` is usable right away
/// (port `0` picks a free port).
pub fn start_server(config: &BridgeConfig, state: Arc<SharedRenderState>) -> Result<ServerHandle> {
    let (ready_tx, ready_rx) = mpsc::channel::<std::io::Result<SocketAddr>>();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let host = config.host.clone();
    let port = config.port;
    let policy = config.session_policy;
    let handler = ConnectionHandler::new(state);

    let thread = thread::Builder::new()
        .name("splat-bridge-ws".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            runtime.block_on(async move {
                let listener = match TcpListener::bind((host.as_str(), port)).await {
                    Ok(listener) => listener,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let addr = match listener.local_addr() {
                    Ok(addr) => addr,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(addr)).is_err() {
                    return;
                }
                accept_loop(listener, handler, policy, shutdown_rx).await;
            });
        })
        .context("failed to spawn websocket server thread")?;

    let addr = ready_rx
        .recv()
        .map_err(|_| anyhow!("websocket server thread exited during startup"))?
        .with_context(|| format!("failed to listen on {}", config.endpoint()))?;
    info!("websocket server listening on ws://{addr} ({policy:?} sessions)");

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        thread: Some(thread),
    })
}

async fn accept_loop(
    listener: TcpListener,
    handler: ConnectionHandler,
    policy: SessionPolicy,
    mut shutdown: oneshot::Receiver<()>,
) {
    let sessions = Arc::new(AtomicUsize::new(0));
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("websocket server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let handler = handler.clone();
                    let sessions = Arc::clone(&sessions);
                    tokio::spawn(serve_connection(stream, peer, handler, policy, sessions));
                }
                Err(err) => warn!("failed to accept connection: {err}"),
            },
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: ConnectionHandler,
    policy: SessionPolicy,
    sessions: Arc<AtomicUsize>,
) {
    let mut websocket = match tokio_tungstenite::accept_async(stream).await {
        Ok(websocket) => websocket,
        Err(err) => {
            warn!("websocket handshake with {peer} failed: {err}");
            return;
        }
    };

    let session = SessionGuard::enter(sessions);
    if policy == SessionPolicy::Exclusive && session.concurrent > 1 {
        warn!("closing connection from {peer}: another session is already active");
        let _ = websocket.close(None).await;
        return;
    }
    info!("client connected from {peer}");

    while let Some(message) = websocket.next().await {
        match message {
            Ok(Message::Binary(payload)) => match handler.handle_binary(&payload) {
                Ok(reply) => {
                    if let Err(err) = websocket.send(Message::binary(reply)).await {
                        info!("connection from {peer} closed: {err}");
                        return;
                    }
                }
                Err(err) => warn!("dropping message from {peer}: {err}"),
            },
            // the next read flushes the close reply and ends the stream
            Ok(Message::Close(frame)) => debug!("close frame from {peer}: {frame:?}"),
            Ok(_) => {}
            Err(err) => {
                info!("connection from {peer} closed: {err}");
                return;
            }
        }
    }
    info!("client {peer} disconnected");
}

struct SessionGuard {
    sessions: Arc<AtomicUsize>,
    concurrent: usize,
}

impl SessionGuard {
    fn enter(sessions: Arc<AtomicUsize>) -> Self {
        let concurrent = sessions.fetch_add(1, Ordering::AcqRel) + 1;
        Self {
            sessions,
            concurrent,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.fetch_sub(1, Ordering::AcqRel);
    }
}
