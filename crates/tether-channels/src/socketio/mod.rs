//! Realtime channel over Socket.IO (Engine.IO v4, WebSocket transport).
//!
//! One connection at a time, tagged with the owner's `userId`. Socket I/O runs
//! in a background task; the owner sees it only through the event receiver
//! returned by `open`. Connection failures are reported as
//! `ChannelEvent::Error` + `ChannelEvent::Closed` and never retried here.

mod packet;


pub use packet::{decode_engine, decode_socket, encode_event, EnginePacket, Handshake, SocketPacket};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    config::RealtimeConfig,
    error::TetherError,
    message::{ChannelEvent, ClientMessage, ServerMessage},
    traits::RealtimeChannel,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Liveness of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
}

/// Slot holding the owner's event sender. `None` once detached.
type Listener = Arc<Mutex<Option<mpsc::Sender<ChannelEvent>>>>;

struct Connection {
    owner_id: String,
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    listener: Listener,
    link: Arc<Mutex<LinkState>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Detach the listener, then ask the socket task to say goodbye.
    async fn shut_down(mut self) {
        self.listener.lock().await.take();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        *self.link.lock().await = LinkState::Closed;
        if self.task.is_finished() {
            debug!("realtime channel task for {} already finished", self.owner_id);
        }
        info!("realtime channel closed for {}", self.owner_id);
    }
}

/// Socket.IO client implementing [`RealtimeChannel`].
pub struct SocketIoChannel {
    config: RealtimeConfig,
    conn: Mutex<Option<Connection>>,
}

impl SocketIoChannel {
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    /// Liveness of the current connection; `Closed` when none exists.
    pub async fn link_state(&self) -> LinkState {
        match self.conn.lock().await.as_ref() {
            Some(conn) => *conn.link.lock().await,
            None => LinkState::Closed,
        }
    }

    /// Owner of the open connection, if any.
    pub async fn owner_id(&self) -> Option<String> {
        self.conn.lock().await.as_ref().map(|c| c.owner_id.clone())
    }
}

/// Build the WebSocket URL for `owner_id`.
pub fn endpoint(config: &RealtimeConfig, owner_id: &str) -> Result<String, TetherError> {
    let mut url = Url::parse(&config.url)
        .map_err(|e| TetherError::Config(format!("invalid realtime url '{}': {e}", config.url)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TetherError::Config(format!(
                "unsupported realtime url scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TetherError::Config(format!("cannot use scheme {scheme}")))?;
    url.set_path(&config.path);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket")
        .append_pair("userId", owner_id);
    Ok(url.into())
}

#[async_trait]
impl RealtimeChannel for SocketIoChannel {
    fn name(&self) -> &str {
        "socket.io"
    }

    async fn open(&self, owner_id: &str) -> Result<mpsc::Receiver<ChannelEvent>, TetherError> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(TetherError::Validation(
                "an owner id is required to open the realtime channel".into(),
            ));
        }
        let url = endpoint(&self.config, owner_id)?;

        let mut guard = self.conn.lock().await;
        if let Some(previous) = guard.take() {
            previous.shut_down().await;
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let listener: Listener = Arc::new(Mutex::new(Some(event_tx)));
        let link = Arc::new(Mutex::new(LinkState::Connecting));

        info!("realtime channel connecting for {owner_id}");
        let task = tokio::spawn(run_connection(
            url,
            out_rx,
            listener.clone(),
            link.clone(),
            shutdown_rx,
        ));

        *guard = Some(Connection {
            owner_id: owner_id.to_string(),
            outgoing: out_tx,
            listener,
            link,
            shutdown: Some(shutdown_tx),
            task,
        });
        Ok(event_rx)
    }

    async fn emit(&self, message: ClientMessage) -> Result<(), TetherError> {
        let guard = self.conn.lock().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| TetherError::Channel("realtime channel is not open".into()))?;
        debug!("realtime emit: {}", message.event_name());
        conn.outgoing
            .send(message)
            .map_err(|_| TetherError::Channel("realtime channel is closed".into()))
    }

    async fn close(&self) -> Result<(), TetherError> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.shut_down().await;
        }
        Ok(())
    }
}

/// Deliver an event unless the owner has detached.
async fn notify(listener: &Listener, event: ChannelEvent) {
    let tx = listener.lock().await.clone();
    if let Some(tx) = tx {
        if tx.send(event).await.is_err() {
            debug!("realtime event receiver dropped");
        }
    }
}

async fn run_connection(
    url: String,
    mut outgoing: mpsc::UnboundedReceiver<ClientMessage>,
    listener: Listener,
    link: Arc<Mutex<LinkState>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let result = drive(&url, &mut outgoing, &listener, &link, &mut shutdown).await;
    *link.lock().await = LinkState::Closed;

    if let Err(e) = result {
        warn!("realtime channel failed: {e}");
        notify(&listener, ChannelEvent::Error(e.to_string())).await;
    }
    notify(&listener, ChannelEvent::Closed).await;
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

async fn send_text(sink: &mut WsSink, text: String) -> Result<(), TetherError> {
    sink.send(Message::Text(text))
        .await
        .map_err(|e| TetherError::Transport(format!("websocket send failed: {e}")))
}

async fn send_event(sink: &mut WsSink, message: &ClientMessage) -> Result<(), TetherError> {
    send_text(sink, encode_event(message.event_name(), &message.args())).await
}

/// Best-effort goodbye: Socket.IO disconnect, then a WebSocket close frame.
async fn say_goodbye(sink: &mut WsSink, opened: bool) {
    let goodbye = async {
        if opened {
            let _ = sink.send(Message::Text(packet::DISCONNECT.to_string())).await;
        }
        let _ = sink.close().await;
    };
    if tokio::time::timeout(Duration::from_secs(2), goodbye).await.is_err() {
        debug!("realtime close handshake timed out");
    }
}

async fn drive(
    url: &str,
    outgoing: &mut mpsc::UnboundedReceiver<ClientMessage>,
    listener: &Listener,
    link: &Arc<Mutex<LinkState>>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Result<(), TetherError> {
    let ws = tokio::select! {
        connected = tokio_tungstenite::connect_async(url) => {
            connected
                .map_err(|e| TetherError::Transport(format!("websocket connect failed: {e}")))?
                .0
        }
        _ = &mut *shutdown => return Ok(()),
    };
    let (mut sink, mut stream) = ws.split();
    let mut opened = false;

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                say_goodbye(&mut sink, opened).await;
                return Ok(());
            }
            queued = outgoing.recv(), if opened => {
                match queued {
                    Some(message) => send_event(&mut sink, &message).await?,
                    None => {
                        say_goodbye(&mut sink, opened).await;
                        return Ok(());
                    }
                }
            }
            frame = stream.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        return Err(TetherError::Transport(format!("websocket receive failed: {e}")))
                    }
                    None => return Err(TetherError::Transport("connection dropped".into())),
                };

                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => {
                        debug!("realtime server closed the websocket");
                        return Ok(());
                    }
                    _ => continue,
                };

                match decode_engine(&text)? {
                    EnginePacket::Open(handshake) => {
                        debug!(
                            "engine.io open sid={} ping={}ms",
                            handshake.sid, handshake.ping_interval
                        );
                        send_text(&mut sink, packet::CONNECT.to_string()).await?;
                    }
                    EnginePacket::Ping => send_text(&mut sink, packet::PONG.to_string()).await?,
                    EnginePacket::Close => {
                        debug!("engine.io close from server");
                        return Ok(());
                    }
                    EnginePacket::Message(payload) => match decode_socket(&payload) {
                        Ok(SocketPacket::Connect { sid }) => {
                            opened = true;
                            *link.lock().await = LinkState::Open;
                            info!("realtime channel open (sid {})", sid.as_deref().unwrap_or("-"));
                            send_event(&mut sink, &ClientMessage::StatusRequest).await?;
                            notify(listener, ChannelEvent::Opened).await;
                        }
                        Ok(SocketPacket::Event { name, args, .. }) => {
                            match ServerMessage::from_event(&name, &args) {
                                Some(message) => {
                                    notify(listener, ChannelEvent::Message(message)).await
                                }
                                None => debug!("realtime: ignoring event '{name}'"),
                            }
                        }
                        Ok(SocketPacket::ConnectError { message }) => {
                            return Err(TetherError::Channel(format!("connection refused by server: {message}")));
                        }
                        Ok(SocketPacket::Disconnect) => {
                            info!("realtime server disconnected the socket");
                            return Ok(());
                        }
                        Ok(SocketPacket::Ack { ack_id }) => debug!("realtime ack {ack_id}"),
                        Err(e) => warn!("realtime: dropping malformed packet: {e}"),
                    },
                    EnginePacket::Pong | EnginePacket::Upgrade | EnginePacket::Noop => {}
                }
            }
        }
    }
}
