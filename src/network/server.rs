//! WebSocket Game Server
//!
//! Async WebSocket front for the [`Broker`]. Every socket is one endpoint;
//! the admin coordinator is an in-process endpoint registered under the
//! admin id and ticked on an interval.
//!
//! ## Frames
//!
//! Client → server:
//! - `{"type":"connect","peer":ID}`
//! - `{"type":"send","peer":ID,"data":{...message...}}`
//! - `{"type":"close","peer":ID}`
//!
//! Server → client:
//! - `{"type":"id","peer":ID}` (first frame, the assigned id)
//! - `{"type":"open","peer":ID}`
//! - `{"type":"data","peer":ID,"data":{...message...}}`
//! - `{"type":"close","peer":ID}`
//! - `{"type":"error","peer":ID,"reason":TEXT}`

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::clock::{Clock, SystemClock};
use crate::network::admin::{LobbySnapshot, MatchmakingCoordinator};
use crate::network::broker::{Broker, BrokerError, Delivery};
use crate::network::peer::PeerId;
use crate::network::protocol::{decode_value, ProtocolError};
use crate::network::transport::{Command, TransportEvent};

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Broker refused the operation.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Frame could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Frame sent by a socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Dial a peer.
    Connect {
        /// Target.
        peer: PeerId,
    },
    /// Send a message over an open link.
    Send {
        /// Target.
        peer: PeerId,
        /// Protocol message.
        data: Value,
    },
    /// Close a link.
    Close {
        /// Target.
        peer: PeerId,
    },
}

impl ClientFrame {
    /// Convert to a broker command. Unknown message kinds yield `Ok(None)`.
    pub fn into_command(self) -> Result<Option<Command>, ProtocolError> {
        Ok(match self {
            Self::Connect { peer } => Some(Command::Connect { peer }),
            Self::Close { peer } => Some(Command::Close { peer }),
            Self::Send { peer, data } => {
                decode_value(data)?.map(|message| Command::Send { peer, message })
            }
        })
    }
}

/// Frame sent to a socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Assigned peer id.
    Id {
        /// This socket's id.
        peer: PeerId,
    },
    /// Link open.
    Open {
        /// Remote end.
        peer: PeerId,
    },
    /// Message from a peer.
    Data {
        /// Sender.
        peer: PeerId,
        /// Protocol message.
        data: Value,
    },
    /// Link closed.
    Close {
        /// Remote end.
        peer: PeerId,
    },
    /// Link failure.
    Error {
        /// Remote end.
        peer: PeerId,
        /// Reason.
        reason: String,
    },
}

impl ServerFrame {
    /// Frame for a transport event.
    pub fn from_event(event: TransportEvent) -> Result<Self, serde_json::Error> {
        Ok(match event {
            TransportEvent::Open { peer } => Self::Open { peer },
            TransportEvent::Data { peer, message } => Self::Data {
                peer,
                data: message.to_value()?,
            },
            TransportEvent::Close { peer } => Self::Close { peer },
            TransportEvent::Error { peer, reason } => Self::Error { peer, reason },
        })
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Shared routing state: broker, coordinator, and socket outboxes.
struct Hub {
    broker: Broker,
    admin: MatchmakingCoordinator,
    admin_id: PeerId,
    sockets: BTreeMap<PeerId, mpsc::Sender<ServerFrame>>,
    clock: Arc<dyn Clock>,
}

impl Hub {
    fn new(config: &ServerConfig, clock: Arc<dyn Clock>) -> Result<Self, BrokerError> {
        // One extra slot for the admin endpoint.
        let mut broker = Broker::with_capacity(config.max_connections + 1);
        let admin_id = config.admin.admin_id.clone();
        broker.register_as(admin_id.clone())?;
        Ok(Self {
            broker,
            admin: MatchmakingCoordinator::new(config.admin.clone()),
            admin_id,
            sockets: BTreeMap::new(),
            clock,
        })
    }

    fn attach(&mut self, outbox: mpsc::Sender<ServerFrame>) -> Result<PeerId, BrokerError> {
        let id = self.broker.register()?;
        self.sockets.insert(id.clone(), outbox);
        Ok(id)
    }

    fn detach(&mut self, id: &PeerId) {
        self.sockets.remove(id);
        let deliveries = self.broker.unregister(id);
        self.route(VecDeque::new(), deliveries.into());
    }

    fn submit(&mut self, from: &PeerId, command: Command) {
        let mut work = VecDeque::new();
        work.push_back((from.clone(), command));
        self.route(work, VecDeque::new());
    }

    fn tick(&mut self) {
        self.admin.tick(self.clock.now_ms());
        let work = self.admin_commands();
        self.route(work, VecDeque::new());
    }

    fn admin_commands(&mut self) -> VecDeque<(PeerId, Command)> {
        self.admin
            .drain_commands()
            .into_iter()
            .map(|command| (self.admin_id.clone(), command))
            .collect()
    }

    /// Run commands and deliveries until both queues are empty.
    fn route(&mut self, mut work: VecDeque<(PeerId, Command)>, mut deliveries: VecDeque<Delivery>) {
        loop {
            if let Some(delivery) = deliveries.pop_front() {
                if delivery.to == self.admin_id {
                    if let Err(e) = self.admin.handle(delivery.event, self.clock.now_ms()) {
                        warn!("Admin rejected event: {}", e);
                    }
                    work.extend(self.admin_commands());
                } else if !self.push_frame(&delivery.to, delivery.event) {
                    // A socket that cannot keep up is cut off rather than fed a gap.
                    warn!("Outbox full or closed for {}, dropping socket", delivery.to.short());
                    self.sockets.remove(&delivery.to);
                    deliveries.extend(self.broker.unregister(&delivery.to));
                }
            } else if let Some((from, command)) = work.pop_front() {
                match self.broker.execute(&from, command) {
                    Ok(out) => deliveries.extend(out),
                    Err(e) => warn!("Dropped command from {}: {}", from.short(), e),
                }
            } else {
                break;
            }
        }
    }

    /// Queue a frame for a socket. False if the socket's outbox refused it.
    fn push_frame(&self, to: &PeerId, event: TransportEvent) -> bool {
        let Some(outbox) = self.sockets.get(to) else {
            debug!("No socket for {}", to.short());
            return true;
        };
        match ServerFrame::from_event(event) {
            Ok(frame) => outbox.try_send(frame).is_ok(),
            Err(e) => {
                error!("Failed to serialize frame: {}", e);
                true
            }
        }
    }
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Routing state.
    hub: Arc<Mutex<Hub>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server on the system clock.
    pub fn new(config: ServerConfig) -> Result<Self, GameServerError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a server on a custom clock.
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Result<Self, GameServerError> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let hub = Hub::new(&config, clock)?;
        Ok(Self {
            config,
            hub: Arc::new(Mutex::new(hub)),
            shutdown_tx,
        })
    }

    /// Bind and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            "Jumpy admin {} listening on {}",
            self.config.admin.admin_id,
            listener.local_addr()?
        );

        let tick_hub = self.hub.clone();
        let tick_every = self.config.tick_interval;
        let tick_handle = tokio::spawn(async move {
            let mut ticker = interval(tick_every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tick_hub.lock().await.tick();
            }
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connection_count().await >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        tick_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let hub = self.hub.clone();
        let capacity = self.config.channel_capacity;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(capacity);

            let peer_id = match hub.lock().await.attach(frame_tx.clone()) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Rejecting {}: {}", addr, e);
                    return;
                }
            };
            info!("{} is peer {}", addr, peer_id.short());
            let _ = frame_tx.try_send(ServerFrame::Id { peer: peer_id.clone() });
            drop(frame_tx);

            // Outbound pump
            let mut sender_task = tokio::spawn(async move {
                while let Some(frame) = frame_rx.recv().await {
                    let text = match frame.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize frame: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Outbox gone: the hub cut this socket off.
                let _ = ws_sender.close().await;
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                match parse_frame(&text) {
                                    Ok(Some(command)) => hub.lock().await.submit(&peer_id, command),
                                    Ok(None) => debug!("Ignoring unknown message from {}", peer_id.short()),
                                    Err(e) => debug!("Invalid frame from {}: {}", peer_id.short(), e),
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                        }
                    }
                    _ = &mut sender_task => break,
                    _ = shutdown_rx.recv() => break,
                }
            }

            hub.lock().await.detach(&peer_id);
            sender_task.abort();
            info!("Peer {} disconnected", peer_id.short());
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.hub.lock().await.sockets.len()
    }

    /// Get live session count.
    pub async fn session_count(&self) -> usize {
        self.hub.lock().await.admin.sessions().count()
    }

    /// Lobby counts for status display.
    pub async fn lobby_snapshot(&self) -> LobbySnapshot {
        let hub = self.hub.lock().await;
        hub.admin.lobby_snapshot(hub.clock.now_ms())
    }
}

/// Decode one client text frame into a broker command.
fn parse_frame(text: &str) -> Result<Option<Command>, ProtocolError> {
    let frame: ClientFrame = serde_json::from_str(text)?;
    frame.into_command()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::network::protocol::Message;
    use serde_json::json;
    use std::time::Duration;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_parse_frames() {
        assert_eq!(
            parse_frame(r#"{"type":"connect","peer":"jumpyadmin"}"#).unwrap(),
            Some(Command::Connect { peer: PeerId::admin() }),
        );
        assert_eq!(
            parse_frame(r#"{"type":"send","peer":"x","data":{"action":"join"}}"#).unwrap(),
            Some(Command::send(&PeerId::new("x"), Message::Join)),
        );
        assert_eq!(
            parse_frame(r#"{"type":"send","peer":"x","data":{"action":"wave"}}"#).unwrap(),
            None,
        );
        assert!(parse_frame(r#"{"type":"send","peer":"x","data":{"action":"score"}}"#).is_err());
        assert!(parse_frame(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn test_server_frame_shape() {
        let frame = ServerFrame::from_event(TransportEvent::Data {
            peer: PeerId::new("a"),
            message: Message::Platform { platform_index: 2 },
        })
        .unwrap();
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "data", "peer": "a", "data": {"action": "platform", "platformIndex": 2}}),
        );
    }

    #[test]
    fn test_hub_runs_a_session() {
        let clock = ManualClock::new(0);
        let mut config = test_config();
        config.admin.game_duration = Duration::from_secs(5);
        let mut hub = Hub::new(&config, Arc::new(clock.clone())).unwrap();

        let (tx_a, mut rx_a) = mpsc::channel(64);
        let (tx_b, mut rx_b) = mpsc::channel(64);
        let a = hub.attach(tx_a).unwrap();
        let b = hub.attach(tx_b).unwrap();

        for id in [&a, &b] {
            hub.submit(id, Command::Connect { peer: PeerId::admin() });
            hub.submit(id, Command::send(&PeerId::admin(), Message::Join));
        }
        assert_eq!(drain(&mut rx_a)[0], ServerFrame::Open { peer: PeerId::admin() });
        assert!(matches!(drain(&mut rx_b).last(), Some(ServerFrame::Data { .. })));

        clock.advance(10_000);
        hub.tick();
        let frames = drain(&mut rx_a);
        match &frames[..] {
            [ServerFrame::Data { data, .. }] => {
                assert_eq!(data["action"], "start");
                assert_eq!(data["peerIds"], json!([a.as_str(), b.as_str()]));
            }
            other => panic!("expected start, got {:?}", other),
        }

        // Peers link directly through the hub.
        hub.submit(&a, Command::Connect { peer: b.clone() });
        assert!(drain(&mut rx_b).contains(&ServerFrame::Open { peer: a.clone() }));
        hub.submit(&b, Command::send(&PeerId::admin(), Message::Score { score: 320 }));

        clock.advance(5_000);
        hub.tick();
        let frames = drain(&mut rx_a);
        assert!(frames.iter().any(|f| matches!(f, ServerFrame::Data { data, .. } if data["action"] == "end" && data["ranks"][0] == b.as_str())));
        assert!(frames.contains(&ServerFrame::Close { peer: PeerId::admin() }));
    }

    #[test]
    fn test_hub_cuts_off_full_outbox() {
        use tokio::sync::mpsc::error::TryRecvError;

        let clock = ManualClock::new(0);
        let mut config = test_config();
        config.admin.game_duration = Duration::from_secs(5);
        let mut hub = Hub::new(&config, Arc::new(clock.clone())).unwrap();

        // a never reads: room for Open and startTime only.
        let (tx_a, mut rx_a) = mpsc::channel(2);
        let (tx_b, mut rx_b) = mpsc::channel(64);
        let a = hub.attach(tx_a).unwrap();
        let b = hub.attach(tx_b).unwrap();
        for id in [&a, &b] {
            hub.submit(id, Command::Connect { peer: PeerId::admin() });
            hub.submit(id, Command::send(&PeerId::admin(), Message::Join));
        }
        drain(&mut rx_b);

        clock.advance(10_000);
        hub.tick();
        assert!(!hub.sockets.contains_key(&a));
        assert!(!hub.broker.contains(&a));
        assert!(hub.admin.membership(&a).is_none());
        assert!(hub.admin.membership(&b).is_some());

        // a's outbox keeps what fit, then reports the hub hung up.
        assert_eq!(drain(&mut rx_a).len(), 2);
        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Disconnected));

        clock.advance(5_000);
        hub.tick();
        let ended = drain(&mut rx_b).into_iter().any(|f| {
            matches!(f, ServerFrame::Data { ref data, .. } if data["action"] == "end" && data["ranks"] == json!([b.as_str()]))
        });
        assert!(ended);
    }

    #[test]
    fn test_hub_detach_notifies_admin() {
        let clock = ManualClock::new(0);
        let mut hub = Hub::new(&test_config(), Arc::new(clock)).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let a = hub.attach(tx).unwrap();
        hub.submit(&a, Command::Connect { peer: PeerId::admin() });
        assert_eq!(hub.admin.lobby_snapshot(0).connected, 1);

        hub.detach(&a);
        assert_eq!(hub.admin.lobby_snapshot(0).connected, 0);
        assert!(hub.sockets.is_empty());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(test_config()).unwrap();
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 0);
        assert_eq!(server.lobby_snapshot().await.connected, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = GameServer::new(test_config()).unwrap();
        server.shutdown();
        // Should not panic
    }

    #[tokio::test]
    async fn test_websocket_join() {
        let server = Arc::new(GameServer::new(test_config()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
        let next_frame = |text: WsMessage| -> ServerFrame {
            serde_json::from_str(text.to_text().unwrap()).unwrap()
        };

        let id = match next_frame(ws.next().await.unwrap().unwrap()) {
            ServerFrame::Id { peer } => peer,
            other => panic!("expected id, got {:?}", other),
        };
        assert!(!id.as_str().is_empty());

        ws.send(WsMessage::Text(r#"{"type":"connect","peer":"jumpyadmin"}"#.into())).await.unwrap();
        assert_eq!(next_frame(ws.next().await.unwrap().unwrap()), ServerFrame::Open { peer: PeerId::admin() });

        ws.send(WsMessage::Text(r#"{"type":"send","peer":"jumpyadmin","data":{"action":"join"}}"#.into()))
            .await
            .unwrap();

        let mut joined = false;
        for _ in 0..50 {
            if server.lobby_snapshot().await.joining == 1 {
                joined = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(joined);

        server.shutdown();
        let _ = handle.await;
    }
}
