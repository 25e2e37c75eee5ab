//! Server network layer: websocket connections and the simulation loop.
//!
//! Connection tasks only move frames. Every decision (joins, input
//! admission, simulation, broadcast) happens on the single loop in
//! [`Server::run`], which owns the game instance and all per-connection
//! bookkeeping.

use crate::batching::BatchScheduler;
use crate::client_manager::{AckOutcome, ClientManager, InputAdmission};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::game::{correction_for, GameInstance, StateUpdate};
use crate::http::SharedMonitor;
use crate::metrics::{GameStats, PerformanceMonitor};
use crate::optimizer::{BandwidthRegime, NetworkOptimizer, QueuedMessage};
use crate::rate_limiter::RateLimiter;
use crate::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{
    current_timestamp, AuthoritativeState, ErrorMessage, FullState, InputAcknowledgment,
    InputRejected, JoinGame, Message, Ping, Pong, PredictiveInput,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Events sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        connection_id: ConnectionId,
        addr: SocketAddr,
        outbound: mpsc::Sender<WsMessage>,
    },
    Frame {
        connection_id: ConnectionId,
        text: String,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
}

struct Connection {
    addr: SocketAddr,
    outbound: mpsc::Sender<WsMessage>,
    player_id: Option<String>,
}

/// Authoritative server for one game instance.
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: ServerConfig,
    game: GameInstance,
    clients: ClientManager,
    rate_limiter: RateLimiter,
    optimizer: NetworkOptimizer,
    batcher: BatchScheduler,
    monitor: SharedMonitor,
    connections: HashMap<ConnectionId, Connection>,
    snapshot_tx: watch::Sender<AuthoritativeState>,
    /// Moves to the acceptor on `run`; the loop only holds the receiver.
    event_tx: Option<mpsc::UnboundedSender<ServerEvent>>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
    shutdown: Arc<Notify>,
    tick_rate: f32,
    ticks: u64,
    corrections_sent: u64,
    rate_limited: u64,
}

fn tick_interval(rate: f32) -> Interval {
    let mut ticker = interval(Duration::from_secs_f32(1.0 / rate));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Resolves after `delay_ms`, or never when nothing is waiting.
async fn flush_timer(delay_ms: Option<u64>) {
    match delay_ms {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        None => std::future::pending::<()>().await,
    }
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let address = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&address).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on ws://{}", local_addr);

        let now = current_timestamp();
        let game = GameInstance::new(config.game.clone(), now);
        let (snapshot_tx, _) = watch::channel(game.state().clone());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            clients: ClientManager::new(config.server.max_clients),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            optimizer: NetworkOptimizer::new(config.network.clone(), config.game.base_tick_rate),
            batcher: BatchScheduler::new(config.batching.clone()),
            monitor: Arc::new(RwLock::new(PerformanceMonitor::new(now))),
            connections: HashMap::new(),
            tick_rate: config.game.base_tick_rate,
            snapshot_tx,
            event_tx: Some(event_tx),
            event_rx,
            shutdown: Arc::new(Notify::new()),
            game,
            config,
            ticks: 0,
            corrections_sent: 0,
            rate_limited: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle for the HTTP metrics routes.
    pub fn monitor(&self) -> SharedMonitor {
        Arc::clone(&self.monitor)
    }

    /// Latest completed snapshot, updated once per tick.
    pub fn subscribe(&self) -> watch::Receiver<AuthoritativeState> {
        self.snapshot_tx.subscribe()
    }

    /// Notifying the handle makes [`Server::run`] close every connection
    /// and return. A notification sent before `run` starts is kept.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawns task that accepts websocket connections
    fn spawn_acceptor(
        &self,
        listener: TcpListener,
        event_tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> JoinHandle<()> {
        let queue = self.config.network.outbound_queue;

        tokio::spawn(async move {
            let mut next_id: ConnectionId = 1;
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let connection_id = next_id;
                        next_id += 1;
                        let event_tx = event_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, addr, connection_id, event_tx, queue).await
                            {
                                warn!("Connection {} from {} failed: {}", connection_id, addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Main server loop coordinating all operations
    pub async fn run(mut self) -> Result<(), ServerError> {
        let (Some(listener), Some(event_tx)) = (self.listener.take(), self.event_tx.take()) else {
            return Err(ServerError::InvalidConfig(
                "server is already running".to_string(),
            ));
        };
        let acceptor = self.spawn_acceptor(listener, event_tx);
        let shutdown = self.shutdown_handle();

        let mut ticker = tick_interval(self.tick_rate);
        let mut ping = interval(Duration::from_millis(self.config.network.ping_interval_ms));
        let mut maintenance = interval(Duration::from_secs(1));
        let mut last_tick = Instant::now();

        info!("Server started at {:.0}Hz", self.tick_rate);

        loop {
            let flush_delay = self.batcher.time_until_flush(current_timestamp());

            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            info!("All connection tasks ended");
                            break;
                        }
                    }
                },

                _ = shutdown.notified() => {
                    info!("Server shutting down");
                    break;
                },

                _ = ticker.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    if let Some(rate) = self.on_tick(dt).await {
                        ticker = tick_interval(rate);
                    }
                },

                _ = ping.tick() => self.send_pings(),

                _ = maintenance.tick() => self.maintain().await,

                _ = flush_timer(flush_delay) => {
                    let now = current_timestamp();
                    for (connection_id, frame) in self.batcher.due(now) {
                        self.transmit(connection_id, &frame, now);
                    }
                },
            }
        }

        acceptor.abort();
        self.close_all(current_timestamp()).await;
        Ok(())
    }

    /// Flushes and closes every connection, removing their players.
    async fn close_all(&mut self, now: u64) {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        for connection_id in ids {
            if let Some(frame) = self.batcher.flush_connection(connection_id) {
                self.transmit(connection_id, &frame, now);
            }
            if let Some(connection) = self.connections.get(&connection_id) {
                let _ = connection.outbound.try_send(WsMessage::Close(None));
            }
            self.drop_connection(connection_id, now).await;
        }
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected {
                connection_id,
                addr,
                outbound,
            } => {
                info!("Connection {} opened from {}", connection_id, addr);
                self.optimizer.register(connection_id);
                self.connections.insert(
                    connection_id,
                    Connection {
                        addr,
                        outbound,
                        player_id: None,
                    },
                );
            }
            ServerEvent::Frame {
                connection_id,
                text,
            } => self.handle_frame(connection_id, &text).await,
            ServerEvent::Disconnected { connection_id } => {
                self.drop_connection(connection_id, current_timestamp()).await
            }
        }
    }

    /// Decodes one frame and handles every message in it.
    async fn handle_frame(&mut self, connection_id: ConnectionId, text: &str) {
        let now = current_timestamp();
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed frame on connection {}: {}", connection_id, e);
                self.send_error(connection_id, &e.to_string(), now);
                return;
            }
        };

        let mut pending = vec![message];
        while let Some(message) = pending.pop() {
            // A join earlier in the same batch binds the player.
            let player_id = self
                .connections
                .get(&connection_id)
                .and_then(|connection| connection.player_id.clone());
            if let Some(player_id) = &player_id {
                self.clients.touch(player_id, now);
            }
            match (message, player_id.as_deref()) {
                (Message::Batch(batch), _) => pending.extend(batch.messages.into_iter().rev()),
                (Message::JoinGame(join), None) => self.handle_join(connection_id, join, now),
                (Message::JoinGame(_), Some(_)) => {
                    self.send_error(connection_id, "already joined", now)
                }
                (Message::Pong(pong), _) => {
                    let rtt = now.saturating_sub(pong.timestamp) as f32;
                    self.optimizer.record_rtt(connection_id, rtt, now);
                }
                (Message::Ping(ping), _) => {
                    let pong = Message::Pong(Pong {
                        timestamp: ping.timestamp,
                    });
                    self.transmit(connection_id, &pong, now);
                }
                (_, None) => self.send_error(connection_id, "join-game first", now),
                (Message::PredictiveInput(input), Some(player_id)) => {
                    self.handle_input(connection_id, player_id, input, now)
                }
                (Message::RequestStateSync(request), Some(player_id)) => {
                    debug!(
                        "{} requested state sync from sequence {}",
                        player_id, request.last_sequence
                    );
                    self.send_full_state(connection_id, now);
                }
                (Message::PerformanceReport(mut report), Some(player_id)) => {
                    report.player_id = player_id.to_string();
                    self.monitor.write().await.record_client_report(&report, now);
                }
                (other, Some(player_id)) => {
                    debug!(
                        "Ignoring unexpected {} from {}",
                        other.kind().as_str(),
                        player_id
                    );
                }
            }
        }
    }

    fn handle_join(&mut self, connection_id: ConnectionId, join: JoinGame, now: u64) {
        if let Err(e) = self.clients.add_client(&join.player_id, connection_id, now) {
            warn!("Join of {} refused: {}", join.player_id, e);
            self.send_error(connection_id, &e.to_string(), now);
            return;
        }
        if let Err(e) = self
            .game
            .add_player(&join.player_id, &join.name, &join.color, now)
        {
            warn!("Join of {} refused: {}", join.player_id, e);
            self.clients.remove_client(&join.player_id);
            self.send_error(connection_id, &e.to_string(), now);
            return;
        }

        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.player_id = Some(join.player_id);
        }
        self.send_full_state(connection_id, now);
    }

    /// Rate-limited inputs are dropped without a reply, valid or not. The
    /// rest are validated and failures answered with `input-rejected`.
    fn handle_input(
        &mut self,
        connection_id: ConnectionId,
        player_id: &str,
        input: PredictiveInput,
        now: u64,
    ) {
        let sequence = input.input.sequence;
        if let Err(e) = self.rate_limiter.check(player_id, now) {
            debug!("Dropped input {} from {}: {}", sequence, player_id, e.code());
            self.rate_limited += 1;
            return;
        }

        let verdict = if input.player_id != player_id {
            Err(format!("player id {} does not match connection", input.player_id))
        } else {
            input.validate(now).map_err(|e| e.to_string())
        };
        if let Err(reason) = verdict {
            debug!("Rejected input {} from {}: {}", sequence, player_id, reason);
            self.clients.record_rejection(player_id);
            let rejected = Message::InputRejected(InputRejected {
                player_id: player_id.to_string(),
                sequence,
                reason,
            });
            self.send(connection_id, rejected, now);
            return;
        }

        if self.clients.add_input(player_id, input, now) == InputAdmission::Duplicate {
            debug!("Duplicate input {} from {}", sequence, player_id);
        }
    }

    /// Applies queued inputs in timestamp order, answering each with an
    /// acknowledgment or a rejection, plus a correction when the client's
    /// prediction missed.
    fn process_inputs(&mut self, now: u64) {
        for (player_id, tracked) in self.clients.get_chronological_inputs() {
            let sequence = tracked.sequence();
            let Some(connection_id) = self.clients.get(&player_id).map(|c| c.connection_id) else {
                continue;
            };

            let outcome = match self.game.apply_input(&player_id, &tracked.input.input, now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = e.to_string();
                    debug!("Input {} from {} not applied: {}", sequence, player_id, reason);
                    self.clients.reject_input(&player_id, sequence, &reason);
                    let rejected = Message::InputRejected(InputRejected {
                        player_id: player_id.clone(),
                        sequence,
                        reason,
                    });
                    self.send(connection_id, rejected, now);
                    continue;
                }
            };

            let AckOutcome::Acknowledged { processing_time } =
                self.clients.acknowledge_input(&player_id, sequence, now)
            else {
                continue;
            };
            let ack = Message::InputAcknowledgment(InputAcknowledgment {
                player_id: player_id.clone(),
                acknowledged_sequence: sequence,
                processing_time,
                state_sequence: outcome.state_sequence,
            });
            self.send(connection_id, ack, now);

            let correction_id = format!("{}-{}", player_id, self.corrections_sent + 1);
            if let Some(correction) = correction_for(&tracked.input, &outcome, correction_id) {
                self.corrections_sent += 1;
                debug!(
                    "Correcting {} ({:?}) for input {}",
                    player_id, correction.priority, sequence
                );
                self.send(connection_id, Message::RollbackCorrection(correction), now);
            }
        }
    }

    /// One simulation step. Returns the new tick rate when it changed.
    async fn on_tick(&mut self, dt: f32) -> Option<f32> {
        let started = Instant::now();
        let now = current_timestamp();

        self.process_inputs(now);
        self.game.tick(dt, now);
        self.broadcast_updates(now);
        self.snapshot_tx.send_replace(self.game.state().clone());
        self.ticks += 1;

        let tick_ms = started.elapsed().as_secs_f32() * 1000.0;
        let measured_rate = if dt > 0.0 { 1.0 / dt } else { self.tick_rate };
        self.monitor
            .write()
            .await
            .record_server_tick(measured_rate, tick_ms, now);

        if self.ticks % 60 == 0 && !self.clients.is_empty() {
            debug!(
                "Tick {}: {} clients, sequence {}, {:.1}Hz, batch delay {:.1}ms",
                self.ticks,
                self.clients.len(),
                self.game.sequence(),
                measured_rate,
                self.batcher.delay_ms()
            );
        }

        if self.ticks % self.config.network.adjust_every_ticks.max(1) != 0 {
            return None;
        }
        let snapshot = self.optimizer.network_snapshot(now);
        let rate =
            self.optimizer
                .calculate_optimal_tick_rate(self.game.player_count(), &snapshot, self.tick_rate);
        if (rate - self.tick_rate).abs() < 0.5 {
            return None;
        }
        info!("Tick rate {:.1}Hz -> {:.1}Hz", self.tick_rate, rate);
        self.tick_rate = rate;
        Some(rate)
    }

    /// Sends every update produced since the last broadcast to all joined
    /// connections.
    fn broadcast_updates(&mut self, now: u64) {
        let messages: Vec<Message> = match self.game.pending_updates() {
            StateUpdate::UpToDate => return,
            StateUpdate::Deltas(deltas) => {
                for delta in &deltas {
                    self.batcher.record_compression(delta.compression_ratio);
                }
                deltas.into_iter().map(Message::DeltaGameState).collect()
            }
            StateUpdate::Full(state) => vec![Message::GameState(FullState { state })],
        };

        let queued: Vec<QueuedMessage> = messages
            .into_iter()
            .map(|message| QueuedMessage {
                message,
                enqueued_at: now,
            })
            .collect();
        for connection_id in self.joined_connections() {
            for prioritized in self.optimizer.prioritize_messages(&queued, connection_id, now) {
                if prioritized.should_drop {
                    debug!(
                        "Dropping {} for connection {}",
                        prioritized.message.kind().as_str(),
                        connection_id
                    );
                    continue;
                }
                self.send(connection_id, prioritized.message, now);
            }
        }
    }

    /// Pings bypass batching so RTT samples exclude the batch delay.
    fn send_pings(&mut self) {
        let now = current_timestamp();
        let ping = Message::Ping(Ping { timestamp: now });
        for connection_id in self.joined_connections() {
            self.transmit(connection_id, &ping, now);
        }
    }

    /// Input timeouts, idle players and the periodic metrics snapshot.
    async fn maintain(&mut self) {
        let now = current_timestamp();
        for (player_id, sequence) in self.clients.check_input_timeouts(now) {
            debug!("Input {} from {} timed out", sequence, player_id);
        }

        let timeout_ms = self.config.network.client_timeout_secs * 1000;
        for client in self.clients.check_timeouts(now, timeout_ms) {
            info!("Player {} timed out", client.player_id);
            if let Some(connection) = self.connections.get(&client.connection_id) {
                // Writer sends the close frame; the reader reports the disconnect.
                let _ = connection.outbound.try_send(WsMessage::Close(None));
            }
            self.drop_connection(client.connection_id, now).await;
        }

        let snapshot = self.optimizer.network_snapshot(now);
        let advice = self.optimizer.optimize_bandwidth(snapshot.bandwidth_usage);
        if matches!(advice.regime, BandwidthRegime::Critical | BandwidthRegime::High) {
            warn!(
                "Bandwidth at {:.0}% of target: {}",
                advice.usage_ratio * 100.0,
                advice.actions.join(", ")
            );
        }

        let state = self.game.state();
        let stats = GameStats {
            phase: state.phase(),
            sequence: state.sequence(),
            players: state.players().len(),
            entities: state.entities().len(),
            batch_delay_ms: self.batcher.delay_ms(),
            compression_average: self.batcher.compression_average(),
            compression_trend: self.batcher.compression_trend(),
            inputs: self.clients.stats().into_iter().collect(),
            rate_limited: self.rate_limited,
        };
        let qualities = self.optimizer.qualities(now);

        let mut monitor = self.monitor.write().await;
        monitor.record_game(stats);
        monitor.record_network(snapshot, qualities, now);
    }

    /// Pending batched frames are flushed before the slot is released.
    async fn drop_connection(&mut self, connection_id: ConnectionId, now: u64) {
        if let Some(frame) = self.batcher.flush_connection(connection_id) {
            self.transmit(connection_id, &frame, now);
        }
        let Some(connection) = self.connections.remove(&connection_id) else {
            return;
        };
        self.optimizer.remove(connection_id);
        info!("Connection {} from {} closed", connection_id, connection.addr);

        let Some(player_id) = connection.player_id else {
            return;
        };
        self.clients.remove_client(&player_id);
        self.rate_limiter.remove_player(&player_id);
        if let Err(e) = self.game.remove_player(&player_id, now) {
            warn!("Failed to remove player {}: {}", player_id, e);
        }
        self.monitor.write().await.remove_client(&player_id);
    }

    fn joined_connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.player_id.is_some())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn send_full_state(&mut self, connection_id: ConnectionId, now: u64) {
        let state = Message::GameState(FullState {
            state: self.game.state().clone(),
        });
        self.send(connection_id, state, now);
    }

    fn send_error(&mut self, connection_id: ConnectionId, message: &str, now: u64) {
        let error = Message::Error(ErrorMessage {
            message: message.to_string(),
        });
        self.send(connection_id, error, now);
    }

    /// Routes a message through the batching layer.
    fn send(&mut self, connection_id: ConnectionId, message: Message, now: u64) {
        for frame in self.batcher.enqueue(connection_id, message, now) {
            self.transmit(connection_id, &frame, now);
        }
    }

    /// Hands one frame to the connection's writer without waiting. A full
    /// queue counts as a lost frame.
    fn transmit(&mut self, connection_id: ConnectionId, frame: &Message, now: u64) {
        let Some(connection) = self.connections.get(&connection_id) else {
            return;
        };
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {}: {}", frame.kind().as_str(), e);
                return;
            }
        };
        let bytes = text.len();
        let delivered = match connection.outbound.try_send(WsMessage::Text(text.into())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Outbound queue full for connection {}", connection_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        };
        self.optimizer.record_send(connection_id, bytes, delivered, now);
    }
}

/// Runs one websocket connection: a writer task draining the outbound queue
/// and a reader loop forwarding text frames to the server loop.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_id: ConnectionId,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    queue: usize,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(queue);

    if event_tx
        .send(ServerEvent::Connected {
            connection_id,
            addr,
            outbound: outbound_tx,
        })
        .is_err()
    {
        return Ok(());
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let closing = matches!(frame, WsMessage::Close(_));
            if let Err(e) = write.send(frame).await {
                debug!("Write to connection {} failed: {}", connection_id, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let event = ServerEvent::Frame {
                    connection_id,
                    text: text.as_str().to_string(),
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read from connection {} failed: {}", connection_id, e);
                break;
            }
        }
    }

    writer.abort();
    let _ = event_tx.send(ServerEvent::Disconnected { connection_id });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Batch, PlayerInput, Position, PredictionInfo, PredictionPayload};

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.server.port = 0;
        config
    }

    /// Registers an in-memory connection and returns its outbound queue.
    async fn connect(server: &mut Server, connection_id: ConnectionId) -> mpsc::Receiver<WsMessage> {
        let (outbound, receiver) = mpsc::channel(64);
        server
            .handle_event(ServerEvent::Connected {
                connection_id,
                addr: "127.0.0.1:9000".parse().unwrap(),
                outbound,
            })
            .await;
        receiver
    }

    fn join(player_id: &str) -> Message {
        Message::JoinGame(JoinGame {
            player_id: player_id.to_string(),
            name: "Alice".to_string(),
            color: "red".to_string(),
        })
    }

    fn move_input(player_id: &str, sequence: u32, now: u64) -> Message {
        let target = Position::new(100.0, 100.0);
        Message::PredictiveInput(PredictiveInput {
            player_id: player_id.to_string(),
            input: PlayerInput::movement(now, sequence, target),
            prediction: PredictionInfo {
                prediction_id: format!("{}-{}", player_id, sequence),
                expected_outcome: PredictionPayload::Position(target),
                confidence: 0.85,
            },
        })
    }

    #[tokio::test]
    async fn test_bind_on_ephemeral_port() {
        let server = Server::bind(test_config()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.subscribe().borrow().sequence(), 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let mut config = test_config();
        config.game.base_tick_rate = 5.0;
        assert!(matches!(
            Server::bind(config).await,
            Err(ServerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_join_and_input_in_one_batch() {
        let mut server = Server::bind(test_config()).await.unwrap();
        let mut outbound = connect(&mut server, 1).await;

        let frame = Message::Batch(Batch {
            messages: vec![join("p1"), move_input("p1", 1, current_timestamp())],
        })
        .encode()
        .unwrap();
        server.handle_frame(1, &frame).await;

        assert!(matches!(outbound.try_recv(), Ok(WsMessage::Text(_))));
        assert_eq!(server.clients.get("p1").unwrap().pending_inputs().count(), 1);
        // No "join-game first" error waiting in the batch.
        assert_eq!(server.batcher.pending_connections(), 0);
    }

    #[tokio::test]
    async fn test_invalid_inputs_count_against_rate_limit() {
        let mut server = Server::bind(test_config()).await.unwrap();
        let _outbound = connect(&mut server, 1).await;
        server.handle_frame(1, &join("p1").encode().unwrap()).await;

        let burst = server.config.rate_limit.burst_limit;
        for sequence in 0..=burst as u32 {
            // Sender id does not match the connection's player.
            let frame = move_input("p2", sequence, current_timestamp()).encode().unwrap();
            server.handle_frame(1, &frame).await;
        }

        assert_eq!(server.rate_limited, 1);
        assert_eq!(
            server.clients.get("p1").unwrap().stats().rejected,
            burst as u64
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let mut server = Server::bind(test_config()).await.unwrap();
        let mut outbound = connect(&mut server, 1).await;
        server.shutdown_handle().notify_one();

        let result = tokio::time::timeout(Duration::from_secs(2), server.run()).await;
        assert!(matches!(result, Ok(Ok(()))));

        let mut closed = false;
        while let Some(frame) = outbound.recv().await {
            closed = matches!(frame, WsMessage::Close(_));
        }
        assert!(closed);
    }

    #[tokio::test]
    async fn test_run_twice_is_an_error() {
        let mut server = Server::bind(test_config()).await.unwrap();
        server.listener = None;
        assert!(server.run().await.is_err());
    }

    #[test]
    fn test_tick_interval_period() {
        tokio_test::block_on(async {
            let ticker = tick_interval(50.0);
            assert!((ticker.period().as_secs_f64() - 0.02).abs() < 1e-6);
        });
    }

    #[tokio::test]
    async fn test_flush_timer_waits() {
        let started = Instant::now();
        flush_timer(Some(5)).await;
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
