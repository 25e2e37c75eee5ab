use crate::error::ClientError;
use crate::input::{BotInput, InputGenerator};
use crate::sync::SyncClient;
use futures_util::{Sink, SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{current_timestamp, Message};
use std::time::{Duration, Instant};
use tokio::time::{interval, sleep};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub player_id: String,
    pub name: String,
    pub color: String,
    /// Generated inputs per second.
    pub input_rate: f32,
    /// Stop after this long; run until disconnected when `None`.
    pub duration: Option<Duration>,
}

/// Headless client: a bot drives inputs through the sync driver over one
/// websocket connection.
pub struct Client {
    config: ClientConfig,
    sync: SyncClient,
    inputs: InputGenerator,
    frames: u32,
    fps: f32,
    divergent: bool,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let sync = SyncClient::new(&config.player_id);
        Self {
            config,
            sync,
            inputs: InputGenerator::new(),
            frames: 0,
            fps: 0.0,
            divergent: false,
        }
    }

    pub fn sync(&self) -> &SyncClient {
        &self.sync
    }

    pub async fn run(&mut self) -> Result<(), ClientError> {
        info!("Connecting to {}...", self.config.server_url);
        let (stream, _) = connect_async(self.config.server_url.as_str()).await?;
        let (mut write, mut read) = stream.split();

        let join = self.sync.join(&self.config.name, &self.config.color);
        send(&mut write, &join).await?;
        info!("Joining as {}", self.config.player_id);

        let input_period = Duration::from_secs_f32(1.0 / self.config.input_rate.max(0.1));
        let mut input_interval = interval(input_period);
        let mut frame_interval = interval(FRAME_INTERVAL);
        let mut report_interval = interval(REPORT_INTERVAL);
        let mut last_report = Instant::now();

        let duration = self.config.duration;
        let stop = async move {
            match duration {
                Some(duration) => sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(stop);

        loop {
            tokio::select! {
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(_))) | None => {
                            warn!("Server closed the connection");
                            return Err(ClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                    };
                    let message = match Message::decode(text.as_str()) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Undecodable frame from server: {}", e);
                            continue;
                        }
                    };
                    for reply in self.sync.handle_message(message, current_timestamp()) {
                        send(&mut write, &reply).await?;
                    }
                },

                _ = input_interval.tick() => {
                    if self.sync.latest_state().is_none() {
                        continue;
                    }
                    if let Some(message) = self.next_input() {
                        send(&mut write, &message).await?;
                    }
                },

                _ = frame_interval.tick() => {
                    let now = current_timestamp();
                    self.sync.update(now);
                    self.frames += 1;

                    let divergent = self.sync.latest_state().is_some() && self.sync.is_divergent(now);
                    if divergent != self.divergent {
                        if divergent {
                            warn!("Prediction diverged from the server");
                        } else {
                            info!("Prediction back in sync");
                        }
                        self.divergent = divergent;
                    }
                },

                _ = report_interval.tick() => {
                    let elapsed = last_report.elapsed().as_secs_f32();
                    if elapsed > 0.0 {
                        self.fps = self.frames as f32 / elapsed;
                    }
                    self.frames = 0;
                    last_report = Instant::now();

                    send(&mut write, &self.sync.ping(current_timestamp())).await?;
                    if self.sync.latest_state().is_some() {
                        send(&mut write, &self.sync.performance_report(self.fps)).await?;
                    }
                },

                _ = &mut stop => {
                    info!("Run duration elapsed");
                    break;
                },
            }
        }

        if let Err(e) = write.send(WsMessage::Close(None)).await {
            debug!("Close frame not delivered: {}", e);
        }
        self.log_summary();
        Ok(())
    }

    fn next_input(&mut self) -> Option<Message> {
        let now = current_timestamp();
        let result = match self.inputs.next_input(self.sync.prediction().predicted()) {
            BotInput::Move(position) => self.sync.move_cursor(position, now),
            BotInput::PlaceArrow(position, direction) => {
                self.sync.place_arrow(position, direction, now)
            }
            BotInput::Action(action) => self.sync.action(action, now),
        };
        match result {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("Input not sent: {}", e);
                None
            }
        }
    }

    fn log_summary(&self) {
        let stats = self.sync.stats();
        let metrics = self.sync.prediction().metrics();
        info!(
            "Sequence {:?}: {} full states, {} deltas applied, {} discarded, {} resyncs",
            self.sync.sequence(),
            stats.full_states,
            stats.deltas_applied,
            stats.deltas_discarded,
            stats.resyncs_requested
        );
        info!(
            "Predictions: {} created, {} validated, {} corrected, {} expired, accuracy {:.2}",
            metrics.created,
            metrics.validated,
            metrics.corrected,
            metrics.expired,
            metrics.accuracy()
        );
        info!(
            "Reconciliations: {} total, {} replays, latency {:.1}ms",
            self.sync.reconciliation().stats().total,
            self.sync.reconciliation().stats().replays,
            self.sync.latency().unwrap_or(0.0)
        );
    }
}

async fn send<S>(sink: &mut S, message: &Message) -> Result<(), ClientError>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let text = message.encode()?;
    sink.send(WsMessage::Text(text.into())).await?;
    Ok(())
}
