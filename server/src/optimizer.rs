//! Adaptive network optimizer.
//!
//! Tracks per-connection quality samples (RTT, delivery outcomes, outbound
//! bytes), turns them into a 0-100 score and a category, and derives three
//! kinds of advice from them: the broadcast tick rate, per-message priority
//! and drop flags, and a bandwidth regime. The optimizer never sends or drops
//! anything itself; the server loop acts on its answers.
//!
//! Connections without recent samples report a neutral quality (score 50,
//! fair) instead of failing.

use crate::config::{NetworkConfig, MAX_TICK_RATE, MIN_TICK_RATE};
use crate::ConnectionId;
use serde::Serialize;
use shared::{Message, MessageKind};
use std::collections::{HashMap, VecDeque};

const RTT_WINDOW: usize = 10;
const OUTCOME_WINDOW: usize = 100;
const BANDWIDTH_WINDOW_MS: u64 = 1000;
/// Samples older than this no longer describe the connection.
const STALE_AFTER_MS: u64 = 10_000;

const NEUTRAL_SCORE: f32 = 50.0;
/// Largest relative tick-rate change per adjustment.
const MAX_RATE_STEP: f32 = 0.2;
/// Bandwidth usage is judged against this share of the configured cap.
const BANDWIDTH_TARGET_SHARE: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityCategory {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl QualityCategory {
    pub fn from_score(score: f32) -> Self {
        if score >= 90.0 {
            QualityCategory::Excellent
        } else if score >= 75.0 {
            QualityCategory::Good
        } else if score >= 50.0 {
            QualityCategory::Fair
        } else if score >= 25.0 {
            QualityCategory::Poor
        } else {
            QualityCategory::Critical
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionQuality {
    /// Mean RTT in ms.
    pub latency: f32,
    /// Mean absolute difference between successive RTTs in ms.
    pub jitter: f32,
    /// Share of outbound frames dropped, in [0, 1].
    pub packet_loss: f32,
    /// Outbound throughput estimate in kbps, 0 when unknown.
    pub bandwidth: f32,
    pub score: f32,
    pub last_updated: u64,
}

impl ConnectionQuality {
    pub fn neutral(now: u64) -> Self {
        Self {
            latency: 0.0,
            jitter: 0.0,
            packet_loss: 0.0,
            bandwidth: 0.0,
            score: NEUTRAL_SCORE,
            last_updated: now,
        }
    }

    pub fn category(&self) -> QualityCategory {
        QualityCategory::from_score(self.score)
    }
}

/// Starts at 100 and loses points for latency above 50ms, jitter above 10ms,
/// packet loss and a measured throughput below 500 kbps. Always in [0, 100].
pub fn score_connection(latency: f32, jitter: f32, packet_loss: f32, bandwidth: f32) -> f32 {
    let finite_or_zero = |value: f32| if value.is_finite() { value.max(0.0) } else { 0.0 };
    let latency = finite_or_zero(latency);
    let jitter = finite_or_zero(jitter);
    let packet_loss = finite_or_zero(packet_loss).min(1.0);
    let bandwidth = finite_or_zero(bandwidth);

    let latency_penalty = ((latency - 50.0) / 5.0).clamp(0.0, 40.0);
    let jitter_penalty = ((jitter - 10.0) / 2.0).clamp(0.0, 20.0);
    let loss_penalty = (packet_loss * 200.0).min(30.0);
    let bandwidth_penalty = if bandwidth > 0.0 && bandwidth < 500.0 {
        10.0 * (1.0 - bandwidth / 500.0)
    } else {
        0.0
    };

    (100.0 - latency_penalty - jitter_penalty - loss_penalty - bandwidth_penalty).clamp(0.0, 100.0)
}

#[derive(Debug, Default)]
struct ConnectionSamples {
    rtts: VecDeque<f32>,
    /// Delivery outcome per outbound frame, true when it was queued.
    outcomes: VecDeque<bool>,
    /// `(sent_at, bytes)` for frames inside the bandwidth window.
    sent: VecDeque<(u64, usize)>,
    last_sample: Option<u64>,
}

impl ConnectionSamples {
    fn record_rtt(&mut self, rtt_ms: f32, now: u64) {
        if !rtt_ms.is_finite() || rtt_ms < 0.0 {
            return;
        }
        self.rtts.push_back(rtt_ms);
        while self.rtts.len() > RTT_WINDOW {
            self.rtts.pop_front();
        }
        self.last_sample = Some(now);
    }

    fn record_send(&mut self, bytes: usize, delivered: bool, now: u64) {
        self.outcomes.push_back(delivered);
        while self.outcomes.len() > OUTCOME_WINDOW {
            self.outcomes.pop_front();
        }
        if delivered {
            self.sent.push_back((now, bytes));
        }
        self.prune_sent(now);
        self.last_sample = Some(now);
    }

    fn prune_sent(&mut self, now: u64) {
        while let Some(&(at, _)) = self.sent.front() {
            if now.saturating_sub(at) >= BANDWIDTH_WINDOW_MS {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }

    fn latency(&self) -> f32 {
        if self.rtts.is_empty() {
            return 0.0;
        }
        self.rtts.iter().sum::<f32>() / self.rtts.len() as f32
    }

    fn jitter(&self) -> f32 {
        if self.rtts.len() < 2 {
            return 0.0;
        }
        let total: f32 = self
            .rtts
            .iter()
            .zip(self.rtts.iter().skip(1))
            .map(|(a, b)| (b - a).abs())
            .sum();
        total / (self.rtts.len() - 1) as f32
    }

    fn packet_loss(&self) -> f32 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let dropped = self.outcomes.iter().filter(|delivered| !**delivered).count();
        dropped as f32 / self.outcomes.len() as f32
    }

    fn bandwidth_kbps(&self, now: u64) -> f32 {
        let bytes: usize = self
            .sent
            .iter()
            .filter(|(at, _)| now.saturating_sub(*at) < BANDWIDTH_WINDOW_MS)
            .map(|(_, bytes)| bytes)
            .sum();
        (bytes as f32 * 8.0) / BANDWIDTH_WINDOW_MS as f32
    }

    fn quality(&self, now: u64) -> ConnectionQuality {
        let Some(last_sample) = self.last_sample else {
            return ConnectionQuality::neutral(now);
        };
        if now.saturating_sub(last_sample) > STALE_AFTER_MS {
            return ConnectionQuality::neutral(now);
        }

        let latency = self.latency();
        let jitter = self.jitter();
        let packet_loss = self.packet_loss();
        let bandwidth = self.bandwidth_kbps(now);
        ConnectionQuality {
            latency,
            jitter,
            packet_loss,
            bandwidth,
            score: score_connection(latency, jitter, packet_loss, bandwidth),
            last_updated: last_sample,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityClass {
    pub fn score(self) -> f32 {
        match self {
            PriorityClass::Critical => 95.0,
            PriorityClass::High => 80.0,
            PriorityClass::Medium => 60.0,
            PriorityClass::Low => 30.0,
        }
    }
}

/// Static delivery policy of one message kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessagePolicy {
    pub class: PriorityClass,
    pub max_delay_ms: u64,
    /// Connections scoring below this drop the message. `None` never drops.
    pub drop_below: Option<f32>,
}

impl MessagePolicy {
    const fn new(class: PriorityClass, max_delay_ms: u64, drop_below: Option<f32>) -> Self {
        Self {
            class,
            max_delay_ms,
            drop_below,
        }
    }

    pub fn for_kind(kind: MessageKind) -> Self {
        use PriorityClass::*;
        match kind {
            MessageKind::RollbackCorrection => Self::new(Critical, 16, None),
            MessageKind::GameState => Self::new(Critical, 100, None),
            MessageKind::InputAcknowledgment | MessageKind::InputRejected => {
                Self::new(High, 33, None)
            }
            MessageKind::DeltaGameState => Self::new(High, 50, Some(10.0)),
            MessageKind::Ping | MessageKind::Pong => Self::new(Medium, 100, Some(20.0)),
            MessageKind::PerformanceReport => Self::new(Low, 1000, Some(40.0)),
            MessageKind::Batch | MessageKind::Error => Self::new(High, 50, None),
            MessageKind::JoinGame | MessageKind::PredictiveInput | MessageKind::RequestStateSync => {
                Self::new(High, 33, None)
            }
        }
    }

    /// Critical messages and anything with a delay budget of one 30 Hz frame
    /// or less skip batching.
    pub fn is_urgent(&self) -> bool {
        self.class == PriorityClass::Critical || self.max_delay_ms <= 33
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub message: Message,
    pub enqueued_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrioritizedMessage {
    pub message: Message,
    pub score: f32,
    pub should_drop: bool,
}

/// Aggregate view of all connections used by the tick-rate controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
    pub average_latency: f32,
    /// Total outbound usage in kbps.
    pub bandwidth_usage: f32,
    pub average_score: f32,
    pub category: QualityCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthRegime {
    Critical,
    High,
    Nominal,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthAdvice {
    pub regime: BandwidthRegime,
    pub usage_ratio: f32,
    pub compression_multiplier: f32,
    pub frequency_multiplier: f32,
    pub actions: Vec<String>,
}

/// Per-instance optimizer state keyed by connection id.
pub struct NetworkOptimizer {
    config: NetworkConfig,
    base_tick_rate: f32,
    connections: HashMap<ConnectionId, ConnectionSamples>,
}

impl NetworkOptimizer {
    pub fn new(config: NetworkConfig, base_tick_rate: f32) -> Self {
        Self {
            config,
            base_tick_rate,
            connections: HashMap::new(),
        }
    }

    pub fn register(&mut self, connection_id: ConnectionId) {
        self.connections.entry(connection_id).or_default();
    }

    pub fn remove(&mut self, connection_id: ConnectionId) {
        self.connections.remove(&connection_id);
    }

    pub fn record_rtt(&mut self, connection_id: ConnectionId, rtt_ms: f32, now: u64) {
        self.connections
            .entry(connection_id)
            .or_default()
            .record_rtt(rtt_ms, now);
    }

    /// Records one outbound frame. `delivered` is false when the frame could
    /// not be queued for the peer.
    pub fn record_send(&mut self, connection_id: ConnectionId, bytes: usize, delivered: bool, now: u64) {
        self.connections
            .entry(connection_id)
            .or_default()
            .record_send(bytes, delivered, now);
    }

    pub fn quality(&self, connection_id: ConnectionId, now: u64) -> ConnectionQuality {
        self.connections
            .get(&connection_id)
            .map(|samples| samples.quality(now))
            .unwrap_or_else(|| ConnectionQuality::neutral(now))
    }

    pub fn qualities(&self, now: u64) -> Vec<(ConnectionId, ConnectionQuality)> {
        let mut qualities: Vec<_> = self
            .connections
            .iter()
            .map(|(id, samples)| (*id, samples.quality(now)))
            .collect();
        qualities.sort_by_key(|(id, _)| *id);
        qualities
    }

    pub fn network_snapshot(&self, now: u64) -> NetworkSnapshot {
        let qualities: Vec<ConnectionQuality> = self
            .connections
            .values()
            .map(|samples| samples.quality(now))
            .collect();
        if qualities.is_empty() {
            return NetworkSnapshot {
                average_latency: 0.0,
                bandwidth_usage: 0.0,
                average_score: NEUTRAL_SCORE,
                category: QualityCategory::from_score(NEUTRAL_SCORE),
            };
        }

        let count = qualities.len() as f32;
        let average_score = qualities.iter().map(|q| q.score).sum::<f32>() / count;
        NetworkSnapshot {
            average_latency: qualities.iter().map(|q| q.latency).sum::<f32>() / count,
            bandwidth_usage: qualities.iter().map(|q| q.bandwidth).sum(),
            average_score,
            category: QualityCategory::from_score(average_score),
        }
    }

    /// One step of the tick-rate control loop. `current` must be the value
    /// returned by the previous call; the result differs from it by at most
    /// 20% and lies within [20, 60] Hz.
    pub fn calculate_optimal_tick_rate(
        &self,
        player_count: usize,
        snapshot: &NetworkSnapshot,
        current: f32,
    ) -> f32 {
        let mut rate = self.base_tick_rate;

        if player_count > 16 {
            rate *= 0.8;
        } else if player_count < 4 {
            rate *= 1.1;
        }

        rate *= match snapshot.category {
            QualityCategory::Poor | QualityCategory::Critical => 0.6,
            QualityCategory::Fair => 0.8,
            QualityCategory::Good => 1.0,
            QualityCategory::Excellent => 1.2,
        };

        if snapshot.bandwidth_usage > BANDWIDTH_TARGET_SHARE * self.config.bandwidth_cap_kbps {
            rate *= 0.7;
        }
        if snapshot.average_latency > self.config.latency_threshold_ms {
            rate *= 0.8;
        }

        let target = rate.clamp(MIN_TICK_RATE, MAX_TICK_RATE);
        let current = if current.is_finite() && current > 0.0 {
            current
        } else {
            target
        };
        let max_step = current * MAX_RATE_STEP;
        target
            .clamp(current - max_step, current + max_step)
            .clamp(MIN_TICK_RATE, MAX_TICK_RATE)
    }

    /// Scores messages bound for one connection, highest first. Messages
    /// older than their kind's delay budget score half. Dropping flagged
    /// messages is up to the caller.
    pub fn prioritize_messages(
        &self,
        messages: &[QueuedMessage],
        connection_id: ConnectionId,
        now: u64,
    ) -> Vec<PrioritizedMessage> {
        let quality = self.quality(connection_id, now);

        let mut prioritized: Vec<PrioritizedMessage> = messages
            .iter()
            .map(|queued| {
                let policy = MessagePolicy::for_kind(queued.message.kind());
                let age = now.saturating_sub(queued.enqueued_at);
                let mut score = policy.class.score();
                if age > policy.max_delay_ms {
                    score /= 2.0;
                }
                PrioritizedMessage {
                    message: queued.message.clone(),
                    score,
                    should_drop: policy
                        .drop_below
                        .is_some_and(|threshold| quality.score < threshold),
                }
            })
            .collect();

        prioritized.sort_by(|a, b| b.score.total_cmp(&a.score));
        prioritized
    }

    /// Advice only: classifies `usage_kbps` against 80% of the cap.
    pub fn optimize_bandwidth(&self, usage_kbps: f32) -> BandwidthAdvice {
        let target = BANDWIDTH_TARGET_SHARE * self.config.bandwidth_cap_kbps;
        let usage_ratio = if target > 0.0 && usage_kbps.is_finite() {
            usage_kbps.max(0.0) / target
        } else {
            0.0
        };

        let (regime, compression_multiplier, frequency_multiplier, actions): (_, _, _, &[&str]) =
            if usage_ratio > 1.2 {
                (
                    BandwidthRegime::Critical,
                    1.5,
                    0.5,
                    &[
                        "increase delta compression",
                        "halve update frequency",
                        "drop low-priority messages",
                    ],
                )
            } else if usage_ratio > 1.0 {
                (
                    BandwidthRegime::High,
                    1.2,
                    0.8,
                    &["increase delta compression", "reduce update frequency"],
                )
            } else if usage_ratio < 0.6 {
                (
                    BandwidthRegime::Low,
                    0.8,
                    1.2,
                    &["relax compression", "raise update frequency"],
                )
            } else {
                (BandwidthRegime::Nominal, 1.0, 1.0, &[])
            };

        BandwidthAdvice {
            regime,
            usage_ratio,
            compression_multiplier,
            frequency_multiplier,
            actions: actions.iter().map(|action| action.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{DeltaState, PerformanceReport, Ping, RollbackCorrection, CorrectionPriority};

    fn optimizer() -> NetworkOptimizer {
        NetworkOptimizer::new(NetworkConfig::default(), 50.0)
    }

    fn snapshot(category: QualityCategory) -> NetworkSnapshot {
        NetworkSnapshot {
            average_latency: 20.0,
            bandwidth_usage: 100.0,
            average_score: 80.0,
            category,
        }
    }

    #[test]
    fn test_score_bands() {
        assert_eq!(QualityCategory::from_score(95.0), QualityCategory::Excellent);
        assert_eq!(QualityCategory::from_score(75.0), QualityCategory::Good);
        assert_eq!(QualityCategory::from_score(50.0), QualityCategory::Fair);
        assert_eq!(QualityCategory::from_score(25.0), QualityCategory::Poor);
        assert_eq!(QualityCategory::from_score(24.9), QualityCategory::Critical);
    }

    #[test]
    fn test_score_connection_penalties() {
        assert_approx_eq!(score_connection(20.0, 5.0, 0.0, 0.0), 100.0, 0.001);
        // 100ms latency: (100 - 50) / 5 = 10 points
        assert_approx_eq!(score_connection(100.0, 0.0, 0.0, 0.0), 90.0, 0.001);
        // every penalty capped
        assert_approx_eq!(score_connection(1000.0, 500.0, 1.0, 1.0), 0.0, 0.1);
        // 1% loss costs 2 points, 250 kbps costs 5
        assert_approx_eq!(score_connection(0.0, 0.0, 0.01, 250.0), 93.0, 0.001);
        assert_approx_eq!(score_connection(f32::NAN, 0.0, 0.0, 0.0), 100.0, 0.001);
    }

    #[test]
    fn test_unknown_connection_is_neutral() {
        let optimizer = optimizer();
        let quality = optimizer.quality(7, 1_000);
        assert_eq!(quality.score, 50.0);
        assert_eq!(quality.category(), QualityCategory::Fair);
    }

    #[test]
    fn test_stale_samples_fall_back_to_neutral() {
        let mut optimizer = optimizer();
        optimizer.record_rtt(1, 300.0, 0);
        assert_approx_eq!(optimizer.quality(1, 1_000).score, 60.0, 0.001);
        assert_eq!(optimizer.quality(1, 20_000).score, 50.0);
    }

    #[test]
    fn test_latency_and_jitter_from_rtts() {
        let mut optimizer = optimizer();
        for (i, rtt) in [40.0, 60.0, 40.0, 60.0].into_iter().enumerate() {
            optimizer.record_rtt(1, rtt, i as u64);
        }
        let quality = optimizer.quality(1, 10);
        assert_approx_eq!(quality.latency, 50.0, 0.001);
        assert_approx_eq!(quality.jitter, 20.0, 0.001);
        assert_approx_eq!(quality.score, 95.0, 0.001);
    }

    #[test]
    fn test_rtt_window_is_bounded() {
        let mut optimizer = optimizer();
        optimizer.record_rtt(1, 1000.0, 0);
        for i in 0..RTT_WINDOW {
            optimizer.record_rtt(1, 10.0, i as u64);
        }
        assert_approx_eq!(optimizer.quality(1, 20).latency, 10.0, 0.001);
    }

    #[test]
    fn test_packet_loss_and_bandwidth() {
        let mut optimizer = optimizer();
        for i in 0..10 {
            optimizer.record_send(1, 1_000, i != 0, 100 + i);
        }
        let quality = optimizer.quality(1, 200);
        assert_approx_eq!(quality.packet_loss, 0.1, 0.001);
        // 9 delivered kB in the last second
        assert_approx_eq!(quality.bandwidth, 72.0, 0.001);
    }

    #[test]
    fn test_tick_rate_stays_bounded_and_smooth() {
        let optimizer = optimizer();
        let poor = snapshot(QualityCategory::Critical);
        let mut current = 60.0;
        for _ in 0..20 {
            let next = optimizer.calculate_optimal_tick_rate(32, &poor, current);
            assert!((MIN_TICK_RATE..=MAX_TICK_RATE).contains(&next));
            assert!((next - current).abs() <= current * 0.2 + 0.001);
            current = next;
        }
        // 50 * 0.8 * 0.6
        assert_approx_eq!(current, 24.0, 0.001);
    }

    #[test]
    fn test_tick_rate_rises_for_small_excellent_games() {
        let optimizer = optimizer();
        let excellent = snapshot(QualityCategory::Excellent);
        // 50 * 1.1 * 1.2 = 66, clamped to 60, reachable in one step from 50.
        let next = optimizer.calculate_optimal_tick_rate(2, &excellent, 50.0);
        assert_approx_eq!(next, 60.0, 0.001);
    }

    #[test]
    fn test_tick_rate_pressure_factors() {
        let optimizer = optimizer();
        let mut loaded = snapshot(QualityCategory::Good);
        loaded.bandwidth_usage = 900.0;
        loaded.average_latency = 200.0;
        // 50 * 0.7 * 0.8 = 28
        let next = optimizer.calculate_optimal_tick_rate(8, &loaded, 30.0);
        assert_approx_eq!(next, 28.0, 0.001);
    }

    #[test]
    fn test_tick_rate_without_previous_value() {
        let optimizer = optimizer();
        let next = optimizer.calculate_optimal_tick_rate(8, &snapshot(QualityCategory::Good), f32::NAN);
        assert_approx_eq!(next, 50.0, 0.001);
    }

    #[test]
    fn test_prioritize_orders_and_ages() {
        let optimizer = optimizer();
        let rollback = Message::RollbackCorrection(RollbackCorrection {
            correction_id: "c1".to_string(),
            affected_entities: vec![],
            rollback_to_sequence: 1,
            current_sequence: 2,
            corrections: vec![],
            replay_inputs: vec![],
            priority: CorrectionPriority::High,
        });
        let ping = Message::Ping(Ping { timestamp: 0 });
        let report = Message::PerformanceReport(PerformanceReport {
            player_id: "p1".to_string(),
            fps: 60.0,
            latency: 10.0,
            prediction_accuracy: 1.0,
            reconciliations: 0,
        });

        let queued = vec![
            QueuedMessage { message: report, enqueued_at: 1_000 },
            QueuedMessage { message: ping, enqueued_at: 1_000 },
            QueuedMessage { message: rollback, enqueued_at: 900 },
        ];
        let ordered = optimizer.prioritize_messages(&queued, 1, 1_050);

        let scores: Vec<f32> = ordered.iter().map(|m| m.score).collect();
        // rollback is 150ms old against a 16ms budget: 95 / 2
        assert_eq!(scores, vec![60.0, 47.5, 30.0]);
        assert_eq!(ordered[0].message.kind(), MessageKind::Ping);
        // neutral quality 50 only drops nothing below 40
        assert!(ordered.iter().all(|m| !m.should_drop));
    }

    #[test]
    fn test_poor_connection_flags_drops() {
        let mut optimizer = optimizer();
        optimizer.record_rtt(1, 400.0, 0);
        optimizer.record_rtt(1, 100.0, 1);
        for i in 0..8 {
            optimizer.record_send(1, 10_000, i != 0, 2);
        }
        // 100 - 40 (latency) - 20 (jitter) - 25 (1 in 8 lost)
        let quality = optimizer.quality(1, 2);
        assert_approx_eq!(quality.score, 15.0, 0.001);

        let delta = Message::DeltaGameState(DeltaState {
            base_sequence: 1,
            delta_sequence: 2,
            timestamp: 0,
            phase: None,
            changed_players: vec![],
            changed_entities: vec![],
            new_arrows: vec![],
            removed_entity_ids: vec![],
            removed_player_ids: vec![],
            checksum: 0,
            compression_ratio: 1.0,
        });
        let ping = Message::Ping(Ping { timestamp: 0 });
        let queued = vec![
            QueuedMessage { message: delta, enqueued_at: 2 },
            QueuedMessage { message: ping, enqueued_at: 2 },
        ];
        let ordered = optimizer.prioritize_messages(&queued, 1, 2);
        assert!(!ordered[0].should_drop);
        assert!(ordered[1].should_drop);
    }

    #[test]
    fn test_bandwidth_regimes() {
        let optimizer = optimizer();
        // target is 800 kbps
        assert_eq!(optimizer.optimize_bandwidth(1_000.0).regime, BandwidthRegime::Critical);
        assert_eq!(optimizer.optimize_bandwidth(900.0).regime, BandwidthRegime::High);
        assert_eq!(optimizer.optimize_bandwidth(600.0).regime, BandwidthRegime::Nominal);

        let low = optimizer.optimize_bandwidth(100.0);
        assert_eq!(low.regime, BandwidthRegime::Low);
        assert_eq!(low.frequency_multiplier, 1.2);
        assert!(!low.actions.is_empty());

        let critical = optimizer.optimize_bandwidth(2_000.0);
        assert_eq!(critical.compression_multiplier, 1.5);
        assert_eq!(critical.frequency_multiplier, 0.5);
    }

    #[test]
    fn test_network_snapshot_defaults_and_aggregates() {
        let mut optimizer = optimizer();
        let empty = optimizer.network_snapshot(0);
        assert_eq!(empty.category, QualityCategory::Fair);

        optimizer.record_rtt(1, 20.0, 0);
        optimizer.record_rtt(2, 40.0, 0);
        let snapshot = optimizer.network_snapshot(10);
        assert_approx_eq!(snapshot.average_latency, 30.0, 0.001);
        assert_eq!(snapshot.category, QualityCategory::Excellent);

        optimizer.remove(1);
        optimizer.remove(2);
        assert!(optimizer.is_empty());
    }

    #[test]
    fn test_urgent_policies() {
        assert!(MessagePolicy::for_kind(MessageKind::RollbackCorrection).is_urgent());
        assert!(MessagePolicy::for_kind(MessageKind::GameState).is_urgent());
        assert!(MessagePolicy::for_kind(MessageKind::InputAcknowledgment).is_urgent());
        assert!(!MessagePolicy::for_kind(MessageKind::DeltaGameState).is_urgent());
        assert!(!MessagePolicy::for_kind(MessageKind::PerformanceReport).is_urgent());
    }
}
