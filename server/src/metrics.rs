//! Performance metrics and threshold alerts.
//!
//! The monitor keeps the latest server, game, network and per-client figures,
//! evaluates every recorded value against its `{warning, critical}` pair and
//! raises or clears alerts as values cross them. Resolved alerts move into a
//! bounded history.

use crate::client_manager::InputStats;
use crate::error::MetricsError;
use crate::optimizer::{ConnectionQuality, NetworkSnapshot, QualityCategory};
use crate::ConnectionId;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use shared::{CompressionTrend, GamePhase, PerformanceReport};
use std::collections::{BTreeMap, VecDeque};

pub const ALERT_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricName {
    TickRate,
    TickDuration,
    AverageLatency,
    PacketLoss,
    ConnectionQuality,
    PredictionAccuracy,
    ClientFps,
}

impl MetricName {
    pub const ALL: [MetricName; 7] = [
        MetricName::TickRate,
        MetricName::TickDuration,
        MetricName::AverageLatency,
        MetricName::PacketLoss,
        MetricName::ConnectionQuality,
        MetricName::PredictionAccuracy,
        MetricName::ClientFps,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricName::TickRate => "tickRate",
            MetricName::TickDuration => "tickDuration",
            MetricName::AverageLatency => "averageLatency",
            MetricName::PacketLoss => "packetLoss",
            MetricName::ConnectionQuality => "connectionQuality",
            MetricName::PredictionAccuracy => "predictionAccuracy",
            MetricName::ClientFps => "clientFps",
        }
    }

    pub fn parse(name: &str) -> Option<MetricName> {
        Self::ALL.into_iter().find(|metric| metric.as_str() == name)
    }

    pub fn higher_is_better(self) -> bool {
        matches!(
            self,
            MetricName::TickRate
                | MetricName::ConnectionQuality
                | MetricName::PredictionAccuracy
                | MetricName::ClientFps
        )
    }

    fn default_threshold(self) -> Threshold {
        let (warning, critical) = match self {
            MetricName::TickRate => (30.0, 20.0),
            MetricName::TickDuration => (12.0, 16.0),
            MetricName::AverageLatency => (100.0, 200.0),
            MetricName::PacketLoss => (0.02, 0.05),
            MetricName::ConnectionQuality => (60.0, 30.0),
            MetricName::PredictionAccuracy => (0.8, 0.6),
            MetricName::ClientFps => (45.0, 30.0),
        };
        Threshold { warning, critical }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    fn validate(&self, metric: MetricName) -> Result<(), MetricsError> {
        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err(MetricsError::NotFinite {
                metric: metric.as_str().to_string(),
            });
        }
        let (ordered, expected) = if metric.higher_is_better() {
            (self.warning > self.critical, "greater")
        } else {
            (self.warning < self.critical, "less")
        };
        if ordered {
            Ok(())
        } else {
            Err(MetricsError::InvalidOrdering {
                metric: metric.as_str().to_string(),
                warning: self.warning,
                critical: self.critical,
                expected,
            })
        }
    }

    fn level(&self, metric: MetricName, value: f64) -> Option<AlertLevel> {
        let (critical, warning) = if metric.higher_is_better() {
            (value <= self.critical, value <= self.warning)
        } else {
            (value >= self.critical, value >= self.warning)
        };
        if critical {
            Some(AlertLevel::Critical)
        } else if warning {
            Some(AlertLevel::Warning)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub metric: MetricName,
    pub level: AlertLevel,
    pub value: f64,
    pub threshold: f64,
    pub raised_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<u64>,
}

/// What a recorded value did to the alert state of its metric.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertChange {
    Raised(Alert),
    Cleared(Alert),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub tick_rate: f32,
    pub tick_duration_ms: f32,
    pub ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStats {
    pub phase: GamePhase,
    pub sequence: u32,
    pub players: usize,
    pub entities: usize,
    pub batch_delay_ms: f32,
    pub compression_average: Option<f32>,
    pub compression_trend: CompressionTrend,
    pub inputs: BTreeMap<String, InputStats>,
    pub rate_limited: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub connection_id: ConnectionId,
    pub category: QualityCategory,
    #[serde(flatten)]
    pub quality: ConnectionQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    pub fps: f32,
    pub latency: f32,
    pub prediction_accuracy: f32,
    pub reconciliations: u32,
    pub reported_at: u64,
}

/// Everything `GET /metrics` returns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub generated_at: u64,
    pub uptime_ms: u64,
    pub server: ServerStats,
    pub game: Option<GameStats>,
    pub network: Option<NetworkSnapshot>,
    pub connections: Vec<ConnectionReport>,
    pub clients: BTreeMap<String, ClientStats>,
    pub thresholds: BTreeMap<MetricName, Threshold>,
    pub active_alerts: Vec<Alert>,
    pub recent_alerts: Vec<Alert>,
}

pub struct PerformanceMonitor {
    started_at: u64,
    thresholds: BTreeMap<MetricName, Threshold>,
    latest: BTreeMap<MetricName, f64>,
    active: BTreeMap<MetricName, Alert>,
    history: VecDeque<Alert>,
    server: ServerStats,
    game: Option<GameStats>,
    network: Option<NetworkSnapshot>,
    connections: Vec<ConnectionReport>,
    clients: BTreeMap<String, ClientStats>,
}

impl PerformanceMonitor {
    pub fn new(now: u64) -> Self {
        Self {
            started_at: now,
            thresholds: MetricName::ALL
                .into_iter()
                .map(|metric| (metric, metric.default_threshold()))
                .collect(),
            latest: BTreeMap::new(),
            active: BTreeMap::new(),
            history: VecDeque::with_capacity(ALERT_HISTORY),
            server: ServerStats::default(),
            game: None,
            network: None,
            connections: Vec::new(),
            clients: BTreeMap::new(),
        }
    }

    /// Records one value and re-evaluates its alert.
    pub fn record(&mut self, metric: MetricName, value: f64, now: u64) -> Option<AlertChange> {
        if !value.is_finite() {
            return None;
        }
        self.latest.insert(metric, value);
        self.evaluate(metric, value, now)
    }

    pub fn record_server_tick(&mut self, tick_rate: f32, tick_duration_ms: f32, now: u64) {
        self.server.tick_rate = tick_rate;
        self.server.tick_duration_ms = tick_duration_ms;
        self.server.ticks += 1;
        self.record(MetricName::TickRate, f64::from(tick_rate), now);
        self.record(MetricName::TickDuration, f64::from(tick_duration_ms), now);
    }

    pub fn record_game(&mut self, stats: GameStats) {
        self.game = Some(stats);
    }

    /// Network figures are only evaluated while at least one connection
    /// reports samples.
    pub fn record_network(
        &mut self,
        snapshot: NetworkSnapshot,
        qualities: Vec<(ConnectionId, ConnectionQuality)>,
        now: u64,
    ) {
        self.network = Some(snapshot);
        self.connections = qualities
            .into_iter()
            .map(|(connection_id, quality)| ConnectionReport {
                connection_id,
                category: quality.category(),
                quality,
            })
            .collect();
        if self.connections.is_empty() {
            return;
        }

        let count = self.connections.len() as f64;
        let packet_loss = self
            .connections
            .iter()
            .map(|c| f64::from(c.quality.packet_loss))
            .sum::<f64>()
            / count;
        self.record(MetricName::AverageLatency, f64::from(snapshot.average_latency), now);
        self.record(MetricName::PacketLoss, packet_loss, now);
        self.record(MetricName::ConnectionQuality, f64::from(snapshot.average_score), now);
    }

    /// Stores a client's self-reported figures; accuracy and fps are
    /// evaluated as the mean over all reporting clients.
    pub fn record_client_report(&mut self, report: &PerformanceReport, now: u64) {
        self.clients.insert(
            report.player_id.clone(),
            ClientStats {
                fps: report.fps,
                latency: report.latency,
                prediction_accuracy: report.prediction_accuracy,
                reconciliations: report.reconciliations,
                reported_at: now,
            },
        );

        let count = self.clients.len() as f64;
        let accuracy = self
            .clients
            .values()
            .map(|c| f64::from(c.prediction_accuracy))
            .sum::<f64>()
            / count;
        let fps = self.clients.values().map(|c| f64::from(c.fps)).sum::<f64>() / count;
        self.record(MetricName::PredictionAccuracy, accuracy, now);
        self.record(MetricName::ClientFps, fps, now);
    }

    pub fn remove_client(&mut self, player_id: &str) {
        self.clients.remove(player_id);
    }

    pub fn thresholds(&self) -> &BTreeMap<MetricName, Threshold> {
        &self.thresholds
    }

    /// Replaces thresholds for the named metrics. Either every pair is valid
    /// and all are applied, or nothing changes.
    pub fn update_thresholds(
        &mut self,
        updates: &BTreeMap<String, Threshold>,
        now: u64,
    ) -> Result<(), MetricsError> {
        let mut parsed = Vec::with_capacity(updates.len());
        for (name, threshold) in updates {
            let metric =
                MetricName::parse(name).ok_or_else(|| MetricsError::UnknownMetric(name.clone()))?;
            threshold.validate(metric)?;
            parsed.push((metric, *threshold));
        }

        for (metric, threshold) in parsed {
            info!(
                "Threshold for {} set to warning {} / critical {}",
                metric.as_str(),
                threshold.warning,
                threshold.critical
            );
            self.thresholds.insert(metric, threshold);
            if let Some(value) = self.latest.get(&metric).copied() {
                self.evaluate(metric, value, now);
            }
        }
        Ok(())
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active.values().cloned().collect()
    }

    pub fn alert_history(&self) -> impl Iterator<Item = &Alert> {
        self.history.iter()
    }

    pub fn latest(&self, metric: MetricName) -> Option<f64> {
        self.latest.get(&metric).copied()
    }

    pub fn report(&self, now: u64) -> MetricsReport {
        MetricsReport {
            generated_at: now,
            uptime_ms: now.saturating_sub(self.started_at),
            server: self.server.clone(),
            game: self.game.clone(),
            network: self.network,
            connections: self.connections.clone(),
            clients: self.clients.clone(),
            thresholds: self.thresholds.clone(),
            active_alerts: self.active_alerts(),
            recent_alerts: self.history.iter().cloned().collect(),
        }
    }

    fn evaluate(&mut self, metric: MetricName, value: f64, now: u64) -> Option<AlertChange> {
        let threshold = self.thresholds.get(&metric).copied()?;
        let level = threshold.level(metric, value);
        let current = self.active.get(&metric).map(|alert| alert.level);
        if level == current {
            return None;
        }

        let resolved = self.active.remove(&metric).map(|mut alert| {
            alert.cleared_at = Some(now);
            self.push_history(alert.clone());
            alert
        });

        match level {
            Some(level) => {
                let alert = Alert {
                    metric,
                    level,
                    value,
                    threshold: match level {
                        AlertLevel::Warning => threshold.warning,
                        AlertLevel::Critical => threshold.critical,
                    },
                    raised_at: now,
                    cleared_at: None,
                };
                warn!(
                    "{:?} alert on {}: value {:.3} crossed {:.3}",
                    level,
                    metric.as_str(),
                    value,
                    alert.threshold
                );
                self.active.insert(metric, alert.clone());
                Some(AlertChange::Raised(alert))
            }
            None => {
                info!("Alert on {} cleared at {:.3}", metric.as_str(), value);
                resolved.map(AlertChange::Cleared)
            }
        }
    }

    fn push_history(&mut self, alert: Alert) {
        if self.history.len() == ALERT_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(name: &str, warning: f64, critical: f64) -> BTreeMap<String, Threshold> {
        BTreeMap::from([(name.to_string(), Threshold { warning, critical })])
    }

    #[test]
    fn test_default_thresholds_are_valid() {
        let monitor = PerformanceMonitor::new(0);
        for (metric, threshold) in monitor.thresholds() {
            assert!(threshold.validate(*metric).is_ok(), "{:?}", metric);
        }
        assert_eq!(monitor.thresholds().len(), MetricName::ALL.len());
    }

    #[test]
    fn test_metric_names_round_trip() {
        for metric in MetricName::ALL {
            assert_eq!(MetricName::parse(metric.as_str()), Some(metric));
        }
        assert_eq!(MetricName::parse("cpu"), None);
    }

    #[test]
    fn test_lower_is_better_alerts() {
        let mut monitor = PerformanceMonitor::new(0);
        assert_eq!(monitor.record(MetricName::AverageLatency, 50.0, 1), None);

        match monitor.record(MetricName::AverageLatency, 150.0, 2) {
            Some(AlertChange::Raised(alert)) => {
                assert_eq!(alert.level, AlertLevel::Warning);
                assert_eq!(alert.threshold, 100.0);
            }
            other => panic!("expected warning, got {:?}", other),
        }
        // same level again is not a new alert
        assert_eq!(monitor.record(MetricName::AverageLatency, 160.0, 3), None);

        match monitor.record(MetricName::AverageLatency, 250.0, 4) {
            Some(AlertChange::Raised(alert)) => assert_eq!(alert.level, AlertLevel::Critical),
            other => panic!("expected critical, got {:?}", other),
        }
        assert_eq!(monitor.alert_history().count(), 1);

        match monitor.record(MetricName::AverageLatency, 20.0, 5) {
            Some(AlertChange::Cleared(alert)) => assert_eq!(alert.cleared_at, Some(5)),
            other => panic!("expected clear, got {:?}", other),
        }
        assert!(monitor.active_alerts().is_empty());
        assert_eq!(monitor.alert_history().count(), 2);
    }

    #[test]
    fn test_higher_is_better_alerts() {
        let mut monitor = PerformanceMonitor::new(0);
        monitor.record_server_tick(25.0, 5.0, 1);
        let active = monitor.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].metric, MetricName::TickRate);
        assert_eq!(active[0].level, AlertLevel::Warning);

        monitor.record_server_tick(15.0, 20.0, 2);
        let levels: Vec<_> = monitor.active_alerts().iter().map(|a| a.level).collect();
        assert_eq!(levels, vec![AlertLevel::Critical, AlertLevel::Critical]);
    }

    #[test]
    fn test_update_thresholds_validates_ordering() {
        let mut monitor = PerformanceMonitor::new(0);
        let result = monitor.update_thresholds(&update("tickRate", 20.0, 30.0), 1);
        assert!(matches!(result, Err(MetricsError::InvalidOrdering { .. })));

        let result = monitor.update_thresholds(&update("averageLatency", 300.0, 200.0), 1);
        assert!(matches!(result, Err(MetricsError::InvalidOrdering { .. })));

        let result = monitor.update_thresholds(&update("bogus", 1.0, 2.0), 1);
        assert_eq!(result, Err(MetricsError::UnknownMetric("bogus".to_string())));

        let result = monitor.update_thresholds(&update("packetLoss", f64::NAN, 0.1), 1);
        assert!(matches!(result, Err(MetricsError::NotFinite { .. })));

        assert!(monitor
            .update_thresholds(&update("averageLatency", 50.0, 80.0), 1)
            .is_ok());
        assert_eq!(monitor.thresholds()[&MetricName::AverageLatency].warning, 50.0);
    }

    #[test]
    fn test_update_thresholds_is_all_or_nothing() {
        let mut monitor = PerformanceMonitor::new(0);
        let mut updates = update("averageLatency", 10.0, 20.0);
        updates.insert("clientFps".to_string(), Threshold { warning: 10.0, critical: 20.0 });

        assert!(monitor.update_thresholds(&updates, 1).is_err());
        assert_eq!(monitor.thresholds()[&MetricName::AverageLatency].warning, 100.0);
    }

    #[test]
    fn test_threshold_change_reevaluates_latest_value() {
        let mut monitor = PerformanceMonitor::new(0);
        monitor.record(MetricName::AverageLatency, 80.0, 1);
        assert!(monitor.active_alerts().is_empty());

        monitor
            .update_thresholds(&update("averageLatency", 50.0, 100.0), 2)
            .unwrap();
        assert_eq!(monitor.active_alerts().len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut monitor = PerformanceMonitor::new(0);
        for i in 0..150u64 {
            monitor.record(MetricName::PacketLoss, 0.1, i * 2);
            monitor.record(MetricName::PacketLoss, 0.0, i * 2 + 1);
        }
        assert_eq!(monitor.alert_history().count(), ALERT_HISTORY);
    }

    #[test]
    fn test_client_reports_average() {
        let mut monitor = PerformanceMonitor::new(0);
        let report = |id: &str, accuracy: f32| PerformanceReport {
            player_id: id.to_string(),
            fps: 60.0,
            latency: 20.0,
            prediction_accuracy: accuracy,
            reconciliations: 0,
        };
        monitor.record_client_report(&report("p1", 1.0), 1);
        monitor.record_client_report(&report("p2", 0.5), 2);
        assert_eq!(monitor.latest(MetricName::PredictionAccuracy), Some(0.75));
        assert_eq!(monitor.active_alerts()[0].level, AlertLevel::Warning);

        monitor.remove_client("p2");
        let report = monitor.report(10);
        assert_eq!(report.clients.len(), 1);
        assert_eq!(report.uptime_ms, 10);
    }

    #[test]
    fn test_report_serializes() {
        let mut monitor = PerformanceMonitor::new(0);
        monitor.record_server_tick(50.0, 2.0, 1);
        let json = serde_json::to_value(monitor.report(5)).unwrap();
        assert_eq!(json["server"]["ticks"], 1);
        assert_eq!(json["thresholds"]["tickRate"]["warning"], 30.0);
        assert!(json["activeAlerts"].as_array().unwrap().is_empty());
    }
}
