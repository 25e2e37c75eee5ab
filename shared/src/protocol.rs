//! Wire protocol.
//!
//! Every frame is a JSON object carrying a kebab-case `type` discriminator.
//! Decoding goes through [`DECODERS`], a fixed table from discriminator to
//! payload decoder; frames with a missing or unknown `type` are rejected
//! before any payload parsing happens.

use crate::delta::DeltaState;
use crate::state::{AuthoritativeState, Entity, EntityStatus, PlayerStatus};
use crate::{
    is_at_or_before, Direction, Position, ProtocolError, ValidationError, Velocity, INPUT_TIMESTAMP_TOLERANCE_MS,
    MAX_SMOOTHING_MS, MIN_SMOOTHING_MS,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputType {
    ArrowPlace,
    Move,
    Action,
    /// Any discriminator this build does not know. Decodes fine so the
    /// input can be rejected with a reason instead of dropping the frame.
    #[serde(other)]
    Unknown,
}

impl InputType {
    /// Confidence assigned to a fresh prediction of this input type.
    pub fn base_confidence(self) -> f32 {
        match self {
            InputType::ArrowPlace => 0.95,
            InputType::Move => 0.85,
            InputType::Action => 0.8,
            InputType::Unknown => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInput {
    pub timestamp: u64,
    pub sequence: u32,
    pub input_type: InputType,
    #[serde(default)]
    pub data: InputData,
}

impl PlayerInput {
    pub fn arrow(timestamp: u64, sequence: u32, position: Position, direction: Direction) -> Self {
        Self {
            timestamp,
            sequence,
            input_type: InputType::ArrowPlace,
            data: InputData {
                position: Some(position),
                direction: Some(direction),
                action: None,
            },
        }
    }

    pub fn movement(timestamp: u64, sequence: u32, position: Position) -> Self {
        Self {
            timestamp,
            sequence,
            input_type: InputType::Move,
            data: InputData {
                position: Some(position),
                ..InputData::default()
            },
        }
    }

    pub fn action(timestamp: u64, sequence: u32, action: &str) -> Self {
        Self {
            timestamp,
            sequence,
            input_type: InputType::Action,
            data: InputData {
                action: Some(action.to_string()),
                ..InputData::default()
            },
        }
    }

    /// Checks the payload shape required by the input type.
    pub fn validate_data(&self) -> Result<(), ValidationError> {
        let complete = match self.input_type {
            InputType::ArrowPlace => self.data.position.is_some() && self.data.direction.is_some(),
            InputType::Move => self.data.position.is_some(),
            InputType::Action => self.data.action.as_deref().is_some_and(|a| !a.is_empty()),
            InputType::Unknown => return Err(ValidationError::UnknownInputType),
        };
        if !complete {
            return Err(ValidationError::MissingInputData(self.input_type));
        }
        match self.data.position {
            Some(position) if !position.is_finite() => Err(ValidationError::NotFinite {
                field: "input position",
            }),
            _ => Ok(()),
        }
    }
}

/// Outcome a client expects its input to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionPayload {
    Position(Position),
    Value(Value),
}

/// Predicted positions this far (px) or further from the outcome score zero.
pub const POSITION_ACCURACY_RANGE: f32 = 10.0;

impl PredictionPayload {
    /// Positional payloads score `max(0, 1 - distance / 10)`; anything else
    /// is exact match, 1.0 or 0.0.
    pub fn accuracy_against(&self, actual: &PredictionPayload) -> f32 {
        match (self, actual) {
            (PredictionPayload::Position(expected), PredictionPayload::Position(actual)) => {
                let distance = expected.distance_to(actual);
                if distance.is_finite() {
                    (1.0 - distance / POSITION_ACCURACY_RANGE).max(0.0)
                } else {
                    0.0
                }
            }
            (expected, actual) if expected == actual => 1.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionInfo {
    pub prediction_id: String,
    pub expected_outcome: PredictionPayload,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictiveInput {
    pub player_id: String,
    pub input: PlayerInput,
    pub prediction: PredictionInfo,
}

impl PredictiveInput {
    /// Validates everything the server can check before applying the input:
    /// sender id, input type and payload, clock skew and confidence range.
    pub fn validate(&self, now: u64) -> Result<(), ValidationError> {
        if self.player_id.is_empty() {
            return Err(ValidationError::EmptyPlayerId);
        }
        self.input.validate_data()?;

        let skew_ms = now.abs_diff(self.input.timestamp);
        if skew_ms > INPUT_TIMESTAMP_TOLERANCE_MS {
            return Err(ValidationError::StaleTimestamp { skew_ms });
        }

        let confidence = self.prediction.confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(confidence));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputAcknowledgment {
    pub player_id: String,
    pub acknowledged_sequence: u32,
    /// Milliseconds between receipt and application.
    pub processing_time: u64,
    /// Authoritative sequence that first reflects the input.
    #[serde(default)]
    pub state_sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRejected {
    pub player_id: String,
    pub sequence: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullState {
    pub state: AuthoritativeState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStateSync {
    pub player_id: String,
    pub last_sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGame {
    pub player_id: String,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    "white".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub player_id: String,
    pub fps: f32,
    /// Round trip time in milliseconds as seen by the client.
    pub latency: f32,
    pub prediction_accuracy: f32,
    #[serde(default)]
    pub reconciliations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionType {
    Position,
    Velocity,
    State,
    Creation,
    Deletion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum CorrectionValue {
    Position(Position),
    Velocity(Velocity),
    Score(u32),
    PlayerStatus(PlayerStatus),
    EntityStatus(EntityStatus),
    Entity(Entity),
    Removed,
}

impl CorrectionValue {
    pub fn position(&self) -> Option<Position> {
        match self {
            CorrectionValue::Position(position) => Some(*position),
            CorrectionValue::Entity(entity) => Some(entity.position),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionEntry {
    pub entity_id: String,
    pub correction_type: CorrectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<CorrectionValue>,
    pub new_value: CorrectionValue,
    pub smoothing_duration: f32,
}

impl CorrectionEntry {
    /// Pixel distance between the old and new value of a positional
    /// correction, zero for everything else.
    pub fn position_delta(&self) -> f32 {
        match (
            self.old_value.as_ref().and_then(CorrectionValue::position),
            self.new_value.position(),
        ) {
            (Some(from), Some(to)) if self.correction_type == CorrectionType::Position => {
                from.distance_to(&to)
            }
            _ => 0.0,
        }
    }

    pub fn is_score_correction(&self) -> bool {
        matches!(self.new_value, CorrectionValue::Score(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackCorrection {
    pub correction_id: String,
    pub affected_entities: Vec<String>,
    pub rollback_to_sequence: u32,
    pub current_sequence: u32,
    pub corrections: Vec<CorrectionEntry>,
    #[serde(default)]
    pub replay_inputs: Vec<PlayerInput>,
    pub priority: CorrectionPriority,
}

impl RollbackCorrection {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let behind = self.rollback_to_sequence != self.current_sequence
            && is_at_or_before(self.rollback_to_sequence, self.current_sequence);
        if !behind {
            return Err(ValidationError::RollbackNotBehind {
                target: self.rollback_to_sequence,
                current: self.current_sequence,
            });
        }
        for entry in &self.corrections {
            if !self.affected_entities.contains(&entry.entity_id) {
                return Err(ValidationError::AffectedEntitiesIncomplete(
                    entry.entity_id.clone(),
                ));
            }
            if !(MIN_SMOOTHING_MS..=MAX_SMOOTHING_MS).contains(&entry.smoothing_duration) {
                return Err(ValidationError::SmoothingOutOfRange(entry.smoothing_duration));
            }
        }
        Ok(())
    }
}

/// Every message that crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    JoinGame(JoinGame),
    PredictiveInput(PredictiveInput),
    InputAcknowledgment(InputAcknowledgment),
    InputRejected(InputRejected),
    DeltaGameState(DeltaState),
    GameState(FullState),
    RollbackCorrection(RollbackCorrection),
    RequestStateSync(RequestStateSync),
    PerformanceReport(PerformanceReport),
    Ping(Ping),
    Pong(Pong),
    Batch(Batch),
    Error(ErrorMessage),
}

/// Discriminator of a [`Message`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    JoinGame,
    PredictiveInput,
    InputAcknowledgment,
    InputRejected,
    DeltaGameState,
    GameState,
    RollbackCorrection,
    RequestStateSync,
    PerformanceReport,
    Ping,
    Pong,
    Batch,
    Error,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::JoinGame => "join-game",
            MessageKind::PredictiveInput => "predictive-input",
            MessageKind::InputAcknowledgment => "input-acknowledgment",
            MessageKind::InputRejected => "input-rejected",
            MessageKind::DeltaGameState => "delta-game-state",
            MessageKind::GameState => "game-state",
            MessageKind::RollbackCorrection => "rollback-correction",
            MessageKind::RequestStateSync => "request-state-sync",
            MessageKind::PerformanceReport => "performance-report",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Batch => "batch",
            MessageKind::Error => "error",
        }
    }
}

type Decoder = fn(Value) -> Result<Message, serde_json::Error>;

/// Discriminator to payload decoder. The only place a `type` string is
/// turned into a variant.
pub const DECODERS: &[(&str, Decoder)] = &[
    ("join-game", |v| serde_json::from_value(v).map(Message::JoinGame)),
    ("predictive-input", |v| {
        serde_json::from_value(v).map(Message::PredictiveInput)
    }),
    ("input-acknowledgment", |v| {
        serde_json::from_value(v).map(Message::InputAcknowledgment)
    }),
    ("input-rejected", |v| {
        serde_json::from_value(v).map(Message::InputRejected)
    }),
    ("delta-game-state", |v| {
        serde_json::from_value(v).map(Message::DeltaGameState)
    }),
    ("game-state", |v| serde_json::from_value(v).map(Message::GameState)),
    ("rollback-correction", |v| {
        serde_json::from_value(v).map(Message::RollbackCorrection)
    }),
    ("request-state-sync", |v| {
        serde_json::from_value(v).map(Message::RequestStateSync)
    }),
    ("performance-report", |v| {
        serde_json::from_value(v).map(Message::PerformanceReport)
    }),
    ("ping", |v| serde_json::from_value(v).map(Message::Ping)),
    ("pong", |v| serde_json::from_value(v).map(Message::Pong)),
    ("batch", |v| serde_json::from_value(v).map(Message::Batch)),
    ("error", |v| serde_json::from_value(v).map(Message::Error)),
];

impl Message {
    pub fn decode(text: &str) -> Result<Message, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(mut value: Value) -> Result<Message, ProtocolError> {
        let tag = match value.as_object_mut().and_then(|map| map.remove("type")) {
            Some(Value::String(tag)) => tag,
            _ => return Err(ProtocolError::MissingType),
        };
        let decode = DECODERS
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, decode)| *decode)
            .ok_or_else(|| ProtocolError::UnknownMessageType(tag.clone()))?;

        decode(value).map_err(|source| ProtocolError::InvalidPayload {
            message_type: tag,
            source,
        })
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::JoinGame(_) => MessageKind::JoinGame,
            Message::PredictiveInput(_) => MessageKind::PredictiveInput,
            Message::InputAcknowledgment(_) => MessageKind::InputAcknowledgment,
            Message::InputRejected(_) => MessageKind::InputRejected,
            Message::DeltaGameState(_) => MessageKind::DeltaGameState,
            Message::GameState(_) => MessageKind::GameState,
            Message::RollbackCorrection(_) => MessageKind::RollbackCorrection,
            Message::RequestStateSync(_) => MessageKind::RequestStateSync,
            Message::PerformanceReport(_) => MessageKind::PerformanceReport,
            Message::Ping(_) => MessageKind::Ping,
            Message::Pong(_) => MessageKind::Pong,
            Message::Batch(_) => MessageKind::Batch,
            Message::Error(_) => MessageKind::Error,
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BoardBounds;
    use serde_json::json;

    fn predictive_input(timestamp: u64) -> PredictiveInput {
        PredictiveInput {
            player_id: "p1".to_string(),
            input: PlayerInput::movement(timestamp, 7, Position::new(10.0, 20.0)),
            prediction: PredictionInfo {
                prediction_id: "p1-7".to_string(),
                expected_outcome: PredictionPayload::Position(Position::new(10.0, 20.0)),
                confidence: 0.85,
            },
        }
    }

    #[test]
    fn test_prediction_accuracy() {
        let expected = PredictionPayload::Position(Position::new(0.0, 0.0));
        let near = PredictionPayload::Position(Position::new(3.0, 4.0));
        let far = PredictionPayload::Position(Position::new(30.0, 0.0));
        assert!((expected.accuracy_against(&near) - 0.5).abs() < 1e-6);
        assert_eq!(expected.accuracy_against(&far), 0.0);
        assert_eq!(expected.accuracy_against(&expected), 1.0);

        let ready = PredictionPayload::Value(json!("ACTIVE"));
        assert_eq!(ready.accuracy_against(&PredictionPayload::Value(json!("ACTIVE"))), 1.0);
        assert_eq!(ready.accuracy_against(&PredictionPayload::Value(json!("DISCONNECTED"))), 0.0);
        assert_eq!(ready.accuracy_against(&near), 0.0);
    }

    #[test]
    fn test_dispatch_table_covers_every_kind() {
        let kinds = [
            MessageKind::JoinGame,
            MessageKind::PredictiveInput,
            MessageKind::InputAcknowledgment,
            MessageKind::InputRejected,
            MessageKind::DeltaGameState,
            MessageKind::GameState,
            MessageKind::RollbackCorrection,
            MessageKind::RequestStateSync,
            MessageKind::PerformanceReport,
            MessageKind::Ping,
            MessageKind::Pong,
            MessageKind::Batch,
            MessageKind::Error,
        ];
        assert_eq!(kinds.len(), DECODERS.len());
        for kind in kinds {
            assert!(DECODERS.iter().any(|(name, _)| *name == kind.as_str()));
        }
    }

    #[test]
    fn test_predictive_input_wire_shape() {
        let text = Message::PredictiveInput(predictive_input(1_000)).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "predictive-input");
        assert_eq!(value["playerId"], "p1");
        assert_eq!(value["input"]["inputType"], "MOVE");
        assert_eq!(value["prediction"]["predictionId"], "p1-7");
        assert_eq!(value["prediction"]["expectedOutcome"]["x"], 10.0);
    }

    #[test]
    fn test_decode_predictive_input() {
        let text = json!({
            "type": "predictive-input",
            "playerId": "p1",
            "input": {
                "timestamp": 1000,
                "sequence": 3,
                "inputType": "ARROW_PLACE",
                "data": {"position": {"x": 5.0, "y": 6.0}, "direction": "LEFT"}
            },
            "prediction": {"predictionId": "x", "expectedOutcome": {"x": 5.0, "y": 6.0}, "confidence": 0.95}
        })
        .to_string();

        match Message::decode(&text).unwrap() {
            Message::PredictiveInput(input) => {
                assert_eq!(input.input.input_type, InputType::ArrowPlace);
                assert_eq!(input.input.data.direction, Some(Direction::Left));
                assert!(input.validate(1_200).is_ok());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_missing_type_rejected() {
        let unknown = Message::decode(r#"{"type":"teleport","x":1}"#);
        assert!(matches!(unknown, Err(ProtocolError::UnknownMessageType(t)) if t == "teleport"));

        let missing = Message::decode(r#"{"playerId":"p1"}"#);
        assert!(matches!(missing, Err(ProtocolError::MissingType)));

        let not_json = Message::decode("not json");
        assert!(matches!(not_json, Err(ProtocolError::Json(_))));

        let bad_payload = Message::decode(r#"{"type":"ping","timestamp":"soon"}"#);
        assert!(matches!(bad_payload, Err(ProtocolError::InvalidPayload { .. })));
    }

    #[test]
    fn test_unknown_input_type_decodes_but_fails_validation() {
        let mut value = serde_json::to_value(Message::PredictiveInput(predictive_input(1_000))).unwrap();
        value["input"]["inputType"] = json!("JUMP");
        let message = Message::from_value(value).unwrap();
        let Message::PredictiveInput(input) = message else {
            panic!("expected predictive input");
        };
        assert_eq!(input.input.input_type, InputType::Unknown);
        assert_eq!(input.validate(1_000), Err(ValidationError::UnknownInputType));
    }

    #[test]
    fn test_input_validation_rules() {
        assert!(predictive_input(5_000).validate(5_000).is_ok());
        assert_eq!(
            predictive_input(5_000).validate(6_500),
            Err(ValidationError::StaleTimestamp { skew_ms: 1_500 })
        );

        let mut bad_confidence = predictive_input(5_000);
        bad_confidence.prediction.confidence = 1.5;
        assert_eq!(
            bad_confidence.validate(5_000),
            Err(ValidationError::ConfidenceOutOfRange(1.5))
        );

        let mut no_position = predictive_input(5_000);
        no_position.input.data.position = None;
        assert_eq!(
            no_position.validate(5_000),
            Err(ValidationError::MissingInputData(InputType::Move))
        );

        let mut anonymous = predictive_input(5_000);
        anonymous.player_id.clear();
        assert_eq!(anonymous.validate(5_000), Err(ValidationError::EmptyPlayerId));
    }

    #[test]
    fn test_rollback_correction_validation() {
        let entry = CorrectionEntry {
            entity_id: "m1".to_string(),
            correction_type: CorrectionType::Position,
            old_value: Some(CorrectionValue::Position(Position::new(0.0, 0.0))),
            new_value: CorrectionValue::Position(Position::new(3.0, 4.0)),
            smoothing_duration: 33.0,
        };
        let mut correction = RollbackCorrection {
            correction_id: "c1".to_string(),
            affected_entities: vec!["m1".to_string()],
            rollback_to_sequence: 10,
            current_sequence: 12,
            corrections: vec![entry],
            replay_inputs: Vec::new(),
            priority: CorrectionPriority::High,
        };
        assert!(correction.validate().is_ok());
        assert_eq!(correction.corrections[0].position_delta(), 5.0);

        correction.affected_entities.clear();
        assert_eq!(
            correction.validate(),
            Err(ValidationError::AffectedEntitiesIncomplete("m1".to_string()))
        );

        correction.affected_entities.push("m1".to_string());
        correction.rollback_to_sequence = 12;
        assert!(matches!(
            correction.validate(),
            Err(ValidationError::RollbackNotBehind { .. })
        ));

        correction.rollback_to_sequence = 13;
        assert!(matches!(
            correction.validate(),
            Err(ValidationError::RollbackNotBehind { .. })
        ));

        correction.rollback_to_sequence = 11;
        correction.corrections[0].smoothing_duration = 80.0;
        assert_eq!(
            correction.validate(),
            Err(ValidationError::SmoothingOutOfRange(80.0))
        );
    }

    #[test]
    fn test_rollback_across_sequence_rollover() {
        let mut correction = RollbackCorrection {
            correction_id: "c1".to_string(),
            affected_entities: Vec::new(),
            rollback_to_sequence: u32::MAX - 1,
            current_sequence: 2,
            corrections: Vec::new(),
            replay_inputs: Vec::new(),
            priority: CorrectionPriority::Low,
        };
        assert!(correction.validate().is_ok());

        correction.rollback_to_sequence = 2;
        correction.current_sequence = u32::MAX - 1;
        assert_eq!(
            correction.validate(),
            Err(ValidationError::RollbackNotBehind {
                target: 2,
                current: u32::MAX - 1,
            })
        );
    }

    #[test]
    fn test_batch_carries_nested_messages() {
        let state = AuthoritativeState::new(BoardBounds::default(), 0);
        let batch = Message::Batch(Batch {
            messages: vec![
                Message::Ping(Ping { timestamp: 9 }),
                Message::GameState(FullState { state }),
            ],
        });
        let decoded = Message::decode(&batch.encode().unwrap()).unwrap();
        assert_eq!(decoded, batch);
        assert_eq!(decoded.kind(), MessageKind::Batch);
    }

    #[test]
    fn test_correction_value_tagging() {
        let value = serde_json::to_value(CorrectionValue::Score(4)).unwrap();
        assert_eq!(value, json!({"kind": "score", "value": 4}));
        let removed = serde_json::to_value(CorrectionValue::Removed).unwrap();
        assert_eq!(removed, json!({"kind": "removed"}));
    }
}
