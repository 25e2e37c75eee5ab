//! Severity and smoothing rules for authoritative corrections.
//!
//! Both sides need them: the server stamps a smoothing duration on every
//! correction it sends, and the client classifies the divergences it detects
//! itself. Everything here is a pure function of the correction set.

use crate::protocol::{CorrectionEntry, CorrectionType};
use crate::{MAX_SMOOTHING_MS, MIN_SMOOTHING_MS};
use serde::{Deserialize, Serialize};

/// Positional deltas up to this many pixels are minor.
pub const MINOR_POSITION_DELTA: f32 = 1.0;
/// Positional deltas up to this many pixels are moderate, above is major.
pub const MODERATE_POSITION_DELTA: f32 = 5.0;

/// Corrections bundled beyond this count get extra smoothing time.
const BUNDLE_SIZE: usize = 5;
const BUNDLE_EXTRA_MS: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
}

impl Severity {
    fn base_duration_ms(self) -> f32 {
        match self {
            Severity::Minor => 16.0,
            Severity::Moderate => 33.0,
            Severity::Major => 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    Linear,
    EaseOut,
    EaseInOut,
}

impl Easing {
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Minor => Easing::Linear,
            Severity::Moderate => Easing::EaseOut,
            Severity::Major => Easing::EaseInOut,
        }
    }

    /// Maps linear progress in [0, 1] onto the eased curve.
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Easing::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmoothingConfig {
    pub duration: f32,
    pub easing: Easing,
}

impl SmoothingConfig {
    pub fn for_corrections(corrections: &[CorrectionEntry]) -> Self {
        let severity = classify_severity(corrections);
        Self {
            duration: smoothing_duration(
                severity,
                corrections.len(),
                max_position_delta(corrections),
            ),
            easing: Easing::for_severity(severity),
        }
    }
}

pub fn max_position_delta(corrections: &[CorrectionEntry]) -> f32 {
    corrections
        .iter()
        .map(CorrectionEntry::position_delta)
        .fold(0.0, f32::max)
}

/// Score corrections, creations and deletions are always major. STATE
/// corrections are at least moderate. Otherwise the largest positional delta
/// decides.
pub fn classify_severity(corrections: &[CorrectionEntry]) -> Severity {
    let structural = corrections.iter().any(|entry| {
        entry.is_score_correction()
            || matches!(
                entry.correction_type,
                CorrectionType::Creation | CorrectionType::Deletion
            )
    });
    if structural {
        return Severity::Major;
    }

    let max_delta = max_position_delta(corrections);
    let positional = if max_delta <= MINOR_POSITION_DELTA {
        Severity::Minor
    } else if max_delta <= MODERATE_POSITION_DELTA {
        Severity::Moderate
    } else {
        Severity::Major
    };

    let has_state = corrections
        .iter()
        .any(|entry| entry.correction_type == CorrectionType::State);
    if has_state {
        positional.max(Severity::Moderate)
    } else {
        positional
    }
}

/// Always within [16, 50] ms.
pub fn smoothing_duration(severity: Severity, correction_count: usize, max_delta: f32) -> f32 {
    let mut duration = severity.base_duration_ms();
    if correction_count > BUNDLE_SIZE {
        duration += BUNDLE_EXTRA_MS;
    }
    if max_delta.is_finite() {
        duration += 2.0 * max_delta.max(0.0);
    }
    duration.clamp(MIN_SMOOTHING_MS, MAX_SMOOTHING_MS)
}

pub fn requires_input_replay(corrections: &[CorrectionEntry]) -> bool {
    classify_severity(corrections) == Severity::Major
        || corrections.iter().any(|entry| {
            entry.is_score_correction()
                || matches!(
                    entry.correction_type,
                    CorrectionType::Creation | CorrectionType::Deletion
                )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CorrectionValue;
    use crate::Position;
    use assert_approx_eq::assert_approx_eq;

    fn moved(to: f32) -> CorrectionEntry {
        CorrectionEntry {
            entity_id: "e1".to_string(),
            correction_type: CorrectionType::Position,
            old_value: Some(CorrectionValue::Position(Position::new(0.0, 0.0))),
            new_value: CorrectionValue::Position(Position::new(to, to)),
            smoothing_duration: 16.0,
        }
    }

    fn score(value: u32) -> CorrectionEntry {
        CorrectionEntry {
            entity_id: "p1".to_string(),
            correction_type: CorrectionType::State,
            old_value: None,
            new_value: CorrectionValue::Score(value),
            smoothing_duration: 16.0,
        }
    }

    #[test]
    fn test_positional_severity_bands() {
        assert_eq!(classify_severity(&[moved(0.5)]), Severity::Minor);
        assert_eq!(classify_severity(&[moved(3.0)]), Severity::Moderate);
        assert_eq!(classify_severity(&[moved(8.0)]), Severity::Major);
    }

    #[test]
    fn test_score_correction_is_major() {
        assert_eq!(classify_severity(&[moved(0.1), score(3)]), Severity::Major);
        assert!(requires_input_replay(&[score(1)]));
    }

    #[test]
    fn test_state_correction_at_least_moderate() {
        let status = CorrectionEntry {
            entity_id: "m1".to_string(),
            correction_type: CorrectionType::State,
            old_value: None,
            new_value: CorrectionValue::EntityStatus(crate::EntityStatus::Captured),
            smoothing_duration: 16.0,
        };
        assert_eq!(classify_severity(&[status.clone()]), Severity::Moderate);
        assert_eq!(classify_severity(&[status, moved(9.0)]), Severity::Major);
    }

    #[test]
    fn test_creation_requires_replay() {
        let mut created = moved(0.0);
        created.correction_type = CorrectionType::Creation;
        assert_eq!(classify_severity(&[created.clone()]), Severity::Major);
        assert!(requires_input_replay(&[created]));
        assert!(!requires_input_replay(&[moved(0.5)]));
    }

    #[test]
    fn test_smoothing_duration_bounds() {
        for severity in [Severity::Minor, Severity::Moderate, Severity::Major] {
            for count in [0, 1, 6, 50] {
                for delta in [0.0, 0.4, 4.0, 100.0, f32::NAN] {
                    let duration = smoothing_duration(severity, count, delta);
                    assert!((MIN_SMOOTHING_MS..=MAX_SMOOTHING_MS).contains(&duration));
                }
            }
        }
    }

    #[test]
    fn test_smoothing_monotonic_in_severity() {
        for count in [1, 6] {
            let minor = smoothing_duration(Severity::Minor, count, 0.0);
            let moderate = smoothing_duration(Severity::Moderate, count, 0.0);
            let major = smoothing_duration(Severity::Major, count, 0.0);
            assert!(minor <= moderate && moderate <= major);
        }
        assert_approx_eq!(smoothing_duration(Severity::Minor, 1, 0.0), 16.0, 0.001);
        assert_approx_eq!(smoothing_duration(Severity::Minor, 6, 2.0), 30.0, 0.001);
    }

    #[test]
    fn test_smoothing_config_for_corrections() {
        let config = SmoothingConfig::for_corrections(&[moved(3.0)]);
        assert_eq!(config.easing, Easing::EaseOut);
        assert!(config.duration >= 33.0);
    }

    #[test]
    fn test_easing_endpoints() {
        for easing in [Easing::Linear, Easing::EaseOut, Easing::EaseInOut] {
            assert_approx_eq!(easing.apply(0.0), 0.0, 0.0001);
            assert_approx_eq!(easing.apply(1.0), 1.0, 0.0001);
            assert!(easing.apply(0.5) > 0.0 && easing.apply(0.5) < 1.0);
        }
    }
}
