//! Frustration scoring and confidence evaluation

use crate::config::DetectionConfig;
use crate::types::{ConfidenceLevel, SeverityType, SignalGroup, SignalType};
use std::collections::BTreeMap;

/// Confidence score at or above which a group is high confidence
pub const HIGH_CONFIDENCE_MIN: f64 = 70.0;

/// Confidence score at or above which a group is medium confidence
pub const MEDIUM_CONFIDENCE_MIN: f64 = 40.0;

/// Score, severity, and confidence for one signal group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupAssessment {
    /// 0-100
    pub frustration_score: u8,
    pub severity: SeverityType,
    /// 0-100
    pub confidence_score: f64,
    pub confidence_level: ConfidenceLevel,
}

/// Scorer for signal groups
pub struct FrustrationScorer;

impl FrustrationScorer {
    pub fn assess(group: &SignalGroup, config: &DetectionConfig) -> GroupAssessment {
        let frustration_score = compute_frustration_score(group, config);
        let confidence_score = compute_confidence_score(group);

        GroupAssessment {
            frustration_score,
            severity: severity_for(frustration_score),
            confidence_score,
            confidence_level: confidence_level_for(confidence_score),
        }
    }
}

/// Compute the 0-100 frustration score.
///
/// Each signal type contributes its base points once, and each repeat of that
/// type contributes `repeat_signal_factor` of the base. The capped sum is scaled
/// by `min(1, reference_span / span)` with a floor, so episodes stretched across a
/// long span score lower than ones concentrated at a single failure point.
pub fn compute_frustration_score(group: &SignalGroup, config: &DetectionConfig) -> u8 {
    let mut per_type: BTreeMap<SignalType, usize> = BTreeMap::new();
    for signal in &group.signals {
        *per_type.entry(signal.signal_type()).or_insert(0) += 1;
    }

    let raw: f64 = per_type
        .iter()
        .map(|(signal_type, count)| {
            let base = config.weights.base_points(*signal_type);
            base + base * config.repeat_signal_factor * count.saturating_sub(1) as f64
        })
        .sum();

    let scaled = raw.min(100.0) * span_factor(group.span_sec(), config);
    scaled.round().clamp(0.0, 100.0) as u8
}

fn span_factor(span_sec: f64, config: &DetectionConfig) -> f64 {
    if span_sec <= 0.0 {
        return 1.0;
    }
    (config.score_reference_span_sec / span_sec)
        .min(1.0)
        .max(config.score_span_floor)
}

/// Severity band for a frustration score
pub fn severity_for(score: u8) -> SeverityType {
    match score {
        0..=29 => SeverityType::Minor,
        30..=59 => SeverityType::Moderate,
        60..=85 => SeverityType::Major,
        _ => SeverityType::Critical,
    }
}

/// Confidence from signal diversity and evidence volume:
/// `min(100, 20 * distinct_types + 10 * total_signals)`
pub fn compute_confidence_score(group: &SignalGroup) -> f64 {
    let distinct = group.signal_types().len() as f64;
    let total = group.signals.len() as f64;
    (20.0 * distinct + 10.0 * total).min(100.0)
}

pub fn confidence_level_for(score: f64) -> ConfidenceLevel {
    if score >= HIGH_CONFIDENCE_MIN {
        ConfidenceLevel::High
    } else if score >= MEDIUM_CONFIDENCE_MIN {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}
