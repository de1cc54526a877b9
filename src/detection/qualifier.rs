//! Signal qualification
//!
//! Applies stricter, context-aware checks to candidates so that only signals
//! backed by real evidence move on to correlation.

use crate::config::DetectionConfig;
use crate::detection::classifier::metadata_status;
use crate::types::{CandidateSignal, ClassifiedEvent, QualifiedSignal, SignalType};
use serde_json::Value;

/// Status at or above which a response is a failure
const FAILURE_STATUS_MIN: u16 = 400;

/// Result of qualifying a batch of candidates
#[derive(Debug, Clone, Default)]
pub struct QualificationOutcome {
    /// Candidates that passed, ordered by start time
    pub qualified: Vec<QualifiedSignal>,
    /// Number of candidates rejected or deduplicated
    pub discarded: usize,
}

/// Failure evidence found on a system feedback event
#[derive(Debug, Clone, PartialEq)]
struct FailureEvidence {
    status: Option<u16>,
    message: Option<String>,
}

/// Qualifier for candidate signals
pub struct SignalQualifier;

impl SignalQualifier {
    /// Filter candidates against the classified events they were drawn from
    pub fn qualify(
        candidates: Vec<CandidateSignal>,
        events: &[ClassifiedEvent],
        config: &DetectionConfig,
    ) -> QualificationOutcome {
        let total = candidates.len();

        let mut passed: Vec<QualifiedSignal> = candidates
            .into_iter()
            .filter_map(|candidate| qualify_candidate(candidate, events, config))
            .collect();
        passed.sort_by_key(|s| s.candidate.timestamp);

        let qualified = deduplicate(passed, config);
        QualificationOutcome {
            discarded: total - qualified.len(),
            qualified,
        }
    }
}

fn qualify_candidate(
    candidate: CandidateSignal,
    events: &[ClassifiedEvent],
    config: &DetectionConfig,
) -> Option<QualifiedSignal> {
    match candidate.signal_type {
        SignalType::RageClick => (candidate.span_ms() <= config.rage_click_max_span_ms)
            .then(|| QualifiedSignal {
                candidate,
                failure_status: None,
                failure_message: None,
            }),
        SignalType::ErrorBurst => {
            let failures: Vec<FailureEvidence> = candidate
                .evidence
                .event_indices
                .iter()
                .filter_map(|&i| events.get(i).and_then(failure_evidence))
                .collect();
            if failures.len() < config.error_burst_min_errors {
                return None;
            }
            Some(QualifiedSignal {
                failure_status: failures.iter().find_map(|f| f.status),
                failure_message: failures.iter().find_map(|f| f.message.clone()),
                candidate,
            })
        }
        SignalType::AdjacentFailure => {
            let feedback_index = *candidate.evidence.event_indices.last()?;
            let failure = events.get(feedback_index).and_then(failure_evidence)?;
            Some(QualifiedSignal {
                candidate,
                failure_status: failure.status,
                failure_message: failure.message,
            })
        }
        SignalType::NavigationThrash | SignalType::SlowResponseFrustration => {
            Some(QualifiedSignal {
                candidate,
                failure_status: None,
                failure_message: None,
            })
        }
    }
}

/// Genuine failure carried by an event, if any.
///
/// `network_success` is informational and never a failure. `error` and
/// `network_error` are failures by type; anything else needs a status of 400 or
/// more, or explicit error metadata.
fn failure_evidence(event: &ClassifiedEvent) -> Option<FailureEvidence> {
    let event_type = event.event_type();
    if event_type == "network_success" {
        return None;
    }

    let metadata = &event.event.metadata;
    let status = metadata_status(metadata);
    let message = metadata.get("error").map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    let failed_by_type = matches!(event_type, "error" | "network_error");
    let failed_status = status.map(|s| s >= FAILURE_STATUS_MIN).unwrap_or(false);

    (failed_by_type || failed_status || message.is_some()).then(|| FailureEvidence {
        status: status.filter(|s| *s >= FAILURE_STATUS_MIN),
        message,
    })
}

/// Drop same-type signals that describe the same spot in the same short window,
/// keeping the one with more evidence (the earlier one on ties)
fn deduplicate(signals: Vec<QualifiedSignal>, config: &DetectionConfig) -> Vec<QualifiedSignal> {
    let slack = config.dedup_window();
    let mut kept: Vec<QualifiedSignal> = Vec::with_capacity(signals.len());

    for signal in signals {
        let duplicate_of = kept.iter().position(|existing| {
            let a = &existing.candidate;
            let b = &signal.candidate;
            a.signal_type == b.signal_type
                && a.route == b.route
                && targets_compatible(a, b)
                && b.timestamp - a.end_timestamp <= slack
                && a.timestamp - b.end_timestamp <= slack
        });

        match duplicate_of {
            Some(index) => {
                if signal.candidate.evidence.count > kept[index].candidate.evidence.count {
                    kept[index] = signal;
                }
            }
            None => kept.push(signal),
        }
    }

    kept.sort_by_key(|s| s.candidate.timestamp);
    kept
}

fn targets_compatible(a: &CandidateSignal, b: &CandidateSignal) -> bool {
    match (a.target_identity(), b.target_identity()) {
        (Some(left), Some(right)) => left == right,
        _ => true,
    }
}
