//! Incident emission
//!
//! Turns a scored, resolved signal group into the incident record handed back to
//! the caller, including its explanation and per-signal breakdown.

use crate::config::DetectionConfig;
use crate::detection::failure_point::FailurePoint;
use crate::detection::scorer::GroupAssessment;
use crate::types::{Incident, IncidentStatus, QualifiedSignal, Session, SignalDetail, SignalGroup, SignalType};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Builder for incident records
pub struct IncidentEmitter;

impl IncidentEmitter {
    /// Build the incident for the `ordinal`-th group of a session.
    ///
    /// Returns `None` when the explanation cannot reference a concrete signal at
    /// `failure_point`.
    pub fn emit(
        session: &Session,
        ordinal: usize,
        group: &SignalGroup,
        assessment: &GroupAssessment,
        failure_point: &FailurePoint,
        config: &DetectionConfig,
        now: DateTime<Utc>,
    ) -> Option<Incident> {
        let explanation = render_explanation(group, assessment, failure_point)?;

        Some(Incident {
            incident_id: incident_id(&session.project_id, &session.session_id, ordinal, group.start),
            session_id: session.session_id.clone(),
            project_id: session.project_id.clone(),
            frustration_score: assessment.frustration_score,
            confidence_level: assessment.confidence_level,
            confidence_score: assessment.confidence_score,
            triggering_signals: group.signal_types(),
            primary_failure_point: failure_point.to_string(),
            severity_type: assessment.severity,
            timestamp: group.start,
            explanation,
            signal_details: group.signals.iter().map(signal_detail).collect(),
            status: IncidentStatus::Open,
            suppressed: is_suppressed(failure_point, &config.suppressed_routes),
            created_at: now,
            updated_at: now,
        })
    }
}

/// Name-based identifier, stable across re-runs over the same session
pub fn incident_id(project_id: &str, session_id: &str, ordinal: usize, start: DateTime<Utc>) -> String {
    let name = format!(
        "hawkeye://incident/{project_id}/{session_id}/{ordinal}/{}",
        start.timestamp_millis()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Render the explanation for a group.
///
/// Only signals with a route or target are referenced, and at least one of them
/// must sit at the failure point.
pub fn render_explanation(
    group: &SignalGroup,
    assessment: &GroupAssessment,
    failure_point: &FailurePoint,
) -> Option<String> {
    let concrete: Vec<&QualifiedSignal> = group.signals.iter().filter(|s| is_concrete(s)).collect();
    if !concrete.iter().any(|s| located_at(s, failure_point)) {
        return None;
    }

    let mut phrases: Vec<String> = Vec::new();
    for signal_type in group.signal_types() {
        let of_type: Vec<&QualifiedSignal> = concrete
            .iter()
            .copied()
            .filter(|s| s.signal_type() == signal_type)
            .collect();
        if let Some(phrase) = phrase_for(signal_type, &of_type) {
            phrases.push(phrase);
        }
    }

    let location = if failure_point.is_route() { "on" } else { "at" };
    let mut explanation = format!(
        "{} frustration {location} {}: {}",
        capitalize(assessment.severity.as_str()),
        failure_point,
        join_phrases(&phrases)
    );

    let span = group.span_sec();
    if span > 0.0 {
        explanation.push_str(&format!(" within {span:.1}s"));
    }
    explanation.push('.');
    Some(explanation)
}

fn is_concrete(signal: &QualifiedSignal) -> bool {
    !signal.route().trim().is_empty() || signal.candidate.target_identity().is_some()
}

fn located_at(signal: &QualifiedSignal, failure_point: &FailurePoint) -> bool {
    match failure_point {
        FailurePoint::Route(route) => signal.route().trim() == route.as_str(),
        FailurePoint::Target(descriptor) => signal
            .candidate
            .target
            .as_ref()
            .and_then(|t| t.descriptor().or_else(|| t.identity()))
            .is_some_and(|d| d == *descriptor),
    }
}

fn phrase_for(signal_type: SignalType, signals: &[&QualifiedSignal]) -> Option<String> {
    let first = signals.first()?;
    let mut phrase = signal_type.label().to_string();

    match signal_type {
        SignalType::RageClick => {
            let clicks: u32 = signals.iter().map(|s| s.candidate.evidence.count).sum();
            phrase.push_str(&format!(" ({clicks} clicks"));
            if let Some(target) = first.candidate.target.as_ref().and_then(|t| t.descriptor()) {
                phrase.push_str(&format!(" on {target}"));
            }
            phrase.push(')');
        }
        SignalType::ErrorBurst | SignalType::AdjacentFailure => {
            if let Some(status) = signals.iter().find_map(|s| s.failure_status) {
                phrase.push_str(&format!(" (HTTP {status})"));
            } else if let Some(message) = signals.iter().find_map(|s| s.failure_message.as_deref()) {
                phrase.push_str(&format!(" ({message})"));
            }
        }
        SignalType::NavigationThrash => {
            let revisits: u32 = signals.iter().map(|s| s.candidate.evidence.count).sum();
            phrase.push_str(&format!(" ({revisits} revisits)"));
        }
        SignalType::SlowResponseFrustration => {
            let slowest = signals.iter().map(|s| s.candidate.evidence.interval_ms).max()?;
            phrase.push_str(&format!(" ({slowest}ms)"));
        }
    }

    if signals.len() > 1 {
        phrase.push_str(&format!(" x{}", signals.len()));
    }
    Some(phrase)
}

fn join_phrases(phrases: &[String]) -> String {
    match phrases {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn signal_detail(signal: &QualifiedSignal) -> SignalDetail {
    let candidate = &signal.candidate;
    let mut details: BTreeMap<String, Value> = BTreeMap::new();
    details.insert("count".to_string(), json!(candidate.evidence.count));
    details.insert("intervalMs".to_string(), json!(candidate.evidence.interval_ms));
    details.insert(
        "endTimestamp".to_string(),
        json!(candidate.end_timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    if let Some(target) = candidate.target.as_ref().and_then(|t| t.descriptor()) {
        details.insert("target".to_string(), json!(target));
    }
    if let Some(status) = signal.failure_status {
        details.insert("failureStatus".to_string(), json!(status));
    }
    if let Some(message) = &signal.failure_message {
        details.insert("failureMessage".to_string(), json!(message));
    }

    SignalDetail {
        signal_type: candidate.signal_type,
        timestamp: candidate.timestamp,
        route: candidate.route.clone(),
        details,
    }
}

/// Exact match, or prefix match for patterns ending in `*`
fn is_suppressed(failure_point: &FailurePoint, suppressed_routes: &[String]) -> bool {
    let point = failure_point.as_str();
    suppressed_routes.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => point.starts_with(prefix),
        None => point == pattern,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateSignal, ConfidenceLevel, EventTarget, SeverityType, SignalEvidence};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn rage(route: &str) -> QualifiedSignal {
        QualifiedSignal {
            candidate: CandidateSignal {
                signal_type: SignalType::RageClick,
                timestamp: base(),
                end_timestamp: base() + Duration::milliseconds(3_800),
                route: route.to_string(),
                target: Some(EventTarget {
                    id: Some("pay".to_string()),
                    tag_name: Some("BUTTON".to_string()),
                    ..Default::default()
                }),
                evidence: SignalEvidence {
                    event_indices: (0..20).collect(),
                    count: 20,
                    interval_ms: 3_800,
                },
            },
            failure_status: None,
            failure_message: None,
        }
    }

    fn burst(route: &str) -> QualifiedSignal {
        QualifiedSignal {
            candidate: CandidateSignal {
                signal_type: SignalType::ErrorBurst,
                timestamp: base() + Duration::seconds(4),
                end_timestamp: base() + Duration::seconds(5),
                route: route.to_string(),
                target: None,
                evidence: SignalEvidence {
                    event_indices: vec![20, 21],
                    count: 2,
                    interval_ms: 1_000,
                },
            },
            failure_status: Some(500),
            failure_message: None,
        }
    }

    fn group(signals: Vec<QualifiedSignal>) -> SignalGroup {
        SignalGroup {
            start: base(),
            end: base() + Duration::seconds(5),
            dominant_route: "/checkout".to_string(),
            signals,
        }
    }

    fn assessment() -> GroupAssessment {
        GroupAssessment {
            frustration_score: 65,
            severity: SeverityType::Major,
            confidence_score: 80.0,
            confidence_level: ConfidenceLevel::High,
        }
    }

    #[test]
    fn test_emit_builds_incident() {
        let session = Session::new("proj", "sess", base());
        let g = group(vec![rage("/checkout"), burst("/checkout")]);
        let point = FailurePoint::Route("/checkout".to_string());

        let incident = IncidentEmitter::emit(
            &session,
            0,
            &g,
            &assessment(),
            &point,
            &DetectionConfig::default(),
            base(),
        )
        .unwrap();

        assert_eq!(incident.primary_failure_point, "/checkout");
        assert_eq!(
            incident.triggering_signals,
            vec![SignalType::RageClick, SignalType::ErrorBurst]
        );
        assert_eq!(incident.status, IncidentStatus::Open);
        assert!(!incident.suppressed);
        assert_eq!(incident.timestamp, base());
        assert_eq!(incident.signal_details.len(), 2);
        assert_eq!(incident.signal_details[1].details["failureStatus"], json!(500));
        assert_eq!(
            incident.explanation,
            "Major frustration on /checkout: rage clicking (20 clicks on button#pay) and an error burst (HTTP 500) within 5.0s."
        );
    }

    #[test]
    fn test_incident_id_is_deterministic() {
        let a = incident_id("proj", "sess", 0, base());
        assert_eq!(a, incident_id("proj", "sess", 0, base()));
        assert_ne!(a, incident_id("proj", "sess", 1, base()));
        assert_ne!(a, incident_id("proj", "other", 0, base()));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_explanation_needs_concrete_signal() {
        let mut anonymous = burst("");
        anonymous.candidate.route = "  ".to_string();
        let g = group(vec![anonymous]);
        let point = FailurePoint::Route("/checkout".to_string());
        assert_eq!(render_explanation(&g, &assessment(), &point), None);
    }

    #[test]
    fn test_explanation_needs_signal_at_failure_point() {
        let session = Session::new("proj", "sess", base());
        let g = group(vec![rage("/checkout"), burst("/checkout")]);

        for point in [
            FailurePoint::Route("/cart".to_string()),
            FailurePoint::Target("button#refund".to_string()),
        ] {
            assert_eq!(render_explanation(&g, &assessment(), &point), None);
            let emitted = IncidentEmitter::emit(
                &session,
                0,
                &g,
                &assessment(),
                &point,
                &DetectionConfig::default(),
                base(),
            );
            assert!(emitted.is_none());
        }

        let target = FailurePoint::Target("button#pay".to_string());
        let explanation = render_explanation(&g, &assessment(), &target).unwrap();
        assert!(explanation.starts_with("Major frustration at button#pay: "));
    }

    #[test]
    fn test_suppressed_routes() {
        let routes = vec!["/health".to_string(), "/admin/*".to_string()];
        assert!(is_suppressed(&FailurePoint::Route("/health".to_string()), &routes));
        assert!(is_suppressed(&FailurePoint::Route("/admin/users".to_string()), &routes));
        assert!(!is_suppressed(&FailurePoint::Route("/healthz".to_string()), &routes));
        assert!(!is_suppressed(&FailurePoint::Route("/checkout".to_string()), &routes));
    }

    #[test]
    fn test_join_phrases() {
        assert_eq!(join_phrases(&["a".to_string()]), "a");
        assert_eq!(join_phrases(&["a".to_string(), "b".to_string()]), "a and b");
        assert_eq!(
            join_phrases(&["a".to_string(), "b".to_string(), "c".to_string()]),
            "a, b and c"
        );
    }
}
