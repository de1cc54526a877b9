//! Signal correlation
//!
//! Greedy temporal-proximity clustering of qualified signals into groups that
//! plausibly describe one user-facing failure.

use crate::config::DetectionConfig;
use crate::detection::tally::most_frequent;
use crate::types::{QualifiedSignal, SignalGroup};
use chrono::{DateTime, Utc};

/// Correlator for qualified signals
pub struct SignalCorrelator;

impl SignalCorrelator {
    /// Group signals, returning groups in chronological order of their first signal.
    ///
    /// A new group opens when a signal starts more than the correlation window
    /// after the open group's latest signal, or when it sits on a different route
    /// than the group's dominant route and shares no target with the group.
    pub fn correlate(mut signals: Vec<QualifiedSignal>, config: &DetectionConfig) -> Vec<SignalGroup> {
        signals.sort_by_key(|s| s.candidate.timestamp);

        let window = config.correlation_window();
        let mut groups = Vec::new();
        let mut open: Vec<QualifiedSignal> = Vec::new();

        for signal in signals {
            if let Some(latest) = open.last().map(|s| s.candidate.timestamp) {
                let too_late = signal.candidate.timestamp - latest > window;
                let off_route = signal.route() != dominant_route(&open) && !shares_target(&open, &signal);
                if too_late || off_route {
                    groups.push(build_group(std::mem::take(&mut open)));
                }
            }
            open.push(signal);
        }

        if !open.is_empty() {
            groups.push(build_group(open));
        }
        groups
    }
}

/// Route on the most signals; on a tie the route seen first wins
pub fn dominant_route(signals: &[QualifiedSignal]) -> String {
    most_frequent(signals.iter().map(|s| s.route()))
        .unwrap_or_default()
        .to_string()
}

fn shares_target(group: &[QualifiedSignal], signal: &QualifiedSignal) -> bool {
    let Some(identity) = signal.candidate.target_identity() else {
        return false;
    };
    group
        .iter()
        .any(|member| member.candidate.target_identity().as_deref() == Some(identity.as_str()))
}

fn build_group(signals: Vec<QualifiedSignal>) -> SignalGroup {
    let start = signals
        .iter()
        .map(|s| s.candidate.timestamp)
        .min()
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let end = signals
        .iter()
        .map(|s| s.candidate.end_timestamp)
        .max()
        .unwrap_or(start);
    let dominant_route = dominant_route(&signals);

    SignalGroup {
        signals,
        start,
        end,
        dominant_route,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateSignal, EventTarget, SignalEvidence, SignalType};
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn signal(signal_type: SignalType, secs: i64, route: &str, target: Option<&str>) -> QualifiedSignal {
        QualifiedSignal {
            candidate: CandidateSignal {
                signal_type,
                timestamp: base() + Duration::seconds(secs),
                end_timestamp: base() + Duration::seconds(secs + 1),
                route: route.to_string(),
                target: target.map(|id| EventTarget {
                    id: Some(id.to_string()),
                    ..Default::default()
                }),
                evidence: SignalEvidence::default(),
            },
            failure_status: None,
            failure_message: None,
        }
    }

    #[test]
    fn test_close_signals_on_same_route_group_together() {
        let signals = vec![
            signal(SignalType::AdjacentFailure, 5, "/pay", None),
            signal(SignalType::RageClick, 0, "/pay", Some("submit")),
            signal(SignalType::ErrorBurst, 12, "/pay", None),
        ];

        let groups = SignalCorrelator::correlate(signals, &DetectionConfig::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].signals.len(), 3);
        assert_eq!(groups[0].start, base());
        assert_eq!(groups[0].end, base() + Duration::seconds(13));
        assert_eq!(groups[0].dominant_route, "/pay");
    }

    #[test]
    fn test_gap_beyond_window_opens_new_group() {
        let signals = vec![
            signal(SignalType::RageClick, 0, "/pay", None),
            signal(SignalType::ErrorBurst, 16, "/pay", None),
        ];

        let groups = SignalCorrelator::correlate(signals, &DetectionConfig::default());
        assert_eq!(groups.len(), 2);
        assert!(groups[0].start < groups[1].start);
    }

    #[test]
    fn test_route_change_splits_unless_target_is_shared() {
        let split = vec![
            signal(SignalType::RageClick, 0, "/a", Some("x")),
            signal(SignalType::ErrorBurst, 2, "/b", None),
        ];
        assert_eq!(
            SignalCorrelator::correlate(split, &DetectionConfig::default()).len(),
            2
        );

        let linked = vec![
            signal(SignalType::RageClick, 0, "/a", Some("x")),
            signal(SignalType::AdjacentFailure, 2, "/b", Some("x")),
        ];
        assert_eq!(
            SignalCorrelator::correlate(linked, &DetectionConfig::default()).len(),
            1
        );
    }

    #[test]
    fn test_dominant_route_tie_prefers_first_seen() {
        let signals = vec![
            signal(SignalType::RageClick, 0, "/a", Some("x")),
            signal(SignalType::AdjacentFailure, 1, "/b", Some("x")),
        ];
        assert_eq!(dominant_route(&signals), "/a");

        let signals = vec![
            signal(SignalType::RageClick, 0, "/a", Some("x")),
            signal(SignalType::AdjacentFailure, 1, "/b", Some("x")),
            signal(SignalType::ErrorBurst, 2, "/b", Some("x")),
        ];
        assert_eq!(dominant_route(&signals), "/b");
    }

    #[test]
    fn test_no_signals_no_groups() {
        assert!(SignalCorrelator::correlate(Vec::new(), &DetectionConfig::default()).is_empty());
    }
}
