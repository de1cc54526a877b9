//! Primary failure point resolution

use crate::detection::tally::unique_most_frequent;
use crate::types::{EventTarget, QualifiedSignal, SignalGroup};
use std::fmt;

/// Where a group's failure is concentrated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePoint {
    Route(String),
    /// Human-readable target descriptor
    Target(String),
}

impl FailurePoint {
    pub fn as_str(&self) -> &str {
        match self {
            FailurePoint::Route(route) => route,
            FailurePoint::Target(target) => target,
        }
    }

    pub fn is_route(&self) -> bool {
        matches!(self, FailurePoint::Route(_))
    }
}

impl fmt::Display for FailurePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolver for a group's primary failure point
pub struct FailurePointResolver;

impl FailurePointResolver {
    /// Resolve the failure point, or `None` when it is ambiguous.
    ///
    /// A single shared target across several routes wins outright. Otherwise the
    /// route with the strictly highest signal count is chosen; a tie falls back to
    /// a strictly most frequent target.
    pub fn resolve(group: &SignalGroup) -> Option<FailurePoint> {
        if let Some(target) = shared_target_across_routes(&group.signals) {
            return Some(FailurePoint::Target(target));
        }

        let route = unique_most_frequent(
            group
                .signals
                .iter()
                .map(|s| s.route().trim())
                .filter(|route| !route.is_empty()),
        );
        if let Some(route) = route {
            return Some(FailurePoint::Route(route.to_string()));
        }

        let identity =
            unique_most_frequent(group.signals.iter().filter_map(|s| s.candidate.target_identity()))?;
        group
            .signals
            .iter()
            .filter_map(|s| s.candidate.target.as_ref())
            .find(|target| target.identity().as_deref() == Some(identity.as_str()))
            .map(|target| FailurePoint::Target(describe(target, &identity)))
    }
}

/// Target descriptor when every signal carries the same target and the routes differ
fn shared_target_across_routes(signals: &[QualifiedSignal]) -> Option<String> {
    let first = signals.first()?.candidate.target.as_ref()?;
    let identity = first.identity()?;

    let all_share = signals
        .iter()
        .all(|s| s.candidate.target_identity().as_deref() == Some(identity.as_str()));
    if !all_share {
        return None;
    }

    let mut routes: Vec<&str> = signals
        .iter()
        .map(|s| s.route().trim())
        .filter(|route| !route.is_empty())
        .collect();
    routes.sort_unstable();
    routes.dedup();

    (routes.len() > 1).then(|| describe(first, &identity))
}

fn describe(target: &EventTarget, identity: &str) -> String {
    target.descriptor().unwrap_or_else(|| identity.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateSignal, SignalEvidence, SignalType};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn signal(secs: i64, route: &str, target: Option<&str>) -> QualifiedSignal {
        QualifiedSignal {
            candidate: CandidateSignal {
                signal_type: SignalType::AdjacentFailure,
                timestamp: base() + Duration::seconds(secs),
                end_timestamp: base() + Duration::seconds(secs),
                route: route.to_string(),
                target: target.map(|id| EventTarget {
                    id: Some(id.to_string()),
                    tag_name: Some("BUTTON".to_string()),
                    ..Default::default()
                }),
                evidence: SignalEvidence::default(),
            },
            failure_status: None,
            failure_message: None,
        }
    }

    fn group(signals: Vec<QualifiedSignal>) -> SignalGroup {
        SignalGroup {
            start: base(),
            end: base(),
            dominant_route: signals
                .first()
                .map(|s| s.route().to_string())
                .unwrap_or_default(),
            signals,
        }
    }

    #[test]
    fn test_most_frequent_route_wins() {
        let g = group(vec![
            signal(0, "/cart", None),
            signal(1, "/pay", None),
            signal(2, "/pay", None),
        ]);
        assert_eq!(
            FailurePointResolver::resolve(&g),
            Some(FailurePoint::Route("/pay".to_string()))
        );
    }

    #[test]
    fn test_shared_target_across_routes() {
        let g = group(vec![
            signal(0, "/cart", Some("pay")),
            signal(1, "/pay", Some("pay")),
        ]);
        assert_eq!(
            FailurePointResolver::resolve(&g),
            Some(FailurePoint::Target("button#pay".to_string()))
        );
    }

    #[test]
    fn test_shared_target_on_one_route_resolves_to_route() {
        let g = group(vec![
            signal(0, "/pay", Some("pay")),
            signal(1, "/pay", Some("pay")),
        ]);
        assert_eq!(
            FailurePointResolver::resolve(&g),
            Some(FailurePoint::Route("/pay".to_string()))
        );
    }

    #[test]
    fn test_route_tie_falls_back_to_target() {
        let g = group(vec![
            signal(0, "/a", Some("retry")),
            signal(1, "/b", Some("retry")),
            signal(2, "/b", None),
            signal(3, "/a", Some("close")),
        ]);
        assert_eq!(
            FailurePointResolver::resolve(&g),
            Some(FailurePoint::Target("button#retry".to_string()))
        );
    }

    #[test]
    fn test_full_tie_is_ambiguous() {
        let g = group(vec![signal(0, "/a", None), signal(1, "/b", None)]);
        assert_eq!(FailurePointResolver::resolve(&g), None);

        let empty = group(vec![signal(0, "", None)]);
        assert_eq!(FailurePointResolver::resolve(&empty), None);
    }
}
