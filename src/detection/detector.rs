//! Candidate signal detection
//!
//! Scans a chronologically ordered, classified session for raw frustration
//! patterns. Every rule runs independently and may fire several times.

use crate::config::DetectionConfig;
use crate::detection::classifier::metadata_number;
use crate::detection::tally::most_frequent;
use crate::types::{CandidateSignal, ClassifiedEvent, EventCategory, SignalEvidence, SignalType};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Detector for candidate frustration signals
pub struct CandidateDetector;

impl CandidateDetector {
    /// Run every detection rule and return candidates ordered by start time
    pub fn detect(events: &[ClassifiedEvent], config: &DetectionConfig) -> Vec<CandidateSignal> {
        let mut candidates = Vec::new();
        candidates.extend(detect_rage_clicks(events, config));
        candidates.extend(detect_navigation_thrash(events, config));
        candidates.extend(detect_error_bursts(events, config));
        candidates.extend(detect_adjacent_failures(events, config));
        candidates.extend(detect_slow_responses(events, config));

        candidates.sort_by_key(|c| (c.timestamp, c.signal_type));
        candidates
    }
}

/// Clusters of at least `min_size` instants that fit inside a sliding `window`.
///
/// Overlapping qualifying windows are merged, so each returned `(first, last)`
/// range is one maximal cluster.
fn sliding_window_clusters(
    times: &[DateTime<Utc>],
    min_size: usize,
    window: Duration,
) -> Vec<(usize, usize)> {
    let mut clusters = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut window_start = 0;

    for end in 0..times.len() {
        while times[end] - times[window_start] > window {
            window_start += 1;
        }
        if end + 1 - window_start < min_size {
            continue;
        }
        current = match current {
            Some((first, last)) if window_start <= last => Some((first, end)),
            previous => {
                clusters.extend(previous);
                Some((window_start, end))
            }
        };
    }

    clusters.extend(current);
    clusters
}

/// Runs of at least `min_size` instants where consecutive gaps stay within `max_gap`
fn gap_clusters(times: &[DateTime<Utc>], min_size: usize, max_gap: Duration) -> Vec<(usize, usize)> {
    let mut clusters = Vec::new();
    if times.is_empty() {
        return clusters;
    }

    let mut run_start = 0;
    for i in 1..=times.len() {
        let breaks = i == times.len() || times[i] - times[i - 1] > max_gap;
        if breaks {
            if i - run_start >= min_size {
                clusters.push((run_start, i - 1));
            }
            run_start = i;
        }
    }
    clusters
}

fn evidence_for(events: &[ClassifiedEvent], indices: Vec<usize>) -> SignalEvidence {
    let interval_ms = match (indices.first(), indices.last()) {
        (Some(&first), Some(&last)) => {
            (events[last].timestamp - events[first].timestamp).num_milliseconds()
        }
        _ => 0,
    };
    SignalEvidence {
        count: indices.len() as u32,
        event_indices: indices,
        interval_ms,
    }
}

/// Repeated clicks on the same target identity within the rage-click window
fn detect_rage_clicks(events: &[ClassifiedEvent], config: &DetectionConfig) -> Vec<CandidateSignal> {
    let mut order: Vec<String> = Vec::new();
    let mut clicks_by_target: HashMap<String, Vec<usize>> = HashMap::new();

    for (index, event) in events.iter().enumerate() {
        if !event.is_click() {
            continue;
        }
        let Some(identity) = event.target().and_then(|t| t.identity()) else {
            continue;
        };
        clicks_by_target
            .entry(identity.clone())
            .or_insert_with(|| {
                order.push(identity);
                Vec::new()
            })
            .push(index);
    }

    let mut candidates = Vec::new();
    for identity in &order {
        let indices = &clicks_by_target[identity];
        let times: Vec<DateTime<Utc>> = indices.iter().map(|&i| events[i].timestamp).collect();

        for (first, last) in sliding_window_clusters(
            &times,
            config.rage_click_min_clicks,
            config.rage_click_window(),
        ) {
            let cluster: Vec<usize> = indices[first..=last].to_vec();
            let head = &events[cluster[0]];
            let tail = &events[cluster[cluster.len() - 1]];
            candidates.push(CandidateSignal {
                signal_type: SignalType::RageClick,
                timestamp: head.timestamp,
                end_timestamp: tail.timestamp,
                route: head.route.clone(),
                target: head.event.target.clone(),
                evidence: evidence_for(events, cluster),
            });
        }
    }
    candidates
}

/// Route changes that return to a route left within the thrash window
fn detect_navigation_thrash(
    events: &[ClassifiedEvent],
    config: &DetectionConfig,
) -> Vec<CandidateSignal> {
    let window = config.navigation_thrash_window();
    let mut current_route: Option<&str> = None;
    let mut left_at: HashMap<&str, DateTime<Utc>> = HashMap::new();
    // (event index, destination route) for each revisiting transition
    let mut revisits: Vec<(usize, &str)> = Vec::new();

    for (index, event) in events.iter().enumerate() {
        let route = event.route.as_str();
        if route.is_empty() {
            continue;
        }
        match current_route {
            Some(previous) if previous != route => {
                left_at.insert(previous, event.timestamp);
                let revisited = left_at
                    .get(route)
                    .map(|left| event.timestamp - *left <= window)
                    .unwrap_or(false);
                if revisited {
                    revisits.push((index, route));
                }
                current_route = Some(route);
            }
            Some(_) => {}
            None => current_route = Some(route),
        }
    }

    let times: Vec<DateTime<Utc>> = revisits.iter().map(|(i, _)| events[*i].timestamp).collect();
    sliding_window_clusters(&times, config.navigation_thrash_min_transitions, window)
        .into_iter()
        .map(|(first, last)| {
            let cluster = &revisits[first..=last];
            let route = most_frequent(cluster.iter().map(|(_, route)| *route))
                .unwrap_or_default()
                .to_string();
            let indices: Vec<usize> = cluster.iter().map(|(i, _)| *i).collect();
            CandidateSignal {
                signal_type: SignalType::NavigationThrash,
                timestamp: events[indices[0]].timestamp,
                end_timestamp: events[indices[indices.len() - 1]].timestamp,
                route,
                target: None,
                evidence: evidence_for(events, indices),
            }
        })
        .collect()
}

/// Several system feedback events on one route in quick succession
fn detect_error_bursts(events: &[ClassifiedEvent], config: &DetectionConfig) -> Vec<CandidateSignal> {
    let mut order: Vec<&str> = Vec::new();
    let mut feedback_by_route: HashMap<&str, Vec<usize>> = HashMap::new();

    for (index, event) in events.iter().enumerate() {
        if event.category != EventCategory::SystemFeedback {
            continue;
        }
        let route = event.route.as_str();
        feedback_by_route
            .entry(route)
            .or_insert_with(|| {
                order.push(route);
                Vec::new()
            })
            .push(index);
    }

    let mut candidates = Vec::new();
    for route in order {
        let indices = &feedback_by_route[route];
        let times: Vec<DateTime<Utc>> = indices.iter().map(|&i| events[i].timestamp).collect();

        for (first, last) in gap_clusters(
            &times,
            config.error_burst_min_errors,
            config.error_burst_window(),
        ) {
            let cluster: Vec<usize> = indices[first..=last].to_vec();
            let head = &events[cluster[0]];
            let tail = &events[cluster[cluster.len() - 1]];
            candidates.push(CandidateSignal {
                signal_type: SignalType::ErrorBurst,
                timestamp: head.timestamp,
                end_timestamp: tail.timestamp,
                route: route.to_string(),
                target: head.event.target.clone(),
                evidence: evidence_for(events, cluster),
            });
        }
    }
    candidates
}

/// An interaction whose very next event is system feedback on the same route
fn detect_adjacent_failures(
    events: &[ClassifiedEvent],
    config: &DetectionConfig,
) -> Vec<CandidateSignal> {
    events
        .windows(2)
        .enumerate()
        .filter_map(|(index, pair)| {
            let (action, feedback) = (&pair[0], &pair[1]);
            let adjacent = action.category == EventCategory::Interaction
                && feedback.category == EventCategory::SystemFeedback
                && action.route == feedback.route
                && feedback.timestamp - action.timestamp <= config.adjacency_window();
            adjacent.then(|| CandidateSignal {
                signal_type: SignalType::AdjacentFailure,
                timestamp: action.timestamp,
                end_timestamp: feedback.timestamp,
                route: action.route.clone(),
                target: action.event.target.clone(),
                evidence: evidence_for(events, vec![index, index + 1]),
            })
        })
        .collect()
}

/// A long task right after an interaction on the same route.
///
/// The task duration comes from `metadata.duration` (or `durationMs`); the
/// threshold from `metadata.threshold` when present.
fn detect_slow_responses(
    events: &[ClassifiedEvent],
    config: &DetectionConfig,
) -> Vec<CandidateSignal> {
    events
        .windows(2)
        .enumerate()
        .filter_map(|(index, pair)| {
            let (action, task) = (&pair[0], &pair[1]);
            if task.category != EventCategory::Performance
                || action.category != EventCategory::Interaction
                || action.route != task.route
            {
                return None;
            }

            let metadata = &task.event.metadata;
            let duration_ms = metadata_number(metadata, "duration")
                .or_else(|| metadata_number(metadata, "durationMs"))?;
            let threshold_ms = metadata_number(metadata, "threshold")
                .unwrap_or(config.slow_response_threshold_ms);
            if duration_ms <= 0.0 || duration_ms <= threshold_ms {
                return None;
            }

            let lookback = Duration::try_milliseconds(duration_ms as i64)?.max(config.adjacency_window());
            if task.timestamp - action.timestamp > lookback {
                return None;
            }

            let mut evidence = evidence_for(events, vec![index, index + 1]);
            evidence.interval_ms = duration_ms as i64;
            Some(CandidateSignal {
                signal_type: SignalType::SlowResponseFrustration,
                timestamp: action.timestamp,
                end_timestamp: task.timestamp,
                route: action.route.clone(),
                target: action.event.target.clone(),
                evidence,
            })
        })
        .collect()
}
