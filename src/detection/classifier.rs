//! Event classification
//!
//! Assigns each raw event a behavioral category, resolves its timestamp, and puts
//! the session in chronological order.

use crate::types::{ClassifiedEvent, Event, EventCategory};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// HTTP status at or above which a response counts as a failure
const FAILURE_STATUS_MIN: f64 = 400.0;

/// Classifier for raw session events
pub struct EventClassifier;

impl EventClassifier {
    /// Classify events and sort them by resolved timestamp.
    ///
    /// Events whose timestamp cannot be resolved are dropped. The sort is stable,
    /// so events sharing an instant keep their arrival order.
    pub fn classify(events: &[Event]) -> Vec<ClassifiedEvent> {
        let mut classified: Vec<ClassifiedEvent> = events
            .iter()
            .enumerate()
            .filter_map(|(arrival_index, event)| {
                let timestamp = resolve_timestamp(&event.timestamp)?;
                Some(ClassifiedEvent {
                    event: event.clone(),
                    category: categorize(&event.event_type, &event.metadata),
                    timestamp,
                    route: event.route.clone(),
                    arrival_index,
                })
            })
            .collect();

        classified.sort_by_key(|e| e.timestamp);
        classified
    }
}

/// Resolve an RFC3339 (nanosecond precision allowed) or epoch-millisecond timestamp
pub fn resolve_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let millis: i64 = raw.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Map an event type (and its metadata, for unknown types) to a category
pub fn categorize(event_type: &str, metadata: &HashMap<String, Value>) -> EventCategory {
    match event_type {
        "click" | "input" | "scroll" | "form_submit" => EventCategory::Interaction,
        "error" | "network_error" | "network_success" | "slow_response" => {
            EventCategory::SystemFeedback
        }
        "navigation" | "route_change" => EventCategory::Navigation,
        "long_task" | "performance" | "loading" => EventCategory::Performance,
        _ => {
            let failed_status = metadata_number(metadata, "status")
                .map(|status| status >= FAILURE_STATUS_MIN)
                .unwrap_or(false);
            if failed_status || metadata.contains_key("error") {
                EventCategory::SystemFeedback
            } else {
                EventCategory::Interaction
            }
        }
    }
}

/// Read a numeric metadata value, accepting numbers and numeric strings
pub fn metadata_number(metadata: &HashMap<String, Value>, key: &str) -> Option<f64> {
    match metadata.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|value| value.is_finite())
}

/// HTTP status carried in metadata, if it is a valid status code
pub fn metadata_status(metadata: &HashMap<String, Value>) -> Option<u16> {
    metadata_number(metadata, "status")
        .filter(|status| (0.0..=u16::MAX as f64).contains(status))
        .map(|status| status as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_metadata() -> HashMap<String, Value> {
        HashMap::new()
    }

    #[test]
    fn test_category_table() {
        let table = [
            ("click", EventCategory::Interaction),
            ("input", EventCategory::Interaction),
            ("scroll", EventCategory::Interaction),
            ("form_submit", EventCategory::Interaction),
            ("error", EventCategory::SystemFeedback),
            ("network_error", EventCategory::SystemFeedback),
            ("network_success", EventCategory::SystemFeedback),
            ("slow_response", EventCategory::SystemFeedback),
            ("navigation", EventCategory::Navigation),
            ("route_change", EventCategory::Navigation),
            ("long_task", EventCategory::Performance),
            ("performance", EventCategory::Performance),
            ("loading", EventCategory::Performance),
        ];

        for (event_type, expected) in table {
            assert_eq!(categorize(event_type, &no_metadata()), expected, "{event_type}");
        }
    }

    #[test]
    fn test_unknown_type_defaults_to_interaction() {
        assert_eq!(
            categorize("hover", &no_metadata()),
            EventCategory::Interaction
        );

        let mut ok_status = HashMap::new();
        ok_status.insert("status".to_string(), json!(200));
        assert_eq!(categorize("fetch", &ok_status), EventCategory::Interaction);
    }

    #[test]
    fn test_unknown_type_with_failure_metadata() {
        let mut status = HashMap::new();
        status.insert("status".to_string(), json!(503));
        assert_eq!(categorize("fetch", &status), EventCategory::SystemFeedback);

        let mut string_status = HashMap::new();
        string_status.insert("status".to_string(), json!("404"));
        assert_eq!(
            categorize("fetch", &string_status),
            EventCategory::SystemFeedback
        );

        let mut error = HashMap::new();
        error.insert("error".to_string(), json!("boom"));
        assert_eq!(categorize("custom", &error), EventCategory::SystemFeedback);
    }

    #[test]
    fn test_resolve_timestamp_formats() {
        let rfc = resolve_timestamp("2024-01-15T14:00:00.123456789Z").unwrap();
        assert_eq!(rfc.timestamp_subsec_nanos(), 123_456_789);

        let offset = resolve_timestamp("2024-01-15T16:00:00+02:00").unwrap();
        assert_eq!(offset, resolve_timestamp("2024-01-15T14:00:00Z").unwrap());

        let millis = resolve_timestamp("1705327200000").unwrap();
        assert_eq!(millis, resolve_timestamp("2024-01-15T14:00:00Z").unwrap());

        assert!(resolve_timestamp("yesterday").is_none());
        assert!(resolve_timestamp("").is_none());
    }

    #[test]
    fn test_classify_sorts_and_drops_unparseable() {
        let events = vec![
            Event::new("click", "2024-01-15T14:00:02Z"),
            Event::new("error", "not-a-time"),
            Event::new("scroll", "2024-01-15T14:00:01Z"),
            Event::new("navigation", "1705327200000"),
        ];

        let classified = EventClassifier::classify(&events);
        assert_eq!(classified.len(), 3);
        let types: Vec<&str> = classified.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["navigation", "scroll", "click"]);
        assert_eq!(classified[0].arrival_index, 3);
        assert!(classified
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[test]
    fn test_classify_is_stable_for_equal_timestamps() {
        let events = vec![
            Event::new("click", "2024-01-15T14:00:05Z").with_route("/a"),
            Event::new("click", "2024-01-15T14:00:01Z").with_route("/early"),
            Event::new("input", "2024-01-15T14:00:05Z").with_route("/b"),
            Event::new("scroll", "2024-01-15T14:00:05Z").with_route("/c"),
        ];

        let classified = EventClassifier::classify(&events);
        let order: Vec<usize> = classified.iter().map(|e| e.arrival_index).collect();
        assert_eq!(order, vec![1, 0, 2, 3]);
    }

    #[test]
    fn test_metadata_status() {
        let mut metadata = HashMap::new();
        metadata.insert("status".to_string(), json!(502));
        assert_eq!(metadata_status(&metadata), Some(502));

        metadata.insert("status".to_string(), json!("oops"));
        assert_eq!(metadata_status(&metadata), None);

        metadata.insert("status".to_string(), json!(-1));
        assert_eq!(metadata_status(&metadata), None);
    }
}
