//! Engine configuration
//!
//! Every threshold, window, and weight used by the detection pipeline and the
//! session window manager. All fields default, so partial JSON documents load.

use crate::error::HawkeyeError;
use crate::types::{ConfidenceLevel, SignalType};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound for every configured window and timeout (one year)
pub const MAX_WINDOW_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Millisecond duration, saturating instead of panicking outside chrono's range
fn millis(ms: i64) -> Duration {
    Duration::try_milliseconds(ms).unwrap_or(if ms < 0 { Duration::MIN } else { Duration::MAX })
}

fn unsigned_millis(ms: u64) -> Duration {
    millis(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HawkeyeConfig {
    pub detection: DetectionConfig,
    pub session: SessionConfig,
}

impl HawkeyeConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, HawkeyeError> {
        let config: HawkeyeConfig = serde_json::from_str(json)
            .map_err(|e| HawkeyeError::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, HawkeyeError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, HawkeyeError> {
        serde_json::to_string_pretty(self).map_err(HawkeyeError::JsonError)
    }

    pub fn validate(&self) -> Result<(), HawkeyeError> {
        self.detection.validate()?;
        self.session.validate()
    }
}

/// Base score points per signal type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub rage_click: f64,
    pub error_burst: f64,
    pub navigation_thrash: f64,
    pub adjacent_failure: f64,
    pub slow_response_frustration: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            rage_click: 30.0,
            error_burst: 35.0,
            navigation_thrash: 25.0,
            adjacent_failure: 20.0,
            slow_response_frustration: 15.0,
        }
    }
}

impl SignalWeights {
    pub fn base_points(&self, signal_type: SignalType) -> f64 {
        match signal_type {
            SignalType::RageClick => self.rage_click,
            SignalType::ErrorBurst => self.error_burst,
            SignalType::NavigationThrash => self.navigation_thrash,
            SignalType::AdjacentFailure => self.adjacent_failure,
            SignalType::SlowResponseFrustration => self.slow_response_frustration,
        }
    }
}

/// Thresholds for the frustration detection pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum clicks on one target to form a rage-click cluster
    pub rage_click_min_clicks: usize,
    /// Sliding window for rage-click clustering
    pub rage_click_window_ms: i64,
    /// Clusters spanning longer than this are treated as deliberate clicking
    pub rage_click_max_span_ms: i64,

    /// Minimum revisiting transitions to count as thrash
    pub navigation_thrash_min_transitions: usize,
    /// Window in which revisits are counted
    pub navigation_thrash_window_ms: i64,

    /// Minimum system feedback events on one route for an error burst
    pub error_burst_min_errors: usize,
    /// Maximum gap between consecutive errors in a burst
    pub error_burst_window_ms: i64,

    /// Maximum delay between an action and the failure that follows it
    pub adjacency_window_ms: i64,

    /// Fallback long-task threshold when the event carries none
    pub slow_response_threshold_ms: f64,

    /// Slack allowed when checking candidate overlap for deduplication
    pub dedup_window_ms: i64,

    /// Maximum gap between signals in one group
    pub correlation_window_ms: i64,

    /// Score weights per signal type
    pub weights: SignalWeights,
    /// Fraction of base points granted to each repeated same-type signal
    pub repeat_signal_factor: f64,
    /// Span at which the score starts being scaled down
    pub score_reference_span_sec: f64,
    /// Lower bound of the span scale factor
    pub score_span_floor: f64,

    /// Groups below this level are discarded
    pub min_confidence: ConfidenceLevel,

    /// Routes whose incidents are emitted with `suppressed = true`
    pub suppressed_routes: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            rage_click_min_clicks: 5,
            rage_click_window_ms: 3_000,
            rage_click_max_span_ms: 10_000,
            navigation_thrash_min_transitions: 3,
            navigation_thrash_window_ms: 10_000,
            error_burst_min_errors: 2,
            error_burst_window_ms: 5_000,
            adjacency_window_ms: 2_000,
            slow_response_threshold_ms: 3_000.0,
            dedup_window_ms: 2_000,
            correlation_window_ms: 15_000,
            weights: SignalWeights::default(),
            repeat_signal_factor: 0.5,
            score_reference_span_sec: 120.0,
            score_span_floor: 0.4,
            min_confidence: ConfidenceLevel::High,
            suppressed_routes: Vec::new(),
        }
    }
}

impl DetectionConfig {
    pub fn rage_click_window(&self) -> Duration {
        millis(self.rage_click_window_ms)
    }

    pub fn navigation_thrash_window(&self) -> Duration {
        millis(self.navigation_thrash_window_ms)
    }

    pub fn error_burst_window(&self) -> Duration {
        millis(self.error_burst_window_ms)
    }

    pub fn adjacency_window(&self) -> Duration {
        millis(self.adjacency_window_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        millis(self.dedup_window_ms)
    }

    pub fn correlation_window(&self) -> Duration {
        millis(self.correlation_window_ms)
    }

    pub fn validate(&self) -> Result<(), HawkeyeError> {
        if self.rage_click_min_clicks < 2 {
            return Err(HawkeyeError::InvalidConfig(
                "rage_click_min_clicks must be at least 2".to_string(),
            ));
        }
        if self.navigation_thrash_min_transitions == 0 || self.error_burst_min_errors == 0 {
            return Err(HawkeyeError::InvalidConfig(
                "cluster sizes must be positive".to_string(),
            ));
        }
        let windows = [
            ("rage_click_window_ms", self.rage_click_window_ms),
            ("rage_click_max_span_ms", self.rage_click_max_span_ms),
            ("navigation_thrash_window_ms", self.navigation_thrash_window_ms),
            ("error_burst_window_ms", self.error_burst_window_ms),
            ("adjacency_window_ms", self.adjacency_window_ms),
            ("dedup_window_ms", self.dedup_window_ms),
            ("correlation_window_ms", self.correlation_window_ms),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, value)| *value < 0) {
            return Err(HawkeyeError::InvalidConfig(format!(
                "{name} must not be negative"
            )));
        }
        if let Some((name, _)) = windows.iter().find(|(_, value)| *value > MAX_WINDOW_MS) {
            return Err(HawkeyeError::InvalidConfig(format!(
                "{name} must not exceed {MAX_WINDOW_MS}"
            )));
        }
        if !(0.0..=1.0).contains(&self.repeat_signal_factor) {
            return Err(HawkeyeError::InvalidConfig(
                "repeat_signal_factor must be within 0-1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.score_span_floor) {
            return Err(HawkeyeError::InvalidConfig(
                "score_span_floor must be within 0-1".to_string(),
            ));
        }
        if self.score_reference_span_sec <= 0.0 {
            return Err(HawkeyeError::InvalidConfig(
                "score_reference_span_sec must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timing for the session window manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity after which an active session is marked idle
    pub idle_after_ms: u64,
    /// Inactivity after which a session completes and is emitted
    pub idle_timeout_ms: u64,
    /// Interval of the background sweep
    pub sweep_interval_ms: u64,
    /// Capacity of the completed-session channel
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_after_ms: 5 * 60 * 1000,
            idle_timeout_ms: 30 * 60 * 1000,
            sweep_interval_ms: 15_000,
            channel_capacity: 1024,
        }
    }
}

impl SessionConfig {
    pub fn idle_after(&self) -> Duration {
        unsigned_millis(self.idle_after_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        unsigned_millis(self.idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<(), HawkeyeError> {
        if self.idle_timeout_ms == 0 {
            return Err(HawkeyeError::InvalidConfig(
                "idle_timeout_ms must be positive".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(HawkeyeError::InvalidConfig(
                "sweep_interval_ms must be positive".to_string(),
            ));
        }
        let timings = [
            ("idle_after_ms", self.idle_after_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
        ];
        if let Some((name, _)) = timings.iter().find(|(_, value)| *value > MAX_WINDOW_MS as u64) {
            return Err(HawkeyeError::InvalidConfig(format!(
                "{name} must not exceed {MAX_WINDOW_MS}"
            )));
        }
        if self.channel_capacity == 0 {
            return Err(HawkeyeError::InvalidConfig(
                "channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{
            "detection": { "rage_click_min_clicks": 4, "min_confidence": "Medium" },
            "session": { "idle_timeout_ms": 60000 }
        }"#;

        let config = HawkeyeConfig::from_json(json).unwrap();
        assert_eq!(config.detection.rage_click_min_clicks, 4);
        assert_eq!(config.detection.min_confidence, ConfidenceLevel::Medium);
        assert_eq!(config.detection.rage_click_window_ms, 3_000);
        assert_eq!(config.session.idle_timeout_ms, 60_000);
        assert_eq!(config.session.sweep_interval_ms, 15_000);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = HawkeyeConfig::default();
        let json = config.to_json().unwrap();
        let parsed = HawkeyeConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let json = r#"{ "session": { "sweep_interval_ms": 0 } }"#;
        assert!(HawkeyeConfig::from_json(json).is_err());

        let json = r#"{ "detection": { "repeat_signal_factor": 1.5 } }"#;
        assert!(HawkeyeConfig::from_json(json).is_err());

        assert!(HawkeyeConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_oversized_timings_rejected() {
        let json = r#"{ "session": { "idle_timeout_ms": 9223372036854775808 } }"#;
        let err = HawkeyeConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("idle_timeout_ms"));

        let json = r#"{ "session": { "idle_after_ms": 18446744073709551615 } }"#;
        assert!(HawkeyeConfig::from_json(json).is_err());

        let json = r#"{ "detection": { "dedup_window_ms": 9223372036854775807 } }"#;
        let err = HawkeyeConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("dedup_window_ms"));
    }

    #[test]
    fn test_duration_accessors_saturate() {
        let session = SessionConfig {
            idle_after_ms: 1 << 63,
            idle_timeout_ms: u64::MAX,
            ..SessionConfig::default()
        };
        assert_eq!(session.idle_after(), Duration::MAX);
        assert_eq!(session.idle_timeout(), Duration::MAX);

        let detection = DetectionConfig {
            dedup_window_ms: i64::MIN,
            correlation_window_ms: i64::MAX,
            ..DetectionConfig::default()
        };
        assert_eq!(detection.dedup_window(), Duration::MIN);
        assert_eq!(detection.correlation_window(), Duration::MAX);
    }

    #[test]
    fn test_default_weights() {
        let weights = SignalWeights::default();
        assert_eq!(weights.base_points(SignalType::RageClick), 30.0);
        assert_eq!(weights.base_points(SignalType::ErrorBurst), 35.0);
        assert_eq!(weights.base_points(SignalType::NavigationThrash), 25.0);
        assert_eq!(weights.base_points(SignalType::AdjacentFailure), 20.0);
        assert_eq!(weights.base_points(SignalType::SlowResponseFrustration), 15.0);
    }
}
