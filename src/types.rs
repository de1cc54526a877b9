//! Core data types
//!
//! This module defines the events, sessions, signals, and incidents that flow through
//! the session window manager and the frustration detection pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Ingested events
// ============================================================================

/// The DOM element (or equivalent) an event was raised against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTarget {
    /// Element kind reported by the SDK (e.g. "button")
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    /// Element id attribute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// CSS selector path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Tag name (e.g. "BUTTON")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
}

impl EventTarget {
    /// Identity used to decide whether two events hit the same element.
    ///
    /// Resolution order is id, then selector, then type. Empty strings are skipped.
    pub fn identity(&self) -> Option<String> {
        non_empty(&self.id)
            .map(|id| format!("id:{id}"))
            .or_else(|| non_empty(&self.selector).map(|s| format!("selector:{s}")))
            .or_else(|| non_empty(&self.target_type).map(|t| format!("type:{t}")))
    }

    /// Short human-readable description (e.g. `button#checkout`)
    pub fn descriptor(&self) -> Option<String> {
        let kind = non_empty(&self.tag_name)
            .map(|t| t.to_lowercase())
            .or_else(|| non_empty(&self.target_type).map(str::to_string));

        match (kind, non_empty(&self.id), non_empty(&self.selector)) {
            (Some(kind), Some(id), _) => Some(format!("{kind}#{id}")),
            (None, Some(id), _) => Some(format!("#{id}")),
            (_, None, Some(selector)) => Some(selector.to_string()),
            (Some(kind), None, None) => Some(kind),
            (None, None, None) => None,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// A raw UI telemetry event as sent by the client SDK
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event type tag (e.g. "click", "network_error")
    pub event_type: String,
    /// RFC3339 timestamp (nanosecond precision allowed) or epoch milliseconds
    pub timestamp: String,
    /// Session the SDK attributed this event to
    #[serde(default)]
    pub session_id: String,
    /// Route (path) active when the event fired
    #[serde(default)]
    pub route: String,
    /// Target element, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EventTarget>,
    /// Open, producer-defined metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Deployment environment (e.g. "production")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Producer-assigned key used upstream for de-duplication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Event {
    /// Create an event with the given type and timestamp
    pub fn new(event_type: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: timestamp.into(),
            session_id: String::new(),
            route: String::new(),
            target: None,
            metadata: HashMap::new(),
            environment: None,
            idempotency_key: None,
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    pub fn with_target(mut self, target: EventTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

/// Behavioral category assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Interaction,
    SystemFeedback,
    Navigation,
    Performance,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Interaction => "interaction",
            EventCategory::SystemFeedback => "system_feedback",
            EventCategory::Navigation => "navigation",
            EventCategory::Performance => "performance",
        }
    }
}

/// An event with its category and resolved instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedEvent {
    /// Source event
    pub event: Event,
    /// Assigned category
    pub category: EventCategory,
    /// Resolved absolute timestamp
    pub timestamp: DateTime<Utc>,
    /// Route the event fired on
    pub route: String,
    /// Position of the event in the session's insertion order
    pub arrival_index: usize,
}

impl ClassifiedEvent {
    pub fn event_type(&self) -> &str {
        &self.event.event_type
    }

    pub fn is_click(&self) -> bool {
        self.category == EventCategory::Interaction && self.event.event_type == "click"
    }

    pub fn target(&self) -> Option<&EventTarget> {
        self.event.target.as_ref()
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Lifecycle state of a session window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Idle,
    Completed,
}

impl SessionState {
    /// Whether the window may move from `self` to `next`.
    ///
    /// `Completed` is terminal. An idle window re-activates when new events arrive.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Active, SessionState::Idle)
                | (SessionState::Active, SessionState::Completed)
                | (SessionState::Idle, SessionState::Completed)
                | (SessionState::Idle, SessionState::Active)
        )
    }
}

/// A change of route observed within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTransition {
    pub from: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
}

/// A bounded window of events from one user visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier
    pub session_id: String,
    /// Owning project
    pub project_id: String,
    /// Lifecycle state
    pub state: SessionState,
    /// Events in insertion order
    #[serde(default)]
    pub events: Vec<Event>,
    /// Arrival time of the first event
    pub start_time: DateTime<Utc>,
    /// Set when the session completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Arrival time of the most recent event batch
    pub last_activity: DateTime<Utc>,
    /// Route changes in the order they were observed
    #[serde(default)]
    pub route_transitions: Vec<RouteTransition>,
    /// Session-level metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    /// Create an empty active session
    pub fn new(
        project_id: impl Into<String>,
        session_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project_id: project_id.into(),
            state: SessionState::Active,
            events: Vec::new(),
            start_time: started_at,
            end_time: None,
            last_activity: started_at,
            route_transitions: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Wall-clock extent of the session (end time, else last activity)
    pub fn duration_sec(&self) -> f64 {
        let end = self.end_time.unwrap_or(self.last_activity);
        (end - self.start_time).num_milliseconds().max(0) as f64 / 1000.0
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Kinds of frustration signal the detector recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    RageClick,
    ErrorBurst,
    NavigationThrash,
    AdjacentFailure,
    SlowResponseFrustration,
}

impl SignalType {
    pub const ALL: [SignalType; 5] = [
        SignalType::RageClick,
        SignalType::ErrorBurst,
        SignalType::NavigationThrash,
        SignalType::AdjacentFailure,
        SignalType::SlowResponseFrustration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::RageClick => "rage_click",
            SignalType::ErrorBurst => "error_burst",
            SignalType::NavigationThrash => "navigation_thrash",
            SignalType::AdjacentFailure => "adjacent_failure",
            SignalType::SlowResponseFrustration => "slow_response_frustration",
        }
    }

    /// Phrase used when rendering explanations
    pub fn label(&self) -> &'static str {
        match self {
            SignalType::RageClick => "rage clicking",
            SignalType::ErrorBurst => "an error burst",
            SignalType::NavigationThrash => "navigation thrashing",
            SignalType::AdjacentFailure => "an action that failed immediately",
            SignalType::SlowResponseFrustration => "a slow response after an action",
        }
    }
}

/// Supporting evidence attached to a candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalEvidence {
    /// Indices into the classified event list
    pub event_indices: Vec<usize>,
    /// Number of contributing events or transitions
    pub count: u32,
    /// Span covered by the evidence, in milliseconds
    pub interval_ms: i64,
}

/// A raw behavioral pattern found by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub signal_type: SignalType,
    /// First contributing event
    pub timestamp: DateTime<Utc>,
    /// Last contributing event
    pub end_timestamp: DateTime<Utc>,
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EventTarget>,
    pub evidence: SignalEvidence,
}

impl CandidateSignal {
    pub fn span_ms(&self) -> i64 {
        (self.end_timestamp - self.timestamp).num_milliseconds()
    }

    pub fn target_identity(&self) -> Option<String> {
        self.target.as_ref().and_then(EventTarget::identity)
    }
}

/// A candidate that survived qualification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifiedSignal {
    /// Source candidate
    pub candidate: CandidateSignal,
    /// HTTP status backing a failure-type signal, when one was reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_status: Option<u16>,
    /// Error message backing a failure-type signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl QualifiedSignal {
    pub fn signal_type(&self) -> SignalType {
        self.candidate.signal_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.candidate.timestamp
    }

    pub fn route(&self) -> &str {
        &self.candidate.route
    }
}

/// Signals believed to describe one failure episode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalGroup {
    pub signals: Vec<QualifiedSignal>,
    /// Earliest signal start
    pub start: DateTime<Utc>,
    /// Latest signal end
    pub end: DateTime<Utc>,
    /// Route carried by the most signals
    pub dominant_route: String,
}

impl SignalGroup {
    pub fn span_sec(&self) -> f64 {
        (self.end - self.start).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn signal_types(&self) -> Vec<SignalType> {
        let mut types: Vec<SignalType> = Vec::new();
        for signal in &self.signals {
            if !types.contains(&signal.signal_type()) {
                types.push(signal.signal_type());
            }
        }
        types
    }
}

// ============================================================================
// Incidents
// ============================================================================

/// Confidence band derived from the confidence score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

/// Severity band derived from the frustration score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityType {
    Minor,
    Moderate,
    Major,
    Critical,
}

impl SeverityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityType::Minor => "minor",
            SeverityType::Moderate => "moderate",
            SeverityType::Major => "major",
            SeverityType::Critical => "critical",
        }
    }
}

/// Triage status of an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Open,
    Acknowledged,
    Resolved,
}

/// Per-signal breakdown stored on an incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalDetail {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub timestamp: DateTime<Utc>,
    pub route: String,
    pub details: BTreeMap<String, serde_json::Value>,
}

/// A scored, explained frustration incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub incident_id: String,
    pub session_id: String,
    pub project_id: String,
    /// 0-100
    pub frustration_score: u8,
    pub confidence_level: ConfidenceLevel,
    /// 0-100
    pub confidence_score: f64,
    pub triggering_signals: Vec<SignalType>,
    pub primary_failure_point: String,
    pub severity_type: SeverityType,
    /// Start of the failure episode
    pub timestamp: DateTime<Utc>,
    pub explanation: String,
    pub signal_details: Vec<SignalDetail>,
    pub status: IncidentStatus,
    pub suppressed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
