//! Frustration detection pipeline orchestration
//!
//! This module provides the public API for frustration detection. It runs a
//! completed session through classification, detection, qualification,
//! correlation, scoring, failure point resolution, and incident emission.

use crate::clock::Clock;
use crate::config::DetectionConfig;
use crate::detection::classifier::EventClassifier;
use crate::detection::correlator::SignalCorrelator;
use crate::detection::detector::CandidateDetector;
use crate::detection::emitter::IncidentEmitter;
use crate::detection::failure_point::FailurePointResolver;
use crate::detection::qualifier::SignalQualifier;
use crate::detection::scorer::FrustrationScorer;
use crate::error::HawkeyeError;
use crate::recorder::{
    NoopRecorder, Recorder, INCIDENTS_DETECTED, PROCESSING_LATENCY, SESSIONS_PROCESSED,
    SIGNALS_DETECTED, SIGNALS_DISCARDED,
};
use crate::types::{Incident, Session, SignalGroup};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Why signals were dropped before becoming an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    QualificationFailed,
    CorrelationFailed,
    LowConfidence,
    AmbiguousFailurePoint,
    ExplanationFailed,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::QualificationFailed => "qualification_failed",
            DiscardReason::CorrelationFailed => "correlation_failed",
            DiscardReason::LowConfidence => "low_confidence",
            DiscardReason::AmbiguousFailurePoint => "ambiguous_failure_point",
            DiscardReason::ExplanationFailed => "explanation_failed",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless frustration detector.
///
/// Holds configuration and injected collaborators only, so one instance can be
/// shared across threads and invoked concurrently.
#[derive(Clone)]
pub struct FrustrationDetector {
    config: DetectionConfig,
    recorder: Arc<dyn Recorder>,
    /// Source of `createdAt/updatedAt`; the session's own end when unset
    clock: Option<Arc<dyn Clock>>,
}

impl Default for FrustrationDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

impl FrustrationDetector {
    /// Create a detector with a no-op recorder and no clock.
    ///
    /// Without a clock, incidents are stamped with the session's end time
    /// (or last activity), so repeated runs yield identical incidents.
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            recorder: Arc::new(NoopRecorder),
            clock: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Detect incidents in a completed session.
    ///
    /// Never fails: every rejection is recorded as a discard with its reason.
    pub fn detect(&self, session: &Session) -> Vec<Incident> {
        let started = Instant::now();
        let incidents = self.run(session);

        self.recorder.increment_counter(SESSIONS_PROCESSED, &[]);
        self.recorder
            .observe_histogram(PROCESSING_LATENCY, &[], started.elapsed().as_secs_f64());
        log::debug!(
            "session {}/{}: {} incident(s)",
            session.project_id,
            session.session_id,
            incidents.len()
        );
        incidents
    }

    fn run(&self, session: &Session) -> Vec<Incident> {
        // Stage 1: Classify and order events
        let classified = EventClassifier::classify(&session.events);
        log::debug!(
            "classified {}/{} events for session {}",
            classified.len(),
            session.events.len(),
            session.session_id
        );
        if classified.is_empty() {
            return Vec::new();
        }

        // Stage 2: Detect candidate signals
        let candidates = CandidateDetector::detect(&classified, &self.config);
        for candidate in &candidates {
            self.recorder
                .increment_counter(SIGNALS_DETECTED, &[("type", candidate.signal_type.as_str())]);
        }
        log::debug!("{} candidate signal(s)", candidates.len());
        if candidates.is_empty() {
            return Vec::new();
        }

        // Stage 3: Qualify candidates
        let outcome = SignalQualifier::qualify(candidates, &classified, &self.config);
        self.discard(DiscardReason::QualificationFailed, outcome.discarded);
        log::debug!(
            "{} qualified, {} discarded",
            outcome.qualified.len(),
            outcome.discarded
        );
        if outcome.qualified.is_empty() {
            return Vec::new();
        }

        // Stage 4: Correlate into groups
        let qualified_count = outcome.qualified.len();
        let groups = SignalCorrelator::correlate(outcome.qualified, &self.config);
        if groups.is_empty() {
            self.discard(DiscardReason::CorrelationFailed, qualified_count);
            return Vec::new();
        }
        log::debug!("{} signal group(s)", groups.len());

        let now = match &self.clock {
            Some(clock) => clock.now(),
            None => session.end_time.unwrap_or(session.last_activity),
        };
        groups
            .iter()
            .enumerate()
            .filter_map(|(ordinal, group)| self.process_group(session, ordinal, group, now))
            .collect()
    }

    fn process_group(
        &self,
        session: &Session,
        ordinal: usize,
        group: &SignalGroup,
        now: DateTime<Utc>,
    ) -> Option<Incident> {
        // Stage 5: Score and gate on confidence
        let assessment = FrustrationScorer::assess(group, &self.config);
        if assessment.confidence_level < self.config.min_confidence {
            log::debug!(
                "group {ordinal} gated: confidence {:.0} ({:?})",
                assessment.confidence_score,
                assessment.confidence_level
            );
            self.discard(DiscardReason::LowConfidence, group.signals.len());
            return None;
        }

        // Stage 6: Resolve the primary failure point
        let Some(failure_point) = FailurePointResolver::resolve(group) else {
            log::debug!("group {ordinal} has no unambiguous failure point");
            self.discard(DiscardReason::AmbiguousFailurePoint, group.signals.len());
            return None;
        };

        // Stage 7: Emit the incident
        let Some(incident) = IncidentEmitter::emit(
            session,
            ordinal,
            group,
            &assessment,
            &failure_point,
            &self.config,
            now,
        ) else {
            // Resolution always leaves a signal at the failure point
            self.discard(DiscardReason::ExplanationFailed, group.signals.len());
            return None;
        };

        self.recorder.increment_counter(
            INCIDENTS_DETECTED,
            &[("severity", incident.severity_type.as_str())],
        );
        Some(incident)
    }

    fn discard(&self, reason: DiscardReason, count: usize) {
        for _ in 0..count {
            self.recorder
                .increment_counter(SIGNALS_DISCARDED, &[("reason", reason.as_str())]);
        }
    }
}

/// Detect incidents with the default configuration (stateless, one-shot).
pub fn detect_frustration(session: &Session) -> Vec<Incident> {
    FrustrationDetector::default().detect(session)
}

/// Run detection over a session JSON document and return the incidents as a JSON array.
///
/// # Example
/// ```ignore
/// let incidents_json = detect_frustration_json(&session_json)?;
/// ```
pub fn detect_frustration_json(session_json: &str) -> Result<String, HawkeyeError> {
    let session = parse_session(session_json)?;
    let incidents = detect_frustration(&session);
    Ok(serde_json::to_string(&incidents)?)
}

/// Parse a session JSON document, rejecting sessions without a project or session ID
pub fn parse_session(session_json: &str) -> Result<Session, HawkeyeError> {
    let session: Session = serde_json::from_str(session_json)
        .map_err(|e| HawkeyeError::ParseError(format!("invalid session: {e}")))?;
    if session.project_id.trim().is_empty() {
        return Err(HawkeyeError::InvalidSession("projectId is empty".to_string()));
    }
    if session.session_id.trim().is_empty() {
        return Err(HawkeyeError::InvalidSession("sessionId is empty".to_string()));
    }
    Ok(session)
}
