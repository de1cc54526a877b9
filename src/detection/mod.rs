//! Frustration detection pipeline
//!
//! Stages, in order:
//! 1. [`classifier`] assigns categories and orders events
//! 2. [`detector`] finds candidate signals
//! 3. [`qualifier`] filters and deduplicates candidates
//! 4. [`correlator`] groups signals into failure episodes
//! 5. [`scorer`] scores each group and evaluates confidence
//! 6. [`failure_point`] resolves the primary failure point
//! 7. [`emitter`] builds the incident record

pub mod classifier;
pub mod correlator;
pub mod detector;
pub mod emitter;
pub mod failure_point;
pub mod pipeline;
pub mod qualifier;
pub mod scorer;
pub mod tally;

pub use classifier::EventClassifier;
pub use correlator::SignalCorrelator;
pub use detector::CandidateDetector;
pub use emitter::IncidentEmitter;
pub use failure_point::{FailurePoint, FailurePointResolver};
pub use pipeline::{
    detect_frustration, detect_frustration_json, parse_session, DiscardReason, FrustrationDetector,
};
pub use qualifier::{QualificationOutcome, SignalQualifier};
pub use scorer::{FrustrationScorer, GroupAssessment};
