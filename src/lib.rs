//! HawkEye - Session windowing and frustration incident detection
//!
//! HawkEye turns raw UI interaction telemetry into explained frustration
//! incidents through two cooperating parts:
//!
//! - **Session windowing**: groups events per `(project, session)` into windows,
//!   expires them on inactivity, and emits completed sessions over a bounded channel.
//! - **Detection pipeline**: a deterministic pass over one completed session:
//!   classification → candidate detection → qualification → correlation →
//!   scoring → failure point resolution → incident emission.
//!
//! A [`DetectionWorker`] connects the two.

pub mod clock;
pub mod config;
pub mod detection;
pub mod error;
pub mod recorder;
pub mod session;
pub mod types;
pub mod worker;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DetectionConfig, HawkeyeConfig, SessionConfig, SignalWeights};
pub use detection::{detect_frustration, detect_frustration_json, DiscardReason, FrustrationDetector};
pub use error::HawkeyeError;
pub use recorder::{InMemoryRecorder, NoopRecorder, Recorder};
pub use session::{SessionKey, SessionWindowManager};
pub use types::{Event, EventTarget, Incident, Session, SessionState, SignalType};
pub use worker::{CollectingSink, DetectionWorker, IncidentSink, SessionSink, WorkerStats};

/// HawkEye version
pub const HAWKEYE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI and FFI
pub const PRODUCER_NAME: &str = "hawkeye";
