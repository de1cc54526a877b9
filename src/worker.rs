//! Detection worker
//!
//! Consumes completed sessions from the window manager's emission channel, runs
//! the detection pipeline on each, and hands the results to sinks.

use crate::detection::FrustrationDetector;
use crate::error::HawkeyeError;
use crate::types::{Incident, Session};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Destination for detected incidents (persistence, alerting)
pub trait IncidentSink: Send + Sync {
    fn publish(&self, incident: Incident) -> Result<(), HawkeyeError>;
}

/// Destination for every completed session (archival)
pub trait SessionSink: Send + Sync {
    fn archive(&self, session: &Session) -> Result<(), HawkeyeError>;
}

/// Sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    incidents: Mutex<Vec<Incident>>,
    sessions: Mutex<Vec<Session>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents.lock().clone()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().clone()
    }
}

impl IncidentSink for CollectingSink {
    fn publish(&self, incident: Incident) -> Result<(), HawkeyeError> {
        self.incidents.lock().push(incident);
        Ok(())
    }
}

impl SessionSink for CollectingSink {
    fn archive(&self, session: &Session) -> Result<(), HawkeyeError> {
        self.sessions.lock().push(session.clone());
        Ok(())
    }
}

/// Totals reported when the worker exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub sessions: usize,
    pub incidents: usize,
    pub sink_errors: usize,
}

/// Handle to a running detection worker
pub struct DetectionWorker {
    handle: JoinHandle<WorkerStats>,
    cancel_token: CancellationToken,
}

impl DetectionWorker {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// It runs until the channel closes or `cancel_token` is cancelled.
    pub fn spawn(
        receiver: mpsc::Receiver<Session>,
        detector: Arc<FrustrationDetector>,
        sink: Arc<dyn IncidentSink>,
        session_sink: Option<Arc<dyn SessionSink>>,
        cancel_token: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(detection_loop(
            receiver,
            detector,
            sink,
            session_sink,
            cancel_token.clone(),
        ));
        Self {
            handle,
            cancel_token,
        }
    }

    /// Cancel and wait. Sessions still queued are left unprocessed.
    pub async fn stop(self) -> WorkerStats {
        self.cancel_token.cancel();
        self.join().await
    }

    /// Wait for the worker to drain a closed channel
    pub async fn join(self) -> WorkerStats {
        match self.handle.await {
            Ok(stats) => stats,
            Err(err) => {
                log::warn!("detection worker failed to join: {err}");
                WorkerStats::default()
            }
        }
    }
}

async fn detection_loop(
    mut receiver: mpsc::Receiver<Session>,
    detector: Arc<FrustrationDetector>,
    sink: Arc<dyn IncidentSink>,
    session_sink: Option<Arc<dyn SessionSink>>,
    cancel_token: CancellationToken,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    loop {
        let session = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log::info!("detection worker shutting down");
                break;
            }
            next = receiver.recv() => match next {
                Some(session) => session,
                None => {
                    log::info!("emission channel closed, detection worker exiting");
                    break;
                }
            },
        };

        stats.sessions += 1;
        if let Some(archive) = &session_sink {
            if let Err(err) = archive.archive(&session) {
                log::warn!("failed to archive session {}: {err}", session.session_id);
                stats.sink_errors += 1;
            }
        }

        for incident in detector.detect(&session) {
            let incident_id = incident.incident_id.clone();
            match sink.publish(incident) {
                Ok(()) => stats.incidents += 1,
                Err(err) => {
                    log::warn!("failed to publish incident {incident_id}: {err}");
                    stats.sink_errors += 1;
                }
            }
        }
    }

    stats
}
