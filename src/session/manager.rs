use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::detection::classifier::resolve_timestamp;
use crate::error::HawkeyeError;
use crate::recorder::{NoopRecorder, Recorder, SESSIONS_CREATED, SESSIONS_DROPPED, SESSIONS_EMITTED};
use crate::types::{Event, RouteTransition, Session, SessionState};

use super::sweep::sweep_loop;

/// Identity of a session window
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub project_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(project_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.session_id)
    }
}

/// A session still accepting events
struct LiveSession {
    session: Session,
    /// Set once the session has been handed off; appends must go to a new window
    closed: bool,
    current_route: Option<String>,
}

impl LiveSession {
    fn new(key: &SessionKey, now: DateTime<Utc>) -> Self {
        Self {
            session: Session::new(key.project_id.clone(), key.session_id.clone(), now),
            closed: false,
            current_route: None,
        }
    }

    fn append(&mut self, events: Vec<Event>, now: DateTime<Utc>) {
        for event in events {
            self.track_route(&event, now);
            self.session.events.push(event);
        }
        self.session.last_activity = now;

        if self.session.state == SessionState::Idle && self.transition(SessionState::Active) {
            log::debug!("session {} re-activated", self.session.session_id);
        }
    }

    /// Move to `next` if the state machine allows it
    fn transition(&mut self, next: SessionState) -> bool {
        let allowed = self.session.state.can_transition_to(next);
        if allowed {
            self.session.state = next;
        }
        allowed
    }

    fn track_route(&mut self, event: &Event, now: DateTime<Utc>) {
        let route = event.route.trim();
        if route.is_empty() {
            return;
        }
        if let Some(from) = self.current_route.as_deref() {
            if from != route {
                self.session.route_transitions.push(RouteTransition {
                    from: from.to_string(),
                    to: route.to_string(),
                    timestamp: resolve_timestamp(&event.timestamp).unwrap_or(now),
                });
            }
        }
        self.current_route = Some(route.to_string());
    }

    /// Mark completed and return the session to emit, once
    fn complete(&mut self) -> Option<Session> {
        if self.closed || !self.transition(SessionState::Completed) {
            return None;
        }
        self.closed = true;
        self.session.end_time = Some(self.session.last_activity);
        log::debug!(
            "session {} completed after {:.1}s with {} event(s)",
            self.session.session_id,
            self.session.duration_sec(),
            self.session.events.len()
        );
        Some(self.session.clone())
    }
}

type SessionSlot = Arc<Mutex<LiveSession>>;

/// State shared between the manager handle and its sweep loop
pub(crate) struct WindowState {
    pub(crate) config: SessionConfig,
    sessions: DashMap<SessionKey, SessionSlot>,
    clock: Arc<dyn Clock>,
    recorder: Arc<dyn Recorder>,
    sender: mpsc::Sender<Session>,
}

impl WindowState {
    fn add_events(&self, key: SessionKey, events: Vec<Event>) {
        let now = self.clock.now();

        loop {
            let mut created = false;
            let slot = self
                .sessions
                .entry(key.clone())
                .or_insert_with(|| {
                    created = true;
                    Arc::new(Mutex::new(LiveSession::new(&key, now)))
                })
                .clone();

            let mut live = slot.lock();
            if live.closed {
                drop(live);
                self.sessions.remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
                continue;
            }

            if created {
                self.recorder.increment_counter(SESSIONS_CREATED, &[]);
                log::debug!("session {key} opened");
            }
            live.append(events, now);
            return;
        }
    }

    /// Mark idle sessions and emit expired ones. Returns the number emitted.
    pub(crate) async fn sweep(&self, cancel_token: &CancellationToken) -> usize {
        let now = self.clock.now();
        let idle_after = self.config.idle_after();
        let idle_timeout = self.config.idle_timeout();

        let mut expired: Vec<(SessionKey, SessionSlot)> = Vec::new();
        for entry in self.sessions.iter() {
            let mut live = entry.value().lock();
            if live.closed {
                continue;
            }
            let inactive = now - live.session.last_activity;
            if inactive >= idle_timeout {
                expired.push((entry.key().clone(), Arc::clone(entry.value())));
            } else if inactive >= idle_after && live.transition(SessionState::Idle) {
                log::debug!("session {} idle", entry.key());
            }
        }

        let mut emitted = 0;
        for (key, slot) in expired {
            let session = {
                let mut live = slot.lock();
                if now - live.session.last_activity < idle_timeout {
                    continue;
                }
                let Some(session) = live.complete() else {
                    continue;
                };
                session
            };
            self.sessions.remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));

            if self.emit(session, cancel_token).await {
                emitted += 1;
            }
        }
        emitted
    }

    fn take_live(&self, key: &SessionKey) -> Option<Session> {
        let (_, slot) = self.sessions.remove(key)?;
        let mut live = slot.lock();
        live.complete()
    }

    /// Blocking send; gives up only on shutdown or a closed channel
    async fn emit(&self, session: Session, cancel_token: &CancellationToken) -> bool {
        let key = SessionKey::new(session.project_id.clone(), session.session_id.clone());
        tokio::select! {
            sent = self.sender.send(session) => match sent {
                Ok(()) => {
                    self.recorder.increment_counter(SESSIONS_EMITTED, &[]);
                    log::debug!("session {key} completed and emitted");
                    true
                }
                Err(_) => {
                    log::warn!("emission channel closed, dropping completed session {key}");
                    self.recorder
                        .increment_counter(SESSIONS_DROPPED, &[("reason", "channel_closed")]);
                    false
                }
            },
            _ = cancel_token.cancelled() => {
                log::warn!("shutdown while emitting, dropping completed session {key}");
                self.recorder
                    .increment_counter(SESSIONS_DROPPED, &[("reason", "shutdown")]);
                false
            }
        }
    }
}

/// Concurrent session window manager.
///
/// `add_events` is synchronous and never blocks on other sessions. Completed
/// sessions are delivered once each on the channel returned by
/// [`take_emission_channel`](Self::take_emission_channel).
pub struct SessionWindowManager {
    state: Arc<WindowState>,
    receiver: Mutex<Option<mpsc::Receiver<Session>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    cancel_token: Mutex<Option<CancellationToken>>,
}

impl SessionWindowManager {
    /// Create a manager with the system clock and a no-op recorder
    pub fn new(config: SessionConfig) -> Self {
        Self::with_collaborators(config, Arc::new(SystemClock), Arc::new(NoopRecorder))
    }

    pub fn with_collaborators(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            state: Arc::new(WindowState {
                config,
                sessions: DashMap::new(),
                clock,
                recorder,
                sender,
            }),
            receiver: Mutex::new(Some(receiver)),
            handle: Mutex::new(None),
            cancel_token: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.state.config
    }

    /// Append events to the window for `(project_id, session_id)`, opening it if needed.
    ///
    /// Empty batches are ignored.
    pub fn add_events(&self, project_id: &str, session_id: &str, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        self.state
            .add_events(SessionKey::new(project_id, session_id), events);
    }

    /// Receiver for completed sessions; `None` after the first call
    pub fn take_emission_channel(&self) -> Option<mpsc::Receiver<Session>> {
        self.receiver.lock().take()
    }

    /// Copy of a live (active or idle) session
    pub fn snapshot(&self, project_id: &str, session_id: &str) -> Option<Session> {
        let slot = self
            .state
            .sessions
            .get(&SessionKey::new(project_id, session_id))
            .map(|entry| Arc::clone(entry.value()))?;
        let live = slot.lock();
        (!live.closed).then(|| live.session.clone())
    }

    pub fn live_session_count(&self) -> usize {
        self.state.sessions.len()
    }

    /// Keys of all live sessions, sorted
    pub fn live_keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self
            .state
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Complete and emit a live session now.
    ///
    /// Returns `Ok(false)` if no live session exists for the key.
    pub async fn end_session(&self, project_id: &str, session_id: &str) -> Result<bool, HawkeyeError> {
        let key = SessionKey::new(project_id, session_id);
        let Some(session) = self.state.take_live(&key) else {
            return Ok(false);
        };

        match self.state.sender.send(session).await {
            Ok(()) => {
                self.state.recorder.increment_counter(SESSIONS_EMITTED, &[]);
                log::debug!("session {key} ended explicitly");
                Ok(true)
            }
            Err(_) => {
                self.state
                    .recorder
                    .increment_counter(SESSIONS_DROPPED, &[("reason", "channel_closed")]);
                Err(HawkeyeError::ChannelClosed(format!(
                    "no consumer for completed session {key}"
                )))
            }
        }
    }

    /// Run one sweep immediately. Returns the number of sessions emitted.
    pub async fn sweep(&self) -> usize {
        let token = self
            .cancel_token
            .lock()
            .clone()
            .unwrap_or_else(CancellationToken::new);
        self.state.sweep(&token).await
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Launch the background sweep. Must be called within a tokio runtime.
    ///
    /// Returns `false` if the sweep is already running.
    pub fn start(&self) -> bool {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return false;
        }

        let cancel_token = CancellationToken::new();
        *handle = Some(tokio::spawn(sweep_loop(
            Arc::clone(&self.state),
            cancel_token.clone(),
        )));
        *self.cancel_token.lock() = Some(cancel_token);

        log::info!(
            "session sweep started (interval {}ms, idle timeout {}ms)",
            self.state.config.sweep_interval_ms,
            self.state.config.idle_timeout_ms
        );
        true
    }

    /// Cancel the sweep and wait for it to exit. Live sessions are not emitted.
    pub async fn stop(&self) {
        if let Some(token) = self.cancel_token.lock().take() {
            token.cancel();
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                log::warn!("session sweep task failed to join: {err}");
            }
            log::info!(
                "session sweep stopped with {} live session(s)",
                self.live_session_count()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::recorder::InMemoryRecorder;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn event(event_type: &str, route: &str) -> Event {
        Event::new(event_type, base().to_rfc3339()).with_route(route)
    }

    fn manual_manager() -> (SessionWindowManager, Arc<ManualClock>, Arc<InMemoryRecorder>) {
        let clock = Arc::new(ManualClock::new(base()));
        let recorder = Arc::new(InMemoryRecorder::new());
        let manager = SessionWindowManager::with_collaborators(
            SessionConfig::default(),
            clock.clone(),
            recorder.clone(),
        );
        (manager, clock, recorder)
    }

    #[test]
    fn test_live_session_follows_state_machine() {
        let key = SessionKey::new("p", "s");
        let mut live = LiveSession::new(&key, base());
        assert!(!live.transition(SessionState::Active));
        assert!(live.transition(SessionState::Idle));

        live.append(vec![event("click", "/a")], base() + Duration::seconds(40));
        assert_eq!(live.session.state, SessionState::Active);

        let session = live.complete().unwrap();
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(session.end_time, Some(base() + Duration::seconds(40)));
        assert_eq!(session.duration_sec(), 40.0);

        assert!(live.complete().is_none());
        assert!(!live.transition(SessionState::Active));
        assert!(!live.transition(SessionState::Idle));
    }

    #[tokio::test]
    async fn test_same_key_merges_in_arrival_order() {
        let (manager, clock, recorder) = manual_manager();
        manager.add_events("p", "s", vec![event("click", "/a"), event("input", "/a")]);
        clock.advance(Duration::seconds(5));
        manager.add_events("p", "s", vec![event("scroll", "/a")]);

        assert_eq!(manager.live_session_count(), 1);
        let session = manager.snapshot("p", "s").unwrap();
        let types: Vec<&str> = session.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["click", "input", "scroll"]);
        assert_eq!(session.start_time, base());
        assert_eq!(session.last_activity, base() + Duration::seconds(5));
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(recorder.counter(SESSIONS_CREATED, &[]), 1);
    }

    #[tokio::test]
    async fn test_different_keys_are_separate() {
        let (manager, _clock, _recorder) = manual_manager();
        manager.add_events("p", "s1", vec![event("click", "/a")]);
        manager.add_events("p", "s2", vec![event("click", "/b")]);
        manager.add_events("q", "s1", vec![event("click", "/c")]);

        assert_eq!(manager.live_session_count(), 3);
        assert_eq!(
            manager.live_keys(),
            vec![
                SessionKey::new("p", "s1"),
                SessionKey::new("p", "s2"),
                SessionKey::new("q", "s1"),
            ]
        );
        assert_eq!(manager.snapshot("q", "s1").unwrap().events[0].route, "/c");
    }

    #[tokio::test]
    async fn test_empty_batch_is_ignored() {
        let (manager, _clock, _recorder) = manual_manager();
        manager.add_events("p", "s", Vec::new());
        assert_eq!(manager.live_session_count(), 0);
    }

    #[tokio::test]
    async fn test_route_transitions_are_recorded() {
        let (manager, _clock, _recorder) = manual_manager();
        manager.add_events(
            "p",
            "s",
            vec![
                event("navigation", "/home"),
                event("click", "/home"),
                event("navigation", "/cart"),
                event("error", ""),
                event("navigation", "/home"),
            ],
        );

        let session = manager.snapshot("p", "s").unwrap();
        let hops: Vec<(&str, &str)> = session
            .route_transitions
            .iter()
            .map(|t| (t.from.as_str(), t.to.as_str()))
            .collect();
        assert_eq!(hops, vec![("/home", "/cart"), ("/cart", "/home")]);
    }

    #[tokio::test]
    async fn test_sweep_marks_idle_then_reactivates() {
        let (manager, clock, _recorder) = manual_manager();
        manager.add_events("p", "s", vec![event("click", "/a")]);

        clock.advance(Duration::minutes(6));
        assert_eq!(manager.sweep().await, 0);
        assert_eq!(manager.snapshot("p", "s").unwrap().state, SessionState::Idle);

        manager.add_events("p", "s", vec![event("click", "/a")]);
        let session = manager.snapshot("p", "s").unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.events.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_emits_completed_session() {
        let (manager, clock, recorder) = manual_manager();
        let mut receiver = manager.take_emission_channel().unwrap();
        assert!(manager.take_emission_channel().is_none());

        manager.add_events("p", "s", vec![event("click", "/a")]);
        clock.advance(Duration::seconds(30));
        manager.add_events("p", "s", vec![event("click", "/a")]);
        let last_activity = clock.now();

        clock.advance(Duration::minutes(31));
        assert_eq!(manager.sweep().await, 1);

        let session = receiver.recv().await.unwrap();
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(session.end_time, Some(last_activity));
        assert_eq!(session.events.len(), 2);
        assert_eq!(manager.live_session_count(), 0);
        assert_eq!(manager.snapshot("p", "s"), None);
        assert_eq!(recorder.counter(SESSIONS_EMITTED, &[]), 1);

        // Late events open a fresh window
        manager.add_events("p", "s", vec![event("click", "/a")]);
        let fresh = manager.snapshot("p", "s").unwrap();
        assert_eq!(fresh.events.len(), 1);
        assert_eq!(fresh.start_time, clock.now());
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_sessions() {
        let (manager, clock, _recorder) = manual_manager();
        manager.add_events("p", "old", vec![event("click", "/a")]);
        clock.advance(Duration::minutes(20));
        manager.add_events("p", "new", vec![event("click", "/a")]);
        clock.advance(Duration::minutes(11));

        assert_eq!(manager.sweep().await, 1);
        assert_eq!(manager.live_keys(), vec![SessionKey::new("p", "new")]);
        assert_eq!(
            manager.snapshot("p", "new").unwrap().state,
            SessionState::Idle
        );
    }

    #[tokio::test]
    async fn test_end_session_emits_immediately() {
        let (manager, _clock, _recorder) = manual_manager();
        let mut receiver = manager.take_emission_channel().unwrap();
        manager.add_events("p", "s", vec![event("click", "/a")]);

        assert!(manager.end_session("p", "s").await.unwrap());
        assert!(!manager.end_session("p", "s").await.unwrap());

        let session = receiver.recv().await.unwrap();
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(manager.live_session_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_channel_is_reported() {
        let (manager, clock, recorder) = manual_manager();
        drop(manager.take_emission_channel());
        manager.add_events("p", "s", vec![event("click", "/a")]);

        clock.advance(Duration::hours(1));
        assert_eq!(manager.sweep().await, 0);
        assert_eq!(
            recorder.counter(SESSIONS_DROPPED, &[("reason", "channel_closed")]),
            1
        );

        manager.add_events("p", "t", vec![event("click", "/a")]);
        assert!(matches!(
            manager.end_session("p", "t").await,
            Err(HawkeyeError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_background_sweep_emits_after_timeout() {
        let config = SessionConfig {
            idle_after_ms: 20,
            idle_timeout_ms: 50,
            sweep_interval_ms: 10,
            channel_capacity: 8,
        };
        let manager = SessionWindowManager::new(config);
        let mut receiver = manager.take_emission_channel().unwrap();

        assert!(manager.start());
        assert!(!manager.start());
        manager.add_events("p", "s", vec![event("click", "/a")]);

        let session = tokio::time::timeout(std::time::Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.session_id, "s");
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(session.end_time, Some(session.last_activity));

        manager.stop().await;
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_leaves_live_sessions() {
        let config = SessionConfig {
            sweep_interval_ms: 10,
            ..Default::default()
        };
        let manager = SessionWindowManager::new(config);
        let mut receiver = manager.take_emission_channel().unwrap();
        manager.add_events("p", "s", vec![event("click", "/a")]);

        manager.start();
        manager.stop().await;
        manager.stop().await;

        assert_eq!(manager.live_session_count(), 1);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_events() {
        let (manager, _clock, _recorder) = manual_manager();
        let manager = Arc::new(manager);

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    manager.add_events("p", "shared", vec![event("click", "/a")]);
                    manager.add_events("p", &format!("own-{worker}"), vec![event("click", "/a")]);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(manager.live_session_count(), 9);
        assert_eq!(manager.snapshot("p", "shared").unwrap().events.len(), 400);
        assert_eq!(manager.snapshot("p", "own-3").unwrap().events.len(), 50);
    }
}
