//! Live-video session management.
//!
//! A session is one HTTP client's subscription to the live feed. It is
//! created when the client requests the video path and destroyed when the
//! client disconnects, the gateway shuts down, or a configured frame/time
//! cap is reached. It tracks:
//!
//! - A unique session ID (16-digit hex string).
//! - The lifecycle state: Starting -> Streaming -> Draining -> Closed.
//! - How many chunks were written and the last sequence number sent.
//!
//! ## Session lifecycle
//!
//! ```text
//! GET /video          -> Starting   (response headers sent)
//! cadence loop starts -> Streaming  (the only state that writes)
//! disconnect / cap    -> Draining   (no further writes)
//! task ends           -> Closed     (removed from the manager)
//! ```
//!
//! The cadence loop itself lives in [`stream`].

pub mod stream;

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

pub use stream::{DrainReason, StreamSession};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Streaming session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Headers sent, loop not yet running.
    Starting,
    /// Chunks are being written on every cadence tick.
    Streaming,
    /// Cancellation or a limit was observed; nothing more is written.
    Draining,
    /// Terminal; the session's resources are released.
    Closed,
}

/// A single live-video session.
///
/// Shared between the cadence task (the only writer) and the manager's
/// listing endpoint. Interior mutability via `RwLock`/atomics allows shared
/// references across tasks.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier (16-char hex string).
    pub id: String,
    /// Client address, for logs and listings.
    pub peer: String,
    pub started_at: Instant,
    state: RwLock<SessionState>,
    frames_sent: AtomicU64,
    last_sequence: AtomicU64,
}

impl Session {
    /// Create a new session with a unique auto-incrementing ID.
    pub fn new(peer: &str) -> Self {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        Session {
            id: format!("{:016X}", id),
            peer: peer.to_string(),
            started_at: Instant::now(),
            state: RwLock::new(SessionState::Starting),
            frames_sent: AtomicU64::new(0),
            last_sequence: AtomicU64::new(0),
        }
    }

    /// Transition to a new lifecycle state.
    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        tracing::debug!(session_id = %self.id, old_state = ?*current, new_state = ?state, "state transition");
        *current = state;
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Record one chunk written for the frame with `sequence`.
    pub fn record_frame(&self, sequence: u64) -> u64 {
        self.last_sequence.store(sequence, Ordering::Relaxed);
        self.frames_sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            peer: self.peer.clone(),
            state: self.state(),
            frames_sent: self.frames_sent(),
            last_sequence: self.last_sequence(),
            age_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}

/// Serializable view of a [`Session`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub peer: String,
    pub state: SessionState,
    pub frames_sent: u64,
    pub last_sequence: u64,
    pub age_ms: u64,
}

/// Thread-safe registry of active sessions.
///
/// Backed by `parking_lot::RwLock`. Sessions are only ever read by the
/// listing and health endpoints; the cadence loops never touch the map.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a session. Dropping the guard unregisters it.
    pub fn create_session(&self, peer: &str) -> SessionGuard {
        let session = Arc::new(Session::new(peer));
        let id = session.id.clone();
        let total = {
            let mut sessions = self.sessions.write();
            sessions.insert(id.clone(), session.clone());
            sessions.len()
        };
        tracing::debug!(session_id = %id, peer, total_sessions = total, "session created");

        SessionGuard {
            session,
            manager: self.clone(),
        }
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    fn remove_session(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, total_sessions = sessions.len(), "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// All active sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.sessions.read().values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| b.age_ms.cmp(&a.age_ms).then_with(|| a.id.cmp(&b.id)));
        infos
    }
}

/// Owning handle for a registered session.
///
/// Dropping it marks the session [`SessionState::Closed`] and removes it
/// from the manager; this happens exactly once per session.
#[derive(Debug)]
pub struct SessionGuard {
    session: Arc<Session>,
    manager: SessionManager,
}

impl std::ops::Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.set_state(SessionState::Closed);
        self.manager.remove_session(&self.session.id);
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_drop() {
        let manager = SessionManager::new();
        let guard = manager.create_session("127.0.0.1:5000");
        assert_eq!(guard.id.len(), 16);
        assert_eq!(guard.state(), SessionState::Starting);
        assert_eq!(manager.len(), 1);

        let session = manager.get_session(&guard.id).unwrap();
        drop(guard);

        assert!(manager.is_empty());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn unique_ids() {
        let manager = SessionManager::new();
        let a = manager.create_session("a");
        let b = manager.create_session("b");
        assert_ne!(a.id, b.id);
        assert_eq!(manager.list().len(), 2);
    }

    #[test]
    fn record_frame_counts_and_tracks_sequence() {
        let session = Session::new("peer");
        assert_eq!(session.record_frame(4), 1);
        assert_eq!(session.record_frame(4), 2);
        assert_eq!(session.record_frame(7), 3);

        let info = session.info();
        assert_eq!(info.frames_sent, 3);
        assert_eq!(info.last_sequence, 7);
        assert_eq!(info.state, SessionState::Starting);
    }

    #[test]
    fn state_transitions() {
        let session = Session::new("peer");
        session.set_state(SessionState::Streaming);
        assert_eq!(session.state(), SessionState::Streaming);
        session.set_state(SessionState::Draining);
        assert_eq!(session.state(), SessionState::Draining);
    }
}
