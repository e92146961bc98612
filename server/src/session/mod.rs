//! Emulation sessions and the manager that serializes them.
//!
//! One physical controller serves many callers, so sessions queue FIFO and
//! a single worker drains them. HTTP handlers only ever touch the state in
//! here; the controller itself is owned by the worker task.

mod worker;

pub use worker::{run_reaper, run_worker};

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// Lifecycle of one emulation attempt.
///
/// Transitions run strictly forward: `pending → ready → tagging` and from
/// any non-terminal state into one of the three terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Ready,
    Tagging,
    Completed,
    Expired,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Failed)
    }

    /// Position along the forward-only lifecycle.
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Ready => 1,
            Self::Tagging => 2,
            Self::Completed | Self::Expired | Self::Failed => 3,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Tagging => "tagging",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One request to emulate a particular URL until read or timed out.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub order_id: String,
    pub receipt_url: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Session counters for the health endpoint.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub tagging: usize,
    pub completed: usize,
    pub expired: usize,
    pub failed: usize,
}

struct Inner {
    sessions: HashMap<String, Session>,
    queue: VecDeque<String>,
    accepting: bool,
}

/// Owner of the session map and the FIFO queue.
///
/// Map and queue live under one lock so a session can never be queued
/// without being known, or popped while being removed.
pub struct SessionManager {
    inner: Mutex<Inner>,
    /// Wakes the worker when the queue grows or shutdown begins.
    queue_signal: Notify,
    session_timeout: Duration,
}

impl SessionManager {
    pub fn new(session_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                queue: VecDeque::new(),
                accepting: true,
            }),
            queue_signal: Notify::new(),
            session_timeout,
        }
    }

    /// Register a new pending session and queue it for the worker.
    ///
    /// Returns `None` once `shutdown` has run.
    pub async fn create_session(&self, order_id: String, receipt_url: String) -> Option<Session> {
        let session = {
            let mut inner = self.inner.lock().await;
            if !inner.accepting {
                return None;
            }

            let now = Utc::now();
            let session = Session {
                id: Uuid::new_v4().to_string(),
                order_id,
                receipt_url,
                status: SessionStatus::Pending,
                created_at: now,
                expires_at: now
                    + chrono::Duration::milliseconds(self.session_timeout.as_millis() as i64),
                completed_at: None,
                error: None,
            };
            inner.sessions.insert(session.id.clone(), session.clone());
            inner.queue.push_back(session.id.clone());
            session
        };

        self.queue_signal.notify_one();
        tracing::info!(
            "session {} created for order {} ({} queued)",
            session.id,
            session.order_id,
            self.queue_len().await
        );
        Some(session)
    }

    pub async fn get_session(&self, id: &str) -> Option<Session> {
        self.inner.lock().await.sessions.get(id).cloned()
    }

    /// Snapshot of all live sessions, oldest first.
    pub async fn list_sessions(&self) -> Vec<Session> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub async fn stats(&self) -> SessionStats {
        let inner = self.inner.lock().await;
        let mut stats = SessionStats {
            total: inner.sessions.len(),
            ..SessionStats::default()
        };
        for session in inner.sessions.values() {
            match session.status {
                SessionStatus::Pending => stats.pending += 1,
                SessionStatus::Ready => stats.ready += 1,
                SessionStatus::Tagging => stats.tagging += 1,
                SessionStatus::Completed => stats.completed += 1,
                SessionStatus::Expired => stats.expired += 1,
                SessionStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Stop accepting sessions and drop all state. Pending sessions vanish
    /// silently; the worker exits once its current session finishes.
    pub async fn shutdown(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.accepting = false;
            inner.queue.clear();
            inner.sessions.clear();
        }
        self.queue_signal.notify_one();
        tracing::info!("session manager shut down");
    }

    /// Advance a session along its lifecycle. Backward or out-of-terminal
    /// moves are refused, which keeps status monotonic no matter how late a
    /// worker update races the reaper.
    pub(crate) async fn set_status(&self, id: &str, status: SessionStatus, error: Option<String>) {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.sessions.get_mut(id) else {
            return;
        };
        if session.status.is_terminal() || status.rank() <= session.status.rank() {
            tracing::warn!(
                "session {id}: refusing transition {} -> {status}",
                session.status
            );
            return;
        }
        tracing::debug!("session {id}: {} -> {status}", session.status);
        session.status = status;
        session.error = error;
        if status == SessionStatus::Completed {
            session.completed_at = Some(Utc::now());
        }
    }

    pub(crate) async fn pop_queue(&self) -> Option<String> {
        self.inner.lock().await.queue.pop_front()
    }

    pub(crate) async fn queue_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub(crate) async fn wait_for_work(&self) {
        self.queue_signal.notified().await;
    }

    pub(crate) async fn is_shut_down(&self) -> bool {
        !self.inner.lock().await.accepting
    }

    /// Remove terminal sessions whose lifetime has passed. Non-terminal
    /// sessions are never removed here, whatever their age.
    pub(crate) async fn reap_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner
            .sessions
            .retain(|_, s| !(s.status.is_terminal() && s.expires_at < now));
        before - inner.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_create_session_queues_pending() {
        let manager = manager();
        let session = manager
            .create_session("order-1".into(), "https://example.com/r/1".into())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Pending);
        assert!(session.expires_at > session.created_at);
        assert_eq!(manager.pop_queue().await, Some(session.id.clone()));
        assert!(manager.get_session(&session.id).await.is_some());
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let manager = manager();
        let a = manager
            .create_session("a".into(), "https://example.com/a".into())
            .await
            .unwrap();
        let b = manager
            .create_session("b".into(), "https://example.com/b".into())
            .await
            .unwrap();
        let c = manager
            .create_session("c".into(), "https://example.com/c".into())
            .await
            .unwrap();

        assert_eq!(manager.pop_queue().await, Some(a.id));
        assert_eq!(manager.pop_queue().await, Some(b.id));
        assert_eq!(manager.pop_queue().await, Some(c.id));
        assert_eq!(manager.pop_queue().await, None);
    }

    #[tokio::test]
    async fn test_status_never_leaves_terminal() {
        let manager = manager();
        let session = manager
            .create_session("o".into(), "https://example.com".into())
            .await
            .unwrap();

        manager
            .set_status(&session.id, SessionStatus::Ready, None)
            .await;
        manager
            .set_status(&session.id, SessionStatus::Failed, Some("boom".into()))
            .await;
        manager
            .set_status(&session.id, SessionStatus::Completed, None)
            .await;

        let session = manager.get_session(&session.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_status_never_moves_backward() {
        let manager = manager();
        let session = manager
            .create_session("o".into(), "https://example.com".into())
            .await
            .unwrap();

        manager
            .set_status(&session.id, SessionStatus::Tagging, None)
            .await;
        manager
            .set_status(&session.id, SessionStatus::Ready, None)
            .await;

        let session = manager.get_session(&session.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Tagging);
    }

    #[tokio::test]
    async fn test_completed_gets_timestamp() {
        let manager = manager();
        let session = manager
            .create_session("o".into(), "https://example.com".into())
            .await
            .unwrap();

        manager
            .set_status(&session.id, SessionStatus::Completed, None)
            .await;

        let session = manager.get_session(&session.id).await.unwrap();
        assert!(session.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let manager = manager();
        let a = manager
            .create_session("a".into(), "https://example.com".into())
            .await
            .unwrap();
        let _b = manager
            .create_session("b".into(), "https://example.com".into())
            .await
            .unwrap();
        manager.set_status(&a.id, SessionStatus::Completed, None).await;

        let stats = manager.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.tagging, 0);
    }

    #[tokio::test]
    async fn test_reaper_removes_only_terminal_expired() {
        let manager = SessionManager::new(Duration::from_millis(1));
        let done = manager
            .create_session("done".into(), "https://example.com".into())
            .await
            .unwrap();
        let stuck = manager
            .create_session("stuck".into(), "https://example.com".into())
            .await
            .unwrap();
        manager
            .set_status(&done.id, SessionStatus::Completed, None)
            .await;

        // Let both outlive their 1 ms lifetime.
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert_eq!(manager.reap_expired().await, 1);
        assert!(manager.get_session(&done.id).await.is_none());
        // Still pending, so still alive despite being past its lifetime.
        assert!(manager.get_session(&stuck.id).await.is_some());
    }

    #[tokio::test]
    async fn test_reaper_keeps_live_terminal_sessions() {
        let manager = manager();
        let session = manager
            .create_session("o".into(), "https://example.com".into())
            .await
            .unwrap();
        manager
            .set_status(&session.id, SessionStatus::Completed, None)
            .await;

        // Terminal but not yet past expires_at: polling clients may still ask.
        assert_eq!(manager.reap_expired().await, 0);
        assert!(manager.get_session(&session.id).await.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_clears_and_rejects() {
        let manager = manager();
        manager
            .create_session("o".into(), "https://example.com".into())
            .await
            .unwrap();

        manager.shutdown().await;

        assert!(manager.is_shut_down().await);
        assert_eq!(manager.stats().await.total, 0);
        assert_eq!(manager.pop_queue().await, None);
        assert!(
            manager
                .create_session("late".into(), "https://example.com".into())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_list_sessions_oldest_first() {
        let manager = manager();
        let a = manager
            .create_session("a".into(), "https://example.com".into())
            .await
            .unwrap();
        let b = manager
            .create_session("b".into(), "https://example.com".into())
            .await
            .unwrap();

        let listed = manager.list_sessions().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].id, b.id);
    }
}
