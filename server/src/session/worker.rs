//! The single worker that drains the session queue, and the reaper.
//!
//! All controller traffic funnels through the worker, which owns the
//! emulator outright. That makes "at most one in-flight command" and "at
//! most one active session" structural properties rather than lock
//! discipline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::ndef;
use crate::nfc::{TagEmulator, TagPoll};
use crate::session::{SessionManager, SessionStatus};

/// Sweep cadence for terminal, expired sessions.
const REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Drain the queue until shutdown. Runs as its own tokio task.
pub async fn run_worker(
    manager: Arc<SessionManager>,
    mut emulator: Box<dyn TagEmulator>,
    tagging_timeout: Duration,
) {
    if let Err(err) = emulator.initialize().await {
        // Sessions will fail until a reinitialize succeeds; the bridge
        // itself stays up so health checks keep answering.
        tracing::error!("controller initialization failed: {err}");
    }

    loop {
        if manager.is_shut_down().await {
            break;
        }
        let Some(id) = manager.pop_queue().await else {
            manager.wait_for_work().await;
            continue;
        };
        process_session(&manager, emulator.as_mut(), &id, tagging_timeout).await;
    }

    tracing::info!("session worker stopped");
}

async fn process_session(
    manager: &SessionManager,
    emulator: &mut dyn TagEmulator,
    id: &str,
    tagging_timeout: Duration,
) {
    // Gone already (shutdown or reaped): nothing to do.
    let Some(session) = manager.get_session(id).await else {
        return;
    };

    // Expired while waiting its turn in the queue.
    if Utc::now() > session.expires_at {
        manager
            .set_status(id, SessionStatus::Expired, Some("Session timeout".into()))
            .await;
        return;
    }

    manager.set_status(id, SessionStatus::Ready, None).await;

    let message = match ndef::encode_uri(&session.receipt_url) {
        Ok(message) => message,
        Err(err) => {
            manager
                .set_status(id, SessionStatus::Failed, Some(err.to_string()))
                .await;
            return;
        }
    };

    if let Err(err) = emulator.init_as_target(&message).await {
        tracing::warn!("session {id}: target init failed: {err}");
        manager
            .set_status(id, SessionStatus::Failed, Some(err.to_string()))
            .await;
        recover(emulator).await;
        return;
    }

    manager.set_status(id, SessionStatus::Tagging, None).await;

    match emulator.wait_for_tag(tagging_timeout).await {
        Ok(TagPoll::Detected) => {
            tracing::info!("session {id}: tag read by initiator");
            manager.set_status(id, SessionStatus::Completed, None).await;
        }
        Ok(TagPoll::Timeout) => {
            manager
                .set_status(id, SessionStatus::Expired, Some("Tagging timeout".into()))
                .await;
            // The controller stays in target-init state; no recovery needed.
        }
        Err(err) => {
            tracing::warn!("session {id}: tag wait failed: {err}");
            manager
                .set_status(id, SessionStatus::Failed, Some(err.to_string()))
                .await;
            recover(emulator).await;
        }
    }
}

async fn recover(emulator: &mut dyn TagEmulator) {
    if let Err(err) = emulator.reinitialize().await {
        tracing::error!("controller reinitialization failed: {err}");
    }
}

/// Periodically drop terminal sessions whose lifetime has passed.
pub async fn run_reaper(manager: Arc<SessionManager>) {
    let mut tick = tokio::time::interval(REAP_INTERVAL);
    loop {
        tick.tick().await;
        if manager.is_shut_down().await {
            break;
        }
        let removed = manager.reap_expired().await;
        if removed > 0 {
            tracing::debug!("reaped {removed} expired sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::time::sleep;

    use super::*;
    use crate::error::NfcError;
    use crate::nfc::MockPn532;

    const URL: &str = "https://example.com/r/abc";

    /// Poll until `session` reaches a terminal status.
    async fn wait_terminal(manager: &SessionManager, id: &str) -> SessionStatus {
        for _ in 0..10_000 {
            let session = manager.get_session(id).await.expect("session vanished");
            if session.status.is_terminal() {
                return session.status;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached a terminal status");
    }

    fn spawn_worker(
        manager: &Arc<SessionManager>,
        emulator: impl TagEmulator + 'static,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(run_worker(
            manager.clone(),
            Box::new(emulator),
            Duration::from_secs(30),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_with_mock_controller() {
        let manager = Arc::new(SessionManager::new(Duration::from_secs(60)));
        spawn_worker(&manager, MockPn532::new());

        let session = manager
            .create_session("order-1".into(), URL.into())
            .await
            .unwrap();

        let status = wait_terminal(&manager, &session.id).await;
        assert_eq!(status, SessionStatus::Completed);
        let session = manager.get_session(&session.id).await.unwrap();
        assert!(session.completed_at.is_some());
        assert_eq!(manager.stats().await.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_sessions_run_fifo_one_at_a_time() {
        let manager = Arc::new(SessionManager::new(Duration::from_secs(120)));
        spawn_worker(&manager, MockPn532::new());

        let a = manager.create_session("a".into(), URL.into()).await.unwrap();
        let b = manager.create_session("b".into(), URL.into()).await.unwrap();

        loop {
            let sa = manager.get_session(&a.id).await.unwrap();
            let sb = manager.get_session(&b.id).await.unwrap();

            let a_active = matches!(sa.status, SessionStatus::Ready | SessionStatus::Tagging);
            let b_active = matches!(sb.status, SessionStatus::Ready | SessionStatus::Tagging);
            assert!(!(a_active && b_active), "both sessions active at once");
            // FIFO: B may not start until A is finished.
            assert!(
                !(b_active && !sa.status.is_terminal()),
                "B started before A finished"
            );
            if sa.status.is_terminal() && sb.status.is_terminal() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(manager.stats().await.completed, 2);
    }

    /// Fails the first `init_as_target`, then behaves; counts recoveries.
    struct FlakyEmulator {
        inner: MockPn532,
        fail_remaining: usize,
        reinit_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TagEmulator for FlakyEmulator {
        async fn initialize(&mut self) -> Result<(), NfcError> {
            self.inner.initialize().await
        }

        async fn init_as_target(&mut self, ndef: &[u8]) -> Result<(), NfcError> {
            if self.fail_remaining > 0 {
                self.fail_remaining -= 1;
                return Err(NfcError::Syntax);
            }
            self.inner.init_as_target(ndef).await
        }

        async fn wait_for_tag(&mut self, timeout: Duration) -> Result<TagPoll, NfcError> {
            self.inner.wait_for_tag(timeout).await
        }

        async fn reinitialize(&mut self) -> Result<(), NfcError> {
            self.reinit_count.fetch_add(1, Ordering::SeqCst);
            self.inner.reinitialize().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_syntax_error_fails_session_and_reinitializes() {
        let reinit_count = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(SessionManager::new(Duration::from_secs(120)));
        spawn_worker(
            &manager,
            FlakyEmulator {
                inner: MockPn532::new(),
                fail_remaining: 1,
                reinit_count: reinit_count.clone(),
            },
        );

        let a = manager.create_session("a".into(), URL.into()).await.unwrap();
        let status = wait_terminal(&manager, &a.id).await;
        assert_eq!(status, SessionStatus::Failed);
        let a = manager.get_session(&a.id).await.unwrap();
        assert!(a.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(reinit_count.load(Ordering::SeqCst), 1);

        // The controller recovered: the next session goes through.
        let b = manager.create_session("b".into(), URL.into()).await.unwrap();
        assert_eq!(
            wait_terminal(&manager, &b.id).await,
            SessionStatus::Completed
        );
    }

    /// Panics on any controller use; proves a session died before I/O.
    struct UntouchableEmulator;

    #[async_trait]
    impl TagEmulator for UntouchableEmulator {
        async fn initialize(&mut self) -> Result<(), NfcError> {
            Ok(())
        }

        async fn init_as_target(&mut self, _ndef: &[u8]) -> Result<(), NfcError> {
            panic!("controller touched for an unencodable URL");
        }

        async fn wait_for_tag(&mut self, _timeout: Duration) -> Result<TagPoll, NfcError> {
            panic!("controller touched for an unencodable URL");
        }

        async fn reinitialize(&mut self) -> Result<(), NfcError> {
            panic!("controller touched for an unencodable URL");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlong_url_fails_before_controller() {
        let manager = Arc::new(SessionManager::new(Duration::from_secs(60)));
        spawn_worker(&manager, UntouchableEmulator);

        let url = format!("https://example.com/{}", "x".repeat(280));
        let session = manager.create_session("o".into(), url).await.unwrap();

        let status = wait_terminal(&manager, &session.id).await;
        assert_eq!(status, SessionStatus::Failed);
        let session = manager.get_session(&session.id).await.unwrap();
        assert!(session.error.as_deref().is_some_and(|e| e.contains("too long")));
    }

    /// wait_for_tag never sees a tap; sessions run into the tagging timeout.
    struct SilentEmulator;

    #[async_trait]
    impl TagEmulator for SilentEmulator {
        async fn initialize(&mut self) -> Result<(), NfcError> {
            Ok(())
        }

        async fn init_as_target(&mut self, _ndef: &[u8]) -> Result<(), NfcError> {
            Ok(())
        }

        async fn wait_for_tag(&mut self, timeout: Duration) -> Result<TagPoll, NfcError> {
            sleep(timeout).await;
            Ok(TagPoll::Timeout)
        }

        async fn reinitialize(&mut self) -> Result<(), NfcError> {
            panic!("tagging timeout must not reinitialize the controller");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tagging_timeout_expires_session_without_recovery() {
        let manager = Arc::new(SessionManager::new(Duration::from_secs(600)));
        spawn_worker(&manager, SilentEmulator);

        let session = manager.create_session("o".into(), URL.into()).await.unwrap();
        let status = wait_terminal(&manager, &session.id).await;

        assert_eq!(status, SessionStatus::Expired);
        let session = manager.get_session(&session.id).await.unwrap();
        assert_eq!(session.error.as_deref(), Some("Tagging timeout"));
    }

    #[tokio::test]
    async fn test_session_expired_in_queue_is_skipped() {
        let manager = Arc::new(SessionManager::new(Duration::from_millis(1)));
        let session = manager.create_session("o".into(), URL.into()).await.unwrap();

        // Real wall-clock wait: expiry is judged against Utc::now().
        tokio::time::sleep(Duration::from_millis(25)).await;
        spawn_worker(&manager, UntouchableEmulator);

        let status = wait_terminal(&manager, &session.id).await;
        assert_eq!(status, SessionStatus::Expired);
        let session = manager.get_session(&session.id).await.unwrap();
        assert_eq!(session.error.as_deref(), Some("Session timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_worker() {
        let manager = Arc::new(SessionManager::new(Duration::from_secs(60)));
        let worker = spawn_worker(&manager, MockPn532::new());

        manager.shutdown().await;
        worker.await.unwrap();
    }
}
