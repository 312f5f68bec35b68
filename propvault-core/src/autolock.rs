//! Idle auto-lock for the vault session.

use crate::session::VaultSession;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

const MIN_POLL: Duration = Duration::from_millis(10);
const MAX_POLL: Duration = Duration::from_secs(5);

/// Tracks the time since the last vault operation.
#[derive(Debug)]
pub struct IdleTimer {
    last_activity: Instant,
    timeout: Option<Duration>,
}

impl IdleTimer {
    /// `None` disables auto-lock.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            last_activity: Instant::now(),
            timeout,
        }
    }

    /// Update the last activity timestamp
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Check if the vault should be locked
    pub fn should_lock(&self) -> bool {
        match self.timeout {
            Some(timeout) => self.last_activity.elapsed() >= timeout,
            None => false,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Get the time until lock
    pub fn time_until_lock(&self) -> Option<Duration> {
        self.timeout
            .map(|t| t.saturating_sub(self.last_activity.elapsed()))
    }
}

/// Shared handle to an [`IdleTimer`].
pub type SharedIdleTimer = Arc<Mutex<IdleTimer>>;

pub(crate) fn touch(timer: &SharedIdleTimer) {
    timer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .record_activity();
}

fn remaining(timer: &SharedIdleTimer) -> Option<Duration> {
    timer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .time_until_lock()
}

/// Spawn the watcher that locks the session once it has been idle for the
/// configured timeout.
///
/// The task is tied to the session `epoch` it was started for and exits as
/// soon as the session is locked, re-keyed or dropped. Returns `None` when
/// auto-lock is disabled.
pub(crate) fn spawn_watcher(
    session: &Arc<RwLock<VaultSession>>,
    timer: SharedIdleTimer,
    epoch: u64,
) -> Option<JoinHandle<()>> {
    let timeout = timer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .timeout()?;
    let poll = (timeout / 4).clamp(MIN_POLL, MAX_POLL);
    let session: Weak<RwLock<VaultSession>> = Arc::downgrade(session);

    Some(tokio::spawn(async move {
        loop {
            let wait = remaining(&timer).unwrap_or(poll).clamp(MIN_POLL, poll);
            sleep(wait).await;

            let Some(session) = session.upgrade() else {
                return;
            };
            if session.read().await.epoch() != epoch {
                debug!(epoch, "Auto-lock watcher retired");
                return;
            }
            if remaining(&timer) != Some(Duration::ZERO) {
                continue;
            }

            let mut guard = session.write().await;
            if guard.epoch() != epoch {
                return;
            }
            // Activity may have landed while waiting for the write guard.
            if remaining(&timer) != Some(Duration::ZERO) {
                continue;
            }
            if guard.clear() {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Auto-locking vault due to inactivity"
                );
            }
            return;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{VaultKey, KEY_LEN};
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_idle_timer_expires() {
        let timer = IdleTimer::new(Some(Duration::from_secs(60)));
        assert!(!timer.should_lock());

        advance(Duration::from_secs(61)).await;
        assert!(timer.should_lock());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_timer() {
        let mut timer = IdleTimer::new(Some(Duration::from_secs(60)));

        advance(Duration::from_secs(40)).await;
        timer.record_activity();

        advance(Duration::from_secs(40)).await;
        assert!(!timer.should_lock());

        advance(Duration::from_secs(21)).await;
        assert!(timer.should_lock());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_timer_never_locks() {
        let timer = IdleTimer::new(None);
        advance(Duration::from_secs(3600)).await;
        assert!(!timer.should_lock());
        assert!(timer.time_until_lock().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until_lock() {
        let timer = IdleTimer::new(Some(Duration::from_secs(5)));
        advance(Duration::from_secs(2)).await;
        assert_eq!(timer.time_until_lock(), Some(Duration::from_secs(3)));
    }

    fn unlocked_session() -> (Arc<RwLock<VaultSession>>, u64) {
        let mut session = VaultSession::new();
        let epoch = session.install(VaultKey::from_bytes([3; KEY_LEN]));
        (Arc::new(RwLock::new(session)), epoch)
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_locks_idle_session() {
        let (session, epoch) = unlocked_session();
        let timer = Arc::new(Mutex::new(IdleTimer::new(Some(Duration::from_secs(30)))));

        let handle = spawn_watcher(&session, timer, epoch).unwrap();
        handle.await.unwrap();

        assert!(!session.read().await.is_unlocked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_respects_activity() {
        let (session, epoch) = unlocked_session();
        let timer = Arc::new(Mutex::new(IdleTimer::new(Some(Duration::from_secs(30)))));
        let handle = spawn_watcher(&session, timer.clone(), epoch).unwrap();

        sleep(Duration::from_secs(20)).await;
        touch(&timer);
        sleep(Duration::from_secs(20)).await;
        assert!(session.read().await.is_unlocked());

        handle.await.unwrap();
        assert!(!session.read().await.is_unlocked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_retires_after_manual_lock() {
        let (session, epoch) = unlocked_session();
        let timer = Arc::new(Mutex::new(IdleTimer::new(Some(Duration::from_secs(30)))));
        let handle = spawn_watcher(&session, timer, epoch).unwrap();

        session.write().await.clear();
        let relock_epoch = session
            .write()
            .await
            .install(VaultKey::from_bytes([4; KEY_LEN]));
        assert_ne!(relock_epoch, epoch);

        handle.await.unwrap();
        // The new session belongs to a different epoch and is left alone.
        assert!(session.read().await.is_unlocked());
    }

    #[test]
    fn test_disabled_timer_spawns_nothing() {
        let (session, epoch) = unlocked_session();
        let timer = Arc::new(Mutex::new(IdleTimer::new(None)));
        assert!(spawn_watcher(&session, timer, epoch).is_none());
    }
}
