//! WebHandoverCoordinator (spec §4.7, component C7).
//!
//! A web-tier session that reaches `open` is a stopgap: a worker-tier
//! session for the same phone number is expected to claim the connection
//! within a short window. Grounded in the teacher's `ServiceStatusRegistry`
//! (`status.rs`) for the "who owns this slot right now" bookkeeping, and in
//! `SessionCache`'s TTL-guarded `DashMap` for the timer itself.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::session_id::SessionId;

/// A web-tier socket left unclaimed this long after `open` is detached
/// without being closed — the caller (fleet) decides what "detach" means.
pub const HANDOVER_WINDOW: Duration = Duration::from_secs(20);
const DETECTION_POLL_INTERVAL: Duration = Duration::from_secs(3);

struct ArmedTimer {
    timer: JoinHandle<()>,
    claimed: Arc<std::sync::atomic::AtomicBool>,
}

/// Detects when a worker-tier session has taken over for a web-tier one and
/// arbitrates the race so only one side wins the handoff.
pub struct WebHandoverCoordinator {
    armed: DashMap<SessionId, ArmedTimer>,
}

impl WebHandoverCoordinator {
    pub fn new() -> Self {
        Self { armed: DashMap::new() }
    }

    /// Arm the handover timer for a web-tier session that just opened. If no
    /// worker-tier claim arrives within [`HANDOVER_WINDOW`], `on_timeout` is
    /// invoked once — typically to detach the coordinator's interest in the
    /// session without tearing down its socket.
    pub fn arm(
        &self,
        session_id: SessionId,
        on_timeout: impl Fn(&SessionId) + Send + Sync + 'static,
    ) {
        let claimed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let timer_session_id = session_id.clone();
        let timer_claimed = claimed.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(HANDOVER_WINDOW).await;
            if !timer_claimed.load(std::sync::atomic::Ordering::Acquire) {
                on_timeout(&timer_session_id);
            }
        });

        self.armed.insert(session_id, ArmedTimer { timer, claimed });
    }

    /// Poll loop a worker-tier controller runs while waiting to discover a
    /// web-tier session occupying the phone number it just paired. Returns
    /// `true` if this call won the race and should take over the slot;
    /// `false` if another caller already claimed it (or nothing was armed).
    pub async fn try_claim(&self, session_id: &SessionId) -> bool {
        let mut attempts = 0;
        loop {
            if let Some(entry) = self.armed.get(session_id) {
                let already_claimed = entry
                    .claimed
                    .compare_exchange(
                        false,
                        true,
                        std::sync::atomic::Ordering::AcqRel,
                        std::sync::atomic::Ordering::Acquire,
                    )
                    .is_err();
                if !already_claimed {
                    entry.timer.abort();
                    drop(entry);
                    self.armed.remove(session_id);
                    info!(%session_id, "worker-tier session claimed web-tier handover");
                    return true;
                }
                return false;
            }
            attempts += 1;
            if attempts > 10 {
                return false;
            }
            tokio::time::sleep(DETECTION_POLL_INTERVAL).await;
        }
    }

    /// Cancel a pending handover, e.g. because the web-tier socket itself
    /// closed before any claim arrived.
    pub fn disarm(&self, session_id: &SessionId) {
        if let Some((_, armed)) = self.armed.remove(session_id) {
            armed.timer.abort();
        }
    }

    pub fn is_armed(&self, session_id: &SessionId) -> bool {
        self.armed.contains_key(session_id)
    }
}

impl Default for WebHandoverCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WebHandoverCoordinator {
    fn drop(&mut self) {
        for entry in self.armed.iter() {
            entry.timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn claim_before_window_wins_and_disarms() {
        let coordinator = Arc::new(WebHandoverCoordinator::new());
        let sid = SessionId::for_user(9_000_000_001);
        let timeouts = Arc::new(AtomicUsize::new(0));
        let timeouts_clone = timeouts.clone();

        coordinator.arm(sid.clone(), move |_| {
            timeouts_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(coordinator.try_claim(&sid).await);
        assert!(!coordinator.is_armed(&sid));
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_claim_attempt_loses_the_race() {
        let coordinator = Arc::new(WebHandoverCoordinator::new());
        let sid = SessionId::for_user(9_000_000_002);
        coordinator.arm(sid.clone(), |_| {});

        assert!(coordinator.try_claim(&sid).await);
        // the entry is gone after the first successful claim
        assert!(!coordinator.try_claim(&sid).await);
    }

    #[tokio::test]
    async fn disarm_cancels_without_invoking_timeout() {
        let coordinator = WebHandoverCoordinator::new();
        let sid = SessionId::for_user(9_000_000_003);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        coordinator.arm(sid.clone(), move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        coordinator.disarm(&sid);
        assert!(!coordinator.is_armed(&sid));
    }
}
