//! In-process half of the approval protocol (§4.4/§5). `ApprovalRepo` is
//! the system of record; this registers a `watch` channel per pending
//! approval so a waiting execute handler wakes within milliseconds of a
//! resolution instead of only on the coarse poll. Grounded on the
//! `PermissionManager` waiter registry the teacher used for the same
//! ask/reply/wait shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use warden_channels::ApprovalNotifier;
use warden_types::{ApprovalStatus, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Resolved(ApprovalStatus),
    TimedOut,
}

pub struct ApprovalWaiter {
    waiters: Mutex<HashMap<Id, watch::Sender<Option<ApprovalStatus>>>>,
    poll_interval: Duration,
}

impl ApprovalWaiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self { waiters: Mutex::new(HashMap::new()), poll_interval }
    }

    /// Registers a watch channel for `approval_id`. Must be called before
    /// `wait_for` so a resolution that races the registration isn't missed.
    pub async fn register(&self, approval_id: Id) {
        let (tx, _rx) = watch::channel(None);
        self.waiters.lock().await.insert(approval_id, tx);
    }

    pub async fn unregister(&self, approval_id: Id) {
        self.waiters.lock().await.remove(&approval_id);
    }

    /// Waits for `approval_id` to resolve, polling `poll` (the durable row)
    /// every `poll_interval` as a fallback alongside the low-latency wake,
    /// up to `timeout` total.
    pub async fn wait_for<F, Fut>(&self, approval_id: Id, timeout: Duration, poll: F) -> WaitOutcome
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Option<ApprovalStatus>>,
    {
        let mut rx = match self.waiters.lock().await.get(&approval_id) {
            Some(tx) => tx.subscribe(),
            None => return WaitOutcome::TimedOut,
        };

        if let Some(status) = *rx.borrow() {
            return WaitOutcome::Resolved(status);
        }
        if let Some(status) = poll().await {
            return WaitOutcome::Resolved(status);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = match deadline.checked_duration_since(tokio::time::Instant::now()) {
                Some(d) if !d.is_zero() => d,
                _ => return WaitOutcome::TimedOut,
            };
            let tick = remaining.min(self.poll_interval);

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_ok() {
                        if let Some(status) = *rx.borrow() {
                            return WaitOutcome::Resolved(status);
                        }
                    }
                }
                _ = tokio::time::sleep(tick) => {
                    if let Some(status) = poll().await {
                        return WaitOutcome::Resolved(status);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ApprovalNotifier for ApprovalWaiter {
    async fn notify(&self, approval_id: Id, status: ApprovalStatus) {
        if let Some(tx) = self.waiters.lock().await.get(&approval_id) {
            let _ = tx.send(Some(status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn notify_wakes_a_waiter_immediately() {
        let waiter = Arc::new(ApprovalWaiter::new(Duration::from_secs(10)));
        let approval_id = Id::new_v4();
        waiter.register(approval_id).await;

        let waiter_clone = waiter.clone();
        let handle = tokio::spawn(async move {
            waiter_clone.wait_for(approval_id, Duration::from_secs(5), || async { None }).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.notify(approval_id, ApprovalStatus::Approved).await;

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, WaitOutcome::Resolved(ApprovalStatus::Approved));
    }

    #[tokio::test]
    async fn poll_fallback_resolves_without_a_notify() {
        let waiter = ApprovalWaiter::new(Duration::from_millis(10));
        let approval_id = Id::new_v4();
        waiter.register(approval_id).await;

        let polls = AtomicUsize::new(0);
        let outcome = waiter
            .wait_for(approval_id, Duration::from_secs(5), || async {
                if polls.fetch_add(1, Ordering::SeqCst) >= 2 {
                    Some(ApprovalStatus::Rejected)
                } else {
                    None
                }
            })
            .await;

        assert_eq!(outcome, WaitOutcome::Resolved(ApprovalStatus::Rejected));
    }

    #[tokio::test]
    async fn unregistered_approval_times_out_immediately() {
        let waiter = ApprovalWaiter::new(Duration::from_secs(1));
        let outcome = waiter.wait_for(Id::new_v4(), Duration::from_secs(5), || async { None }).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn wait_times_out_when_never_resolved() {
        let waiter = ApprovalWaiter::new(Duration::from_millis(5));
        let approval_id = Id::new_v4();
        waiter.register(approval_id).await;
        let outcome = waiter.wait_for(approval_id, Duration::from_millis(30), || async { None }).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }
}
