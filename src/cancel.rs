//! A first-class, awaitable cancellation signal.
//!
//! The specification models cancellation and timeout as signals delivered to
//! cooperative suspension points rather than thrown control-flow exceptions
//! (§9 design notes). `CancelToken` is that signal: a one-shot, latched
//! `reason` plus a `tokio::sync::watch` channel so any number of awaiters
//! (the adapter's read loop, the timeout supervisor, a second `get_result`
//! caller) can observe it firing without missing the event.

use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::watch;

/// Why a command's cancellation signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// An explicit client-initiated `cancel(id, reason)` call.
    User,
    /// The timeout supervisor's timer expired.
    Timeout,
    /// The whole batch this command belonged to was cancelled.
    Batch,
    /// A session restart discarded the in-flight command.
    Restart,
}

/// A cloneable, awaitable, one-shot cancellation signal.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    reason: Arc<StdMutex<Option<CancelReason>>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            reason: Arc::new(StdMutex::new(None)),
        }
    }

    /// Fire the signal. Idempotent: the first reason wins, later calls are a no-op.
    pub fn cancel(&self, reason: CancelReason) {
        let mut guard = self.reason.lock().expect("cancel reason mutex poisoned");
        if guard.is_none() {
            *guard = Some(reason);
        }
        drop(guard);
        let _ = self.tx.send(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        *self.reason.lock().expect("cancel reason mutex poisoned")
    }

    /// Resolve once `cancel` has been called (or immediately if it already has).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a combined token that fires only once every token in `tokens` has
/// fired (spec §4.4: "cancel the whole plan iff every planned id is
/// cancelled, otherwise continue"). The combined token's reason is the
/// reason of whichever input token fired last.
#[must_use]
pub fn combine_all(tokens: Vec<CancelToken>) -> CancelToken {
    let combined = CancelToken::new();
    if tokens.is_empty() {
        return combined;
    }
    let out = combined.clone();
    tokio::spawn(async move {
        let mut last_reason = CancelReason::Batch;
        for token in &tokens {
            token.cancelled().await;
            if let Some(reason) = token.reason() {
                last_reason = reason;
            }
        }
        out.cancel(last_reason);
    });
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_is_observed_by_late_waiters() {
        let token = CancelToken::new();
        token.cancel(CancelReason::User);
        // Awaiting after the fact must not hang.
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() should resolve immediately once fired");
    }

    #[tokio::test]
    async fn second_cancel_does_not_overwrite_reason() {
        let token = CancelToken::new();
        token.cancel(CancelReason::User);
        token.cancel(CancelReason::Timeout);
        assert_eq!(token.reason(), Some(CancelReason::User));
    }

    #[tokio::test]
    async fn combine_all_fires_only_after_every_member_fires() {
        let a = CancelToken::new();
        let b = CancelToken::new();
        let combined = combine_all(vec![a.clone(), b.clone()]);

        a.cancel(CancelReason::User);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!combined.is_cancelled());

        b.cancel(CancelReason::User);
        tokio::time::timeout(Duration::from_millis(100), combined.cancelled())
            .await
            .expect("combined token should fire once all members have fired");
    }
}
