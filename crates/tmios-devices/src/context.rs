/*!
 * Request context passed to every action handler.
 *
 * A [`Context`] carries the request id, an optional deadline and a
 * cancellation flag shared by every clone. The dispatcher never inspects it;
 * handlers decide when to honour it, typically through [`Context::run`].
 */
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use tmios_core::types::Id;

/// Why a context stopped
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// [`Context::cancel`] was called
    #[error("context cancelled")]
    Cancelled,

    /// The deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Default)]
struct Cancellation {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Request-scoped values, deadline and cancellation
#[derive(Debug, Clone)]
pub struct Context {
    request_id: Id,
    deadline: Option<Instant>,
    cancellation: Arc<Cancellation>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context with a fresh request id, no deadline and no cancellation
    pub fn background() -> Self {
        Self {
            request_id: Id::new(),
            deadline: None,
            cancellation: Arc::new(Cancellation::default()),
        }
    }

    /// Use the given request id
    pub fn with_request_id(mut self, request_id: Id) -> Self {
        self.request_id = request_id;
        self
    }

    /// Expire after `timeout`; an earlier existing deadline wins
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    /// Expire at `deadline`; an earlier existing deadline wins
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// The request id
    pub fn request_id(&self) -> &Id {
        &self.request_id
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.cancellation.cancelled.store(true, Ordering::SeqCst);
        self.cancellation.notify.notify_waiters();
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.cancelled.load(Ordering::SeqCst)
    }

    /// The reason the context stopped, if it has
    pub fn err(&self) -> Option<ContextError> {
        if self.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context is cancelled or its deadline passes
    pub async fn done(&self) -> ContextError {
        let cancelled = async {
            loop {
                let notified = self.cancellation.notify.notified();
                if self.is_cancelled() {
                    return ContextError::Cancelled;
                }
                notified.await;
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                reason = cancelled => reason,
                _ = tokio::time::sleep_until(deadline) => {
                    if self.is_cancelled() {
                        ContextError::Cancelled
                    } else {
                        ContextError::DeadlineExceeded
                    }
                }
            },
            None => cancelled.await,
        }
    }

    /// Drive `fut` until it completes or the context stops
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(reason) = self.err() {
            return Err(reason);
        }
        tokio::select! {
            output = fut => Ok(output),
            reason = self.done() => Err(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        assert!(ctx.err().is_none());
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(5)));

        let reason = ctx.run(tokio::time::sleep(Duration::from_secs(10))).await;
        assert_eq!(reason, Err(ContextError::DeadlineExceeded));
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_wins() {
        let ctx = Context::background()
            .with_timeout(Duration::from_secs(2))
            .with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = Context::background();
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
        assert!(ctx.deadline().is_none());
    }

    #[tokio::test]
    async fn test_cancel_reaches_clones() {
        let ctx = Context::background();
        let child = ctx.clone();
        assert_eq!(child.request_id(), ctx.request_id());

        let waiter = tokio::spawn(async move { child.done().await });
        tokio::task::yield_now().await;
        ctx.cancel();

        assert_eq!(waiter.await.unwrap(), ContextError::Cancelled);
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.run(async { 1 }).await, Err(ContextError::Cancelled));
    }
}
