use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Cooperative cancellation shared by a turn, its generation, and its tools.
#[derive(Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once `abort` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_resolves_after_abort() {
        let signal = AbortSignal::new();
        let waiter = signal.clone();
        let (_, ()) = tokio::join!(
            async {
                tokio::task::yield_now().await;
                signal.abort();
            },
            waiter.cancelled()
        );
        assert!(waiter.is_aborted());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_returns_immediately_when_already_aborted() {
        let signal = AbortSignal::new();
        signal.abort();
        signal.cancelled().await;
    }
}
