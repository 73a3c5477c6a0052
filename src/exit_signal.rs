use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Close-once broadcast telling a run loop that its cycle is over.
///
/// Clones share the same underlying signal. The controller creates a fresh
/// signal for every start cycle, so a clone taken during one cycle never
/// observes the next one.
#[derive(Clone, Debug, Default)]
pub struct ExitSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    closed: AtomicBool,
    notify: Notify,
}

impl ExitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the signal. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Wait until the signal is closed
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent close is not missed
            notified.as_mut().enable();

            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Whether two handles refer to the same cycle
    pub fn same_cycle(&self, other: &ExitSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_close_exactly_once() {
        let signal = ExitSignal::new();
        assert!(!signal.is_closed());
        assert!(signal.close());
        assert!(!signal.close());
        assert!(signal.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_closers_single_winner() {
        let signal = ExitSignal::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let signal = signal.clone();
            handles.push(tokio::spawn(async move { signal.close() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_waiters_wake_on_close() {
        let signal = ExitSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.closed().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.close();

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_returns_immediately_when_already_closed() {
        let signal = ExitSignal::new();
        signal.close();
        timeout(Duration::from_millis(100), signal.closed())
            .await
            .expect("closed signal should not block");
    }

    #[test]
    fn test_new_signal_is_a_new_cycle() {
        let first = ExitSignal::new();
        let clone = first.clone();
        let second = ExitSignal::new();
        assert!(first.same_cycle(&clone));
        assert!(!first.same_cycle(&second));
    }
}
