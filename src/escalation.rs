use crate::config::LifecycleConfig;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// How a staged shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// The worker exited inside the first window
    Completed { elapsed: Duration },
    /// The worker exited after the stop callbacks were re-invoked
    CompletedAfterRetry { elapsed: Duration },
    /// Neither window was enough; the caller must force the stop
    Forced { elapsed: Duration },
}

impl EscalationOutcome {
    pub fn is_forced(&self) -> bool {
        matches!(self, EscalationOutcome::Forced { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            EscalationOutcome::Completed { elapsed }
            | EscalationOutcome::CompletedAfterRetry { elapsed }
            | EscalationOutcome::Forced { elapsed } => *elapsed,
        }
    }
}

/// Wait, re-invoke, then give up: bounds how long a stop can take
#[derive(Debug, Clone)]
pub struct TimeoutEscalator {
    service: String,
    first_window: Duration,
    second_window: Duration,
}

impl TimeoutEscalator {
    pub fn new<S: Into<String>>(service: S, first_window: Duration, second_window: Duration) -> Self {
        Self {
            service: service.into(),
            first_window,
            second_window,
        }
    }

    pub fn from_config<S: Into<String>>(service: S, config: &LifecycleConfig) -> Self {
        Self::new(service, config.stop_timeout(), config.stop_retry_timeout())
    }

    pub fn total_budget(&self) -> Duration {
        self.first_window + self.second_window
    }

    /// Drive the staged wait.
    ///
    /// `completion` resolves when the worker has exited. `reinvoke` runs once
    /// at the start of the second stage; it decides for itself whether the
    /// stop callbacks still need to run. The second window also bounds
    /// `reinvoke`.
    pub async fn run<C, R, RFut>(&self, completion: C, reinvoke: R) -> EscalationOutcome
    where
        C: Future<Output = ()>,
        R: FnOnce() -> RFut,
        RFut: Future<Output = ()>,
    {
        let started = Instant::now();
        tokio::pin!(completion);

        if timeout(self.first_window, &mut completion).await.is_ok() {
            let elapsed = started.elapsed();
            debug!("Service {} exited after {:?}", self.service, elapsed);
            return EscalationOutcome::Completed { elapsed };
        }

        warn!(
            "Service {} did not exit within {:?}, re-invoking stop",
            self.service, self.first_window
        );

        let second_stage = async {
            reinvoke().await;
            (&mut completion).await;
        };

        if timeout(self.second_window, second_stage).await.is_ok() {
            let elapsed = started.elapsed();
            info!(
                "Service {} exited after stop was re-invoked ({:?})",
                self.service, elapsed
            );
            return EscalationOutcome::CompletedAfterRetry { elapsed };
        }

        let elapsed = started.elapsed();
        error!(
            "Service {} still running after {:?}, forcing stop",
            self.service, elapsed
        );
        EscalationOutcome::Forced { elapsed }
    }
}

/// Terminates the process after a grace delay unless disarmed first
#[derive(Debug)]
pub struct ExitWatchdog {
    disarmed: Arc<AtomicBool>,
}

impl ExitWatchdog {
    pub fn arm(grace: Duration, exit_code: i32) -> Self {
        let disarmed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&disarmed);

        warn!(
            "Process will exit with code {} in {:?} unless shutdown completes",
            exit_code, grace
        );

        std::thread::spawn(move || {
            std::thread::sleep(grace);
            if !flag.load(Ordering::Acquire) {
                error!("Shutdown did not complete within {:?}, exiting", grace);
                std::process::exit(exit_code);
            }
        });

        Self { disarmed }
    }

    pub fn disarm(&self) {
        self.disarmed.store(true, Ordering::Release);
    }

    pub fn is_disarmed(&self) -> bool {
        self.disarmed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;
    use tokio::time::sleep;

    fn escalator() -> TimeoutEscalator {
        TimeoutEscalator::new(
            "escalation-test",
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn test_completes_in_first_window() {
        let reinvoked = AtomicUsize::new(0);
        let outcome = escalator()
            .run(sleep(Duration::from_millis(10)), || async {
                reinvoked.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(outcome, EscalationOutcome::Completed { .. }));
        assert_eq!(reinvoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reinvoke_unblocks_worker() {
        let release = Arc::new(Notify::new());
        let waiter = Arc::clone(&release);
        let completion = async move { waiter.notified().await };

        let outcome = escalator()
            .run(completion, || async {
                release.notify_one();
            })
            .await;

        match outcome {
            EscalationOutcome::CompletedAfterRetry { elapsed } => {
                assert!(elapsed >= Duration::from_millis(100));
            }
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forced_after_full_budget() {
        let escalator = escalator();
        let started = Instant::now();
        let outcome = escalator
            .run(futures::future::pending::<()>(), || async {})
            .await;

        assert!(outcome.is_forced());
        let elapsed = started.elapsed();
        assert!(elapsed >= escalator.total_budget());
        assert!(elapsed < escalator.total_budget() + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_hanging_reinvoke_is_bounded() {
        let outcome = escalator()
            .run(futures::future::pending::<()>(), || {
                futures::future::pending::<()>()
            })
            .await;
        assert!(outcome.is_forced());
        assert!(outcome.elapsed() < Duration::from_millis(700));
    }

    #[test]
    fn test_budget_from_config() {
        let config = LifecycleConfig::default();
        let escalator = TimeoutEscalator::from_config("demo", &config);
        assert_eq!(escalator.total_budget(), Duration::from_secs(5));
    }

    #[test]
    fn test_disarmed_watchdog_does_not_exit() {
        let watchdog = ExitWatchdog::arm(Duration::from_millis(20), 3);
        watchdog.disarm();
        assert!(watchdog.is_disarmed());
        std::thread::sleep(Duration::from_millis(60));
    }
}
