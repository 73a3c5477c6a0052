use super::{LifecycleController, ShutdownReason};
use crate::error::Result;
use crate::escalation::{EscalationOutcome, ExitWatchdog, TimeoutEscalator};
use crate::signals::SignalBridge;
use crate::state::ServiceState;
use crate::stats::ServiceStats;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Result of a foreground run
#[derive(Debug)]
pub struct RunReport {
    pub exit_code: i32,
    /// The worker had to be abandoned during shutdown
    pub forced: bool,
    pub reason: Option<ShutdownReason>,
    pub escalation: Option<EscalationOutcome>,
    pub stats: ServiceStats,
    watchdog: Option<ExitWatchdog>,
}

impl RunReport {
    /// Cancel the pending forced exit once the caller has finished cleanup
    pub fn disarm_watchdog(&self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.disarm();
        }
    }

    pub fn watchdog_armed(&self) -> bool {
        self.watchdog
            .as_ref()
            .map(|watchdog| !watchdog.is_disarmed())
            .unwrap_or(false)
    }
}

/// Runs a controller in the foreground until its worker ends or shutdown is
/// requested, then drives a bounded shutdown
pub struct ForegroundRunner {
    controller: LifecycleController,
    bridge: SignalBridge,
}

impl ForegroundRunner {
    pub fn new(controller: LifecycleController, bridge: SignalBridge) -> Self {
        Self { controller, bridge }
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// Run the service and return once it has stopped
    pub async fn run(&self) -> Result<RunReport> {
        let name = self.controller.name().to_string();
        info!("Running service {} in the foreground", name);

        self.controller.start().await?;
        let watcher = self.bridge.attach(&self.controller);

        let reason = tokio::select! {
            biased;
            reason = self.bridge.wait() => reason,
            outcome = self.controller.wait() => {
                watcher.abort();
                let exit_code = match outcome {
                    Some(Err(e)) => {
                        error!("Service {} failed: {}", name, e);
                        1
                    }
                    _ => {
                        info!("Service {} finished on its own", name);
                        0
                    }
                };
                self.settle().await;
                return Ok(self.report(exit_code, false, None, None, None));
            }
        };

        info!("Shutdown initiated: {}", reason);
        let forced_before = self.controller.stats().forced_stop_count;

        let lifecycle = *self.controller.lifecycle();
        let escalator = TimeoutEscalator::from_config(name.as_str(), &lifecycle);
        let outcome = escalator
            .run(
                async {
                    self.controller.wait().await;
                },
                || async {
                    if !self.controller.stop_executed() && !self.controller.is_stopped() {
                        warn!("Stop has not run for {}, invoking it now", name);
                        let controller = self.controller.clone();
                        tokio::spawn(async move {
                            if let Err(e) = controller.stop().await {
                                warn!("Stop of {} failed: {}", controller.name(), e);
                            }
                        });
                    }
                },
            )
            .await;

        // A concurrent stop may have forced the worker while we waited
        let forced = outcome.is_forced()
            || self.controller.stats().forced_stop_count > forced_before;

        if !forced {
            self.settle().await;
            let exit_code = if self.controller.state() == ServiceState::Error {
                1
            } else {
                0
            };
            info!("Service {} shutdown complete", name);
            return Ok(self.report(exit_code, false, Some(reason), Some(outcome), None));
        }

        if self.controller.state() != ServiceState::Stopped {
            let cycle = self.controller.current_cycle();
            let err = self.controller.force_stop(&cycle, escalator.total_budget());
            warn!("{}", err);
        }

        let watchdog = if lifecycle.force_exit {
            Some(ExitWatchdog::arm(lifecycle.exit_grace(), 1))
        } else {
            None
        };

        error!("Service {} did not shut down cleanly", name);
        Ok(self.report(1, true, Some(reason), Some(outcome), watchdog))
    }

    /// Give an in-flight stop time to publish its final state
    async fn settle(&self) {
        let deadline = self.controller.lifecycle().total_stop_budget();
        let started = Instant::now();
        while !self.controller.state().is_settled() && started.elapsed() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn report(
        &self,
        exit_code: i32,
        forced: bool,
        reason: Option<ShutdownReason>,
        escalation: Option<EscalationOutcome>,
        watchdog: Option<ExitWatchdog>,
    ) -> RunReport {
        RunReport {
            exit_code,
            forced,
            reason,
            escalation,
            stats: self.controller.stats(),
            watchdog,
        }
    }
}
