use super::types::Cycle;
use super::LifecycleController;
use crate::error::{RestartPhase, Result, ServiceError};
use crate::escalation::{EscalationOutcome, TimeoutEscalator};
use crate::state::ServiceState;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

/// What happened while running the stop callbacks
#[derive(Debug, Default)]
pub(super) struct CallbackReport {
    pub(super) failed: usize,
    pub(super) panic: Option<ServiceError>,
}

impl LifecycleController {
    /// Stop the worker, running the stop callbacks at most once per cycle.
    ///
    /// Concurrent callers that lose the race return `Ok(())` immediately.
    /// If the worker ignores the request for longer than the stop budget the
    /// stop is forced and [`ServiceError::StopTimeout`] is returned.
    pub async fn stop(&self) -> Result<()> {
        let from = loop {
            let current = self.inner.state.state();
            match current {
                ServiceState::Stopped => {
                    return Err(ServiceError::AlreadyStopped {
                        service: self.name().to_string(),
                    })
                }
                ServiceState::Stopping => {
                    debug!("Stop of {} already in progress", self.name());
                    return Ok(());
                }
                ServiceState::Starting | ServiceState::Running | ServiceState::Error => {
                    if self
                        .inner
                        .state
                        .compare_and_swap(current, ServiceState::Stopping)
                    {
                        break current;
                    }
                }
            }
        };

        let cycle = self.current_cycle();
        let report = if self.inner.stop_executed.swap(true, Ordering::AcqRel) {
            info!(
                "Stopping service {} from {}, callbacks already ran this cycle",
                self.name(),
                from
            );
            CallbackReport::default()
        } else {
            let stops = self.inner.stats.record_stop();
            info!(
                "Stopping service {} from {} (stop #{})",
                self.name(),
                from,
                stops
            );
            self.run_stop_callbacks()
        };
        self.signal_exit(&cycle);

        let escalator = TimeoutEscalator::from_config(self.name(), &self.inner.lifecycle);
        let outcome = escalator
            .run(
                async {
                    cycle.finished().await;
                },
                // Callbacks ran above; re-invocation only happens in ForegroundRunner::run
                || async {
                    debug!(
                        "Stop callbacks for {} already ran this cycle, not re-invoking",
                        self.name()
                    );
                },
            )
            .await;

        if outcome.is_forced() {
            return Err(self.force_stop(&cycle, escalator.total_budget()));
        }

        if let Some(panic) = report.panic {
            self.inner.state.set_state(ServiceState::Error);
            return Err(panic);
        }

        self.inner
            .state
            .compare_and_swap(ServiceState::Stopping, ServiceState::Stopped);

        match outcome {
            EscalationOutcome::CompletedAfterRetry { elapsed } => {
                warn!("Service {} stopped late after {:?}", self.name(), elapsed)
            }
            _ => info!("Service {} stopped", self.name()),
        }
        if report.failed > 0 {
            warn!(
                "{} stop callback(s) for {} failed; see last error",
                report.failed,
                self.name()
            );
        }
        Ok(())
    }

    /// Stop if needed, pause for the settle delay, then start again
    pub async fn restart(&self) -> Result<()> {
        info!("Restarting service {}", self.name());

        if !self.is_stopped() {
            self.stop()
                .await
                .map_err(|e| self.restart_failed(RestartPhase::Stop, e))?;
        }

        tokio::time::sleep(self.inner.lifecycle.restart_delay()).await;

        self.start()
            .await
            .map_err(|e| self.restart_failed(RestartPhase::Start, e))
    }

    /// Run every stop callback in registration order, recording failures
    pub(super) fn run_stop_callbacks(&self) -> CallbackReport {
        let mut report = CallbackReport::default();

        for (index, stop_fn) in self.inner.stop_fns.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| stop_fn())) {
                Ok(Ok(())) => debug!("Stop callback {} for {} completed", index, self.name()),
                Ok(Err(e)) => {
                    let err = ServiceError::callback_failed(self.name(), "stop", e);
                    error!("{}", err);
                    self.inner.stats.record_error(err);
                    report.failed += 1;
                }
                Err(payload) => {
                    let err = ServiceError::panicked(self.name(), "stop", &*payload);
                    error!("{}", err);
                    self.inner.stats.record_error(err.clone());
                    report.failed += 1;
                    report.panic = Some(err);
                }
            }
        }

        report
    }

    /// Close the exit signal, then cancel the cycle token
    fn signal_exit(&self, cycle: &Cycle) {
        if cycle.exit.close() {
            debug!("Exit signal closed for {}", self.name());
        }
        cycle.token.cancel();
    }

    /// Give up on a worker that ignored both stop windows
    pub(super) fn force_stop(&self, cycle: &Cycle, budget: std::time::Duration) -> ServiceError {
        let err = ServiceError::StopTimeout {
            service: self.name().to_string(),
            timeout: budget,
        };

        if !cycle.claim_force() {
            debug!("Stop of {} was already forced this cycle", self.name());
            return err;
        }

        if cycle.abort_task() {
            warn!("Aborted worker task for {}", self.name());
        }
        let forced = self.inner.stats.record_forced_stop();
        self.inner.stats.record_error(err.clone());

        let previous = self.inner.state.set_state(ServiceState::Stopped);
        error!(
            "Forced stop of {} after {:?} (was {}, forced stop #{})",
            self.name(),
            budget,
            previous,
            forced
        );
        err
    }

    fn restart_failed(&self, phase: RestartPhase, source: ServiceError) -> ServiceError {
        error!("Restart of {} failed during {}: {}", self.name(), phase, source);
        ServiceError::RestartFailed {
            service: self.name().to_string(),
            phase,
            source: Box::new(source),
        }
    }
}
