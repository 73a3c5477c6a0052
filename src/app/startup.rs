use super::types::Cycle;
use super::LifecycleController;
use crate::error::{Result, ServiceError};
use crate::state::ServiceState;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

impl LifecycleController {
    /// Start the worker in the background and return immediately
    pub async fn start(&self) -> Result<()> {
        self.launch().map(|_| ())
    }

    /// Start the worker and block until it fails, finishes, or `wait` elapses.
    ///
    /// Reaching the timeout moves the service to `Error` and returns
    /// [`ServiceError::StartTimeout`]; the worker itself is left running.
    pub async fn start_and_wait(&self, wait: Duration) -> Result<()> {
        let cycle = self.launch()?;

        match timeout(wait, cycle.finished()).await {
            Ok(Some(Err(e))) => Err(e),
            Ok(_) => Ok(()),
            Err(_) => {
                let err = ServiceError::StartTimeout {
                    service: self.name().to_string(),
                    timeout: wait,
                };
                error!("{}", err);
                self.inner.stats.record_error(err.clone());
                if self.is_current(&cycle) {
                    let state = &self.inner.state;
                    if !state.compare_and_swap(ServiceState::Running, ServiceState::Error) {
                        state.compare_and_swap(ServiceState::Starting, ServiceState::Error);
                    }
                }
                Err(err)
            }
        }
    }

    /// Claim Stopped -> Starting, open a fresh cycle and spawn its worker
    pub(super) fn launch(&self) -> Result<Cycle> {
        // Starts are serialized on the cycle lock; stops never take it across a transition
        let mut slot = self.inner.cycle.lock();

        let current = self.inner.state.state();
        if current != ServiceState::Stopped {
            return Err(self.start_conflict(current));
        }

        self.inner.stop_executed.store(false, Ordering::Release);
        if !self
            .inner
            .state
            .compare_and_swap(ServiceState::Stopped, ServiceState::Starting)
        {
            return Err(self.start_conflict(self.inner.state.state()));
        }

        let starts = self.inner.stats.record_start();
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let cycle = Cycle::new(generation, self.inner.root_token.child_token(), outcome_rx);
        *slot = cycle.clone();
        drop(slot);

        info!(
            "Starting service {} (start #{}, cycle {})",
            self.name(),
            starts,
            generation
        );

        let controller = self.clone();
        let worker_cycle = cycle.clone();
        tokio::spawn(async move {
            let outcome = controller.run_worker(&worker_cycle).await;
            let cancelled = worker_cycle.token.is_cancelled();
            let _ = outcome_tx.send_replace(Some(outcome));

            // Cancelled from outside without an explicit stop: run the stop sequence now
            if cancelled
                && controller.is_current(&worker_cycle)
                && controller.inner.state.state() == ServiceState::Running
                && !controller.stop_executed()
            {
                info!(
                    "Service {} cancelled by its parent context, stopping",
                    controller.name()
                );
                if let Err(e) = controller.stop().await {
                    debug!("Stop after cancellation returned: {}", e);
                }
            }
        });

        Ok(cycle)
    }

    async fn run_worker(&self, cycle: &Cycle) -> std::result::Result<(), ServiceError> {
        let name = self.name().to_string();

        if !self
            .inner
            .state
            .compare_and_swap(ServiceState::Starting, ServiceState::Running)
        {
            debug!("Service {} was stopped before its worker began", name);
            return Ok(());
        }
        info!("Service {} is running", name);

        let legacy = self.inner.run_fn.is_legacy();
        let run_fn = self.inner.run_fn.clone();
        let token = cycle.token.clone();
        // Invoked inside the task so a panic while building the future is caught as well
        let mut task = tokio::spawn(async move { run_fn.invoke(token).await });
        *cycle.task.lock() = Some(task.abort_handle());

        let mut cancelled = false;
        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                _ = cycle.token.cancelled(), if !cancelled => {
                    cancelled = true;
                    if cycle.exit.close() {
                        debug!("Closed exit signal for {} on cancellation", name);
                    }
                }
                _ = cycle.exit.closed(), if !cancelled => {
                    cancelled = true;
                    debug!("Exit signal closed for {}", name);
                }
            }
        };
        cycle.task.lock().take();

        let outcome = match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ServiceError::callback_failed(name.as_str(), "run", e)),
            Err(e) if e.is_panic() => {
                Err(ServiceError::panicked(name.as_str(), "run", &*e.into_panic()))
            }
            Err(_) => {
                warn!("Worker for {} was aborted", name);
                Ok(())
            }
        };

        // A legacy run returning only finishes its setup; park until told to exit
        if legacy && outcome.is_ok() && !cycle.token.is_cancelled() && !cycle.exit.is_closed() {
            debug!("Legacy run for {} returned, waiting for exit signal", name);
            tokio::select! {
                _ = cycle.token.cancelled() => {
                    cycle.exit.close();
                }
                _ = cycle.exit.closed() => {}
            }
        }

        self.settle_worker(cycle, &outcome);
        outcome
    }

    /// Apply a finished worker's result to the state machine
    fn settle_worker(&self, cycle: &Cycle, outcome: &std::result::Result<(), ServiceError>) {
        if !self.is_current(cycle) {
            debug!(
                "Ignoring result of stale cycle {} for {}",
                cycle.generation,
                self.name()
            );
            return;
        }

        let stopping = cycle.token.is_cancelled() || cycle.exit.is_closed();
        match outcome {
            Err(e) => {
                error!("Service {} worker failed: {}", self.name(), e);
                self.inner.stats.record_error(e.clone());
                // A stop already in flight owns the final transition
                if !stopping {
                    self.inner
                        .state
                        .compare_and_swap(ServiceState::Running, ServiceState::Error);
                }
            }
            Ok(()) if !stopping => {
                if self
                    .inner
                    .state
                    .compare_and_swap(ServiceState::Running, ServiceState::Stopping)
                {
                    cycle.exit.close();
                    cycle.token.cancel();
                    self.inner
                        .state
                        .compare_and_swap(ServiceState::Stopping, ServiceState::Stopped);
                    info!("Service {} finished", self.name());
                }
            }
            Ok(()) => {
                debug!("Worker for {} exited after stop request", self.name());
            }
        }
    }

    pub(super) fn is_current(&self, cycle: &Cycle) -> bool {
        self.inner.generation.load(Ordering::Acquire) == cycle.generation
    }

    /// Wait for the current cycle's worker to finish
    pub async fn wait(&self) -> Option<std::result::Result<(), ServiceError>> {
        self.current_cycle().finished().await
    }

    fn start_conflict(&self, current: ServiceState) -> ServiceError {
        let service = self.name().to_string();
        match current {
            ServiceState::Running => ServiceError::AlreadyRunning { service },
            ServiceState::Starting => ServiceError::StartingInProgress { service },
            ServiceState::Stopping => ServiceError::StoppingInProgress { service },
            from => ServiceError::InvalidStateTransition {
                service,
                operation: "start",
                from,
                to: ServiceState::Starting,
            },
        }
    }
}
