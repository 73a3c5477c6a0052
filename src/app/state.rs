use super::types::ManagedService;
use super::LifecycleController;
use crate::config::{LifecycleConfig, ServiceConfig};
use crate::error::{Result, ServiceError};
use crate::exit_signal::ExitSignal;
use crate::state::ServiceState;
use crate::stats::ServiceStats;
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

impl LifecycleController {
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn lifecycle(&self) -> &LifecycleConfig {
        &self.inner.lifecycle
    }

    pub fn state(&self) -> ServiceState {
        self.inner.state.state()
    }

    /// True while starting or running
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            ServiceState::Starting | ServiceState::Running
        )
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ServiceState::Stopped
    }

    /// Whether the stop sequence has already run for the current cycle
    pub fn stop_executed(&self) -> bool {
        self.inner.stop_executed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ServiceStats {
        self.inner.stats.snapshot(self.name(), self.state())
    }

    pub fn last_error(&self) -> Option<ServiceError> {
        self.inner.stats.last_error()
    }

    /// Exit signal of the current cycle
    pub fn exit_signal(&self) -> ExitSignal {
        self.current_cycle().exit
    }

    /// Cancellation token of the current cycle
    pub fn cancellation_token(&self) -> CancellationToken {
        self.current_cycle().token
    }

    /// Register a callback for every state change.
    ///
    /// Listeners run off the caller's thread; a panicking listener is logged
    /// and does not affect the controller.
    pub fn add_state_listener<F>(&self, listener: F)
    where
        F: Fn(ServiceState, ServiceState) + Send + Sync + 'static,
    {
        self.inner.state.add_listener(Arc::new(listener));
    }
}

#[async_trait]
impl ManagedService for LifecycleController {
    async fn start(&self) -> Result<()> {
        LifecycleController::start(self).await
    }

    async fn stop(&self) -> Result<()> {
        LifecycleController::stop(self).await
    }

    async fn restart(&self) -> Result<()> {
        LifecycleController::restart(self).await
    }

    fn state(&self) -> ServiceState {
        LifecycleController::state(self)
    }

    fn is_running(&self) -> bool {
        LifecycleController::is_running(self)
    }

    fn is_stopped(&self) -> bool {
        LifecycleController::is_stopped(self)
    }

    fn stats(&self) -> ServiceStats {
        LifecycleController::stats(self)
    }

    fn name(&self) -> &str {
        LifecycleController::name(self)
    }
}
