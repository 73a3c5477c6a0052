use super::types::Cycle;
use crate::config::{LifecycleConfig, ServiceConfig};
use crate::error::{BoxError, Result, ServiceError};
use crate::runner::{RunFn, ServiceRunner, StopFn};
use crate::state::StateMachine;
use crate::stats::StatsRecorder;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Drives one managed worker through start, stop and restart cycles.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct LifecycleController {
    pub(super) inner: Arc<Inner>,
}

pub(super) struct Inner {
    pub(super) config: ServiceConfig,
    pub(super) lifecycle: LifecycleConfig,
    pub(super) state: StateMachine,
    pub(super) stats: StatsRecorder,

    // User callbacks
    pub(super) run_fn: RunFn,
    pub(super) stop_fns: Vec<StopFn>,

    // Lifecycle management
    pub(super) stop_executed: AtomicBool,
    pub(super) generation: AtomicU64,
    pub(super) root_token: CancellationToken,
    pub(super) cycle: Mutex<Cycle>,
}

impl LifecycleController {
    pub fn builder(config: ServiceConfig) -> ControllerBuilder {
        ControllerBuilder::new(config)
    }

    /// Build a controller around a [`ServiceRunner`], wiring its `stop` as
    /// the stop callback
    pub fn from_runner<R: ServiceRunner + 'static>(
        config: ServiceConfig,
        lifecycle: LifecycleConfig,
        runner: Arc<R>,
    ) -> Result<Self> {
        let stopper = Arc::clone(&runner);
        ControllerBuilder::new(config)
            .lifecycle(lifecycle)
            .runner(runner)
            .on_stop(move || stopper.stop())
            .build()
    }

    /// Snapshot of the current cycle. The lock is released before returning.
    pub(super) fn current_cycle(&self) -> Cycle {
        self.inner.cycle.lock().clone()
    }
}

/// Collects the configuration and callbacks for a [`LifecycleController`]
pub struct ControllerBuilder {
    config: ServiceConfig,
    lifecycle: LifecycleConfig,
    run_fn: Option<RunFn>,
    stop_fns: Vec<StopFn>,
    parent_token: Option<CancellationToken>,
}

impl ControllerBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            lifecycle: LifecycleConfig::default(),
            run_fn: None,
            stop_fns: Vec::new(),
            parent_token: None,
        }
    }

    pub fn lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Worker that receives the cycle's cancellation token
    pub fn run<F, Fut>(mut self, run: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.run_fn = Some(RunFn::with_context(run));
        self
    }

    /// Worker using the no-argument convention; see [`RunFn::Legacy`]
    pub fn run_legacy<F, Fut>(mut self, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.run_fn = Some(RunFn::legacy(run));
        self
    }

    pub fn runner<R: ServiceRunner + 'static>(mut self, runner: Arc<R>) -> Self {
        self.run_fn = Some(RunFn::from_runner(runner));
        self
    }

    pub fn run_fn(mut self, run_fn: RunFn) -> Self {
        self.run_fn = Some(run_fn);
        self
    }

    /// Append a stop callback. Callbacks run in registration order.
    pub fn on_stop<F>(mut self, stop: F) -> Self
    where
        F: Fn() -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.stop_fns.push(Arc::new(stop));
        self
    }

    /// Cancelling `token` cancels every cycle of the built controller
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.parent_token = Some(token);
        self
    }

    pub fn build(self) -> Result<LifecycleController> {
        let mut errors = self.config.collect_errors();
        errors.extend(self.lifecycle.collect_errors());
        if self.run_fn.is_none() {
            errors.push("run", "a run function is required");
        }

        let run_fn = match self.run_fn {
            Some(run_fn) if errors.is_empty() => run_fn,
            _ => return Err(ServiceError::ConfigValidation(errors)),
        };

        let root_token = match self.parent_token {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };

        debug!(
            "Built controller for {} ({:?}, {} stop callbacks)",
            self.config.name,
            run_fn,
            self.stop_fns.len()
        );

        let idle = Cycle::idle(root_token.child_token());
        Ok(LifecycleController {
            inner: Arc::new(Inner {
                config: self.config,
                lifecycle: self.lifecycle,
                state: StateMachine::new(),
                stats: StatsRecorder::new(),
                run_fn,
                stop_fns: self.stop_fns,
                stop_executed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                root_token,
                cycle: Mutex::new(idle),
            }),
        })
    }
}
