use crate::error::{Result, ServiceError};
use crate::exit_signal::ExitSignal;
use crate::state::ServiceState;
use crate::stats::ServiceStats;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Why a shutdown was requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
    ParentCancelled,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "signal {}", name),
            ShutdownReason::Error(message) => write!(f, "error: {}", message),
            ShutdownReason::UserRequest => write!(f, "user request"),
            ShutdownReason::ParentCancelled => write!(f, "parent context cancelled"),
        }
    }
}

/// Common surface for anything the host can start, stop and query
#[async_trait]
pub trait ManagedService: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn restart(&self) -> Result<()>;

    fn state(&self) -> ServiceState;

    fn is_running(&self) -> bool;

    fn is_stopped(&self) -> bool;

    fn stats(&self) -> ServiceStats;

    fn name(&self) -> &str;
}

/// Terminal result of one worker cycle. `None` while the worker is alive.
pub(super) type CycleOutcome = Option<std::result::Result<(), ServiceError>>;

/// Everything that belongs to a single start cycle
#[derive(Clone)]
pub(super) struct Cycle {
    pub(super) generation: u64,
    pub(super) exit: ExitSignal,
    pub(super) token: CancellationToken,
    pub(super) outcome: watch::Receiver<CycleOutcome>,
    pub(super) task: Arc<Mutex<Option<AbortHandle>>>,
    forced: Arc<AtomicBool>,
}

impl Cycle {
    pub(super) fn new(
        generation: u64,
        token: CancellationToken,
        outcome: watch::Receiver<CycleOutcome>,
    ) -> Self {
        Self {
            generation,
            exit: ExitSignal::new(),
            token,
            outcome,
            task: Arc::new(Mutex::new(None)),
            forced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The idle cycle held before the first start; already finished
    pub(super) fn idle(token: CancellationToken) -> Self {
        let (_tx, outcome) = watch::channel(Some(Ok(())));
        Self::new(0, token, outcome)
    }

    /// Claim the forced termination of this cycle; only the first caller wins
    pub(super) fn claim_force(&self) -> bool {
        !self.forced.swap(true, Ordering::AcqRel)
    }

    /// Wait for the worker to finish. A dropped sender counts as finished.
    pub(super) async fn finished(&self) -> CycleOutcome {
        let mut outcome = self.outcome.clone();
        let result = match outcome.wait_for(|value| value.is_some()).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        result
    }

    pub(super) fn abort_task(&self) -> bool {
        match self.task.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cycle")
            .field("generation", &self.generation)
            .field("exit_closed", &self.exit.is_closed())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
