use crate::error::BoxError;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type RunFuture = BoxFuture<'static, Result<(), BoxError>>;

/// User cleanup callback run during the stop sequence
pub type StopFn = Arc<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

/// The worker routine in one of its two calling conventions
#[derive(Clone)]
pub enum RunFn {
    /// Receives the cycle's cancellation token. Returning ends the cycle.
    WithContext(Arc<dyn Fn(CancellationToken) -> RunFuture + Send + Sync>),
    /// Takes no arguments. Returning only means setup is done; the cycle
    /// stays up until a stop or shutdown request arrives.
    Legacy(Arc<dyn Fn() -> RunFuture + Send + Sync>),
}

impl RunFn {
    pub fn with_context<F, Fut>(run: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        RunFn::WithContext(Arc::new(move |token| run(token).boxed()))
    }

    pub fn legacy<F, Fut>(run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        RunFn::Legacy(Arc::new(move || run().boxed()))
    }

    /// Adapt a [`ServiceRunner`] to the context-accepting convention
    pub fn from_runner<R: ServiceRunner + 'static>(runner: Arc<R>) -> Self {
        RunFn::WithContext(Arc::new(move |token| {
            let runner = Arc::clone(&runner);
            async move { runner.run(token).await }.boxed()
        }))
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, RunFn::Legacy(_))
    }

    pub(crate) fn invoke(&self, token: CancellationToken) -> RunFuture {
        match self {
            RunFn::WithContext(run) => run(token),
            RunFn::Legacy(run) => run(),
        }
    }
}

impl fmt::Debug for RunFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFn::WithContext(_) => write!(f, "RunFn::WithContext"),
            RunFn::Legacy(_) => write!(f, "RunFn::Legacy"),
        }
    }
}

/// Trait form of a managed worker
#[async_trait::async_trait]
pub trait ServiceRunner: Send + Sync {
    /// Run until the work is done or `token` is cancelled
    async fn run(&self, token: CancellationToken) -> Result<(), BoxError>;

    /// Release resources; called once per stop cycle
    fn stop(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Get the name of this runner for logging
    fn name(&self) -> &str;
}
