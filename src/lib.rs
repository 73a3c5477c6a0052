pub mod app;
pub mod config;
pub mod error;
pub mod escalation;
pub mod exit_signal;
pub mod messages;
pub mod runner;
pub mod signals;
pub mod state;
pub mod stats;

pub use app::{
    ControllerBuilder, ForegroundRunner, LifecycleController, ManagedService, RunReport,
    ShutdownReason,
};
pub use config::{LifecycleConfig, ServiceConfig, SvcctlConfig, UiConfig};
pub use error::{BoxError, ErrorCode, FieldError, Result, ServiceError, ValidationErrors};
pub use escalation::{EscalationOutcome, ExitWatchdog, TimeoutEscalator};
pub use exit_signal::ExitSignal;
pub use messages::{Language, MessageKey, Messages};
pub use runner::{RunFn, ServiceRunner, StopFn};
pub use signals::SignalBridge;
pub use state::{ServiceState, StateListener, StateMachine};
pub use stats::{ServiceStats, StatsRecorder};
