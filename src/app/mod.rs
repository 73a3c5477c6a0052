mod controller;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use controller::{ControllerBuilder, LifecycleController};
pub use runtime::{ForegroundRunner, RunReport};
pub use types::{ManagedService, ShutdownReason};
