use crate::state::ServiceState;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by user run and stop callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stable machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ServiceAlreadyRunning,
    ServiceAlreadyStopped,
    ServiceStart,
    ServiceStop,
    ServiceRestart,
    InvalidStateTransition,
    ServiceTimeout,
    ConfigValidation,
    RuntimeError,
    UserCallbackFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ServiceAlreadyRunning => "SERVICE_ALREADY_RUNNING",
            ErrorCode::ServiceAlreadyStopped => "SERVICE_ALREADY_STOPPED",
            ErrorCode::ServiceStart => "SERVICE_START",
            ErrorCode::ServiceStop => "SERVICE_STOP",
            ErrorCode::ServiceRestart => "SERVICE_RESTART",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::ServiceTimeout => "SERVICE_TIMEOUT",
            ErrorCode::ConfigValidation => "CONFIG_VALIDATION",
            ErrorCode::RuntimeError => "RUNTIME_ERROR",
            ErrorCode::UserCallbackFailed => "USER_CALLBACK_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single invalid configuration field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every field error found while validating a configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F: Into<String>, M: Into<String>>(&mut self, field: F, message: M) {
        self.errors.push(FieldError::new(field, message));
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Check whether a given field failed validation
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Convert into a result, failing when any error was collected
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::ConfigValidation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no errors"),
            [single] => write!(f, "{}", single),
            many => {
                write!(f, "{} errors: ", many.len())?;
                for (i, err) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

/// Which half of a restart failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Stop,
    Start,
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPhase::Stop => write!(f, "stop"),
            RestartPhase::Start => write!(f, "start"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    #[error("service {service} is already running")]
    AlreadyRunning { service: String },

    #[error("service {service} is already stopped")]
    AlreadyStopped { service: String },

    #[error("service {service} is still starting")]
    StartingInProgress { service: String },

    #[error("service {service} is stopping, wait for the stop to complete")]
    StoppingInProgress { service: String },

    #[error("service {service} cannot {operation} while {from} (wanted {to})")]
    InvalidStateTransition {
        service: String,
        operation: &'static str,
        from: ServiceState,
        to: ServiceState,
    },

    #[error("service {service} start timed out after {timeout:?}")]
    StartTimeout { service: String, timeout: Duration },

    #[error("service {service} stop timed out after {timeout:?}")]
    StopTimeout { service: String, timeout: Duration },

    #[error("configuration validation failed: {0}")]
    ConfigValidation(ValidationErrors),

    #[error("service {service} panicked during {operation}: {message}")]
    RuntimePanic {
        service: String,
        operation: &'static str,
        message: String,
    },

    #[error("service {service} {operation} callback failed: {source}")]
    UserCallbackFailed {
        service: String,
        operation: &'static str,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("service {service} restart failed during {phase}: {source}")]
    RestartFailed {
        service: String,
        phase: RestartPhase,
        #[source]
        source: Box<ServiceError>,
    },
}

impl ServiceError {
    /// Wrap an error returned by a user callback
    pub fn callback_failed<S: Into<String>>(
        service: S,
        operation: &'static str,
        source: BoxError,
    ) -> Self {
        Self::UserCallbackFailed {
            service: service.into(),
            operation,
            source: Arc::from(source),
        }
    }

    /// Convert a recovered panic payload
    pub fn panicked<S: Into<String>>(
        service: S,
        operation: &'static str,
        payload: &(dyn Any + Send),
    ) -> Self {
        Self::RuntimePanic {
            service: service.into(),
            operation,
            message: panic_message(payload),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::AlreadyRunning { .. } => ErrorCode::ServiceAlreadyRunning,
            ServiceError::AlreadyStopped { .. } => ErrorCode::ServiceAlreadyStopped,
            ServiceError::StartingInProgress { .. } => ErrorCode::ServiceStart,
            ServiceError::StoppingInProgress { .. } => ErrorCode::ServiceStop,
            ServiceError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            ServiceError::StartTimeout { .. } | ServiceError::StopTimeout { .. } => {
                ErrorCode::ServiceTimeout
            }
            ServiceError::ConfigValidation(_) => ErrorCode::ConfigValidation,
            ServiceError::RuntimePanic { .. } => ErrorCode::RuntimeError,
            ServiceError::UserCallbackFailed { .. } => ErrorCode::UserCallbackFailed,
            ServiceError::RestartFailed { .. } => ErrorCode::ServiceRestart,
        }
    }

    /// State conflicts are returned to the caller and never retried
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            ServiceError::AlreadyRunning { .. }
                | ServiceError::AlreadyStopped { .. }
                | ServiceError::StartingInProgress { .. }
                | ServiceError::StoppingInProgress { .. }
                | ServiceError::InvalidStateTransition { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        self.code() == ErrorCode::ServiceTimeout
    }
}

/// Render a panic payload the way the standard panic hook does
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_display() {
        let mut errors = ValidationErrors::new();
        errors.push("name", "must not be empty");
        assert_eq!(errors.to_string(), "name: must not be empty");

        errors.push("display_name", "must not be empty");
        assert_eq!(
            errors.to_string(),
            "2 errors: name: must not be empty; display_name: must not be empty"
        );
        assert!(errors.has_field("display_name"));
        assert!(!errors.has_field("description"));
    }

    #[test]
    fn test_empty_validation_errors_are_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_error_codes() {
        let err = ServiceError::AlreadyRunning {
            service: "demo".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::ServiceAlreadyRunning);
        assert_eq!(err.code().as_str(), "SERVICE_ALREADY_RUNNING");
        assert!(err.is_state_conflict());

        let err = ServiceError::StopTimeout {
            service: "demo".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
        assert!(!err.is_state_conflict());
    }

    #[test]
    fn test_callback_error_keeps_source() {
        let err = ServiceError::callback_failed("demo", "stop", "disk full".into());
        assert_eq!(err.code(), ErrorCode::UserCallbackFailed);
        assert_eq!(err.to_string(), "service demo stop callback failed: disk full");
        let source = std::error::Error::source(&err).expect("source should be kept");
        assert_eq!(source.to_string(), "disk full");
    }

    #[test]
    fn test_panic_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("formatted boom"));
        assert_eq!(panic_message(payload.as_ref()), "formatted boom");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_restart_failure_wraps_cause() {
        let cause = ServiceError::AlreadyStopped {
            service: "demo".to_string(),
        };
        let err = ServiceError::RestartFailed {
            service: "demo".to_string(),
            phase: RestartPhase::Stop,
            source: Box::new(cause),
        };
        assert_eq!(err.code(), ErrorCode::ServiceRestart);
        assert!(err.to_string().contains("during stop"));
    }
}
