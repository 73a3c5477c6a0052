use crate::error::ServiceError;
use crate::state::ServiceState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Lifecycle counters and last error for one controller
#[derive(Debug, Default)]
pub struct StatsRecorder {
    start_count: AtomicU64,
    stop_count: AtomicU64,
    forced_stop_count: AtomicU64,
    last_error: Mutex<Option<ServiceError>>,
    timestamps: Mutex<Timestamps>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Timestamps {
    last_started_at: Option<DateTime<Utc>>,
    last_stopped_at: Option<DateTime<Utc>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a start cycle, returning the new total
    pub fn record_start(&self) -> u64 {
        self.timestamps.lock().last_started_at = Some(Utc::now());
        self.start_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Count a stop cycle, returning the new total
    pub fn record_stop(&self) -> u64 {
        self.timestamps.lock().last_stopped_at = Some(Utc::now());
        self.stop_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_forced_stop(&self) -> u64 {
        self.forced_stop_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_error(&self, error: ServiceError) {
        debug!("Recording service error [{}]: {}", error.code(), error);
        *self.last_error.lock() = Some(error);
    }

    pub fn start_count(&self) -> u64 {
        self.start_count.load(Ordering::Acquire)
    }

    pub fn stop_count(&self) -> u64 {
        self.stop_count.load(Ordering::Acquire)
    }

    pub fn forced_stop_count(&self) -> u64 {
        self.forced_stop_count.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<ServiceError> {
        self.last_error.lock().clone()
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self, name: &str, state: ServiceState) -> ServiceStats {
        let timestamps = *self.timestamps.lock();
        ServiceStats {
            name: name.to_string(),
            state,
            start_count: self.start_count(),
            stop_count: self.stop_count(),
            forced_stop_count: self.forced_stop_count(),
            last_error: self.last_error(),
            last_started_at: timestamps.last_started_at,
            last_stopped_at: timestamps.last_stopped_at,
        }
    }
}

/// Point-in-time view of a controller's statistics
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub name: String,
    pub state: ServiceState,
    pub start_count: u64,
    pub stop_count: u64,
    pub forced_stop_count: u64,
    #[serde(serialize_with = "serialize_last_error", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ServiceError>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_stopped_at: Option<DateTime<Utc>>,
}

impl ServiceStats {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Serialize)]
struct ErrorSummary {
    code: &'static str,
    message: String,
}

fn serialize_last_error<S>(error: &Option<ServiceError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(error) => ErrorSummary {
            code: error.code().as_str(),
            message: error.to_string(),
        }
        .serialize(serializer),
        None => serializer.serialize_none(),
    }
}
