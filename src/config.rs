use crate::error::{Result, ValidationErrors};
use crate::messages::Language;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const NAME_MIN_LEN: usize = 3;
pub const NAME_MAX_LEN: usize = 50;
pub const DISPLAY_NAME_MAX_LEN: usize = 100;
pub const DESCRIPTION_MAX_LEN: usize = 500;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SvcctlConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

/// Identity of the managed service as seen by the OS service manager
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Service name used by the service manager (3 to 50 characters)
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Human readable name (at most 100 characters)
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Free-form description (at most 500 characters)
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: String,

    /// Working directory for the service process
    #[serde(default)]
    pub work_dir: String,

    #[serde(default)]
    pub username: String,

    /// Services that must be up before this one
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Environment variables passed to the service
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,

    #[serde(default)]
    pub arguments: Vec<String>,

    #[serde(default)]
    pub executable: String,

    #[serde(default)]
    pub chroot: String,
}

/// Timeouts that bound start, stop and restart
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Bounded wait used by the foreground start variant
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    /// First stop window: wait for the worker after cancelling it
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Second stop window after re-invoking the stop callbacks
    #[serde(default = "default_stop_retry_timeout_ms")]
    pub stop_retry_timeout_ms: u64,

    /// Settle interval between the stop and start halves of a restart
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Grace period before a forced process exit after escalation
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,

    /// Terminate the process when a foreground stop had to be forced
    #[serde(default = "default_force_exit")]
    pub force_exit: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct UiConfig {
    /// Message catalog language (en, zh)
    #[serde(default = "default_language")]
    pub language: String,
}

impl SvcctlConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from_file("svcctl.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("service.name", default_service_name())?
            .set_default("service.display_name", default_display_name())?
            .set_default(
                "lifecycle.start_timeout_ms",
                default_start_timeout_ms() as i64,
            )?
            .set_default(
                "lifecycle.stop_timeout_ms",
                default_stop_timeout_ms() as i64,
            )?
            .set_default(
                "lifecycle.stop_retry_timeout_ms",
                default_stop_retry_timeout_ms() as i64,
            )?
            .set_default(
                "lifecycle.restart_delay_ms",
                default_restart_delay_ms() as i64,
            )?
            .set_default("lifecycle.exit_grace_ms", default_exit_grace_ms() as i64)?
            .set_default("lifecycle.force_exit", default_force_exit())?
            .set_default("ui.language", default_language())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables, e.g. SVCCTL_LIFECYCLE__STOP_TIMEOUT_MS
            .add_source(
                Environment::with_prefix("SVCCTL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: SvcctlConfig = settings.try_deserialize()?;

        // Keys are lowercased by the layered loader; env var names are case-sensitive
        let is_toml = path.as_ref().extension().is_some_and(|ext| ext == "toml");
        if is_toml && path.as_ref().is_file() {
            let env_vars = read_env_vars(path.as_ref())?;
            if !env_vars.is_empty() {
                config.service.env_vars = env_vars;
            }
        }

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate every section, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = self.service.collect_errors();
        errors.extend(self.lifecycle.collect_errors());
        if let Err(message) = self.ui.language.parse::<Language>() {
            errors.push("ui.language", message);
        }
        errors.into_result()
    }

    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl ServiceConfig {
    pub fn new<N: Into<String>, D: Into<String>>(name: N, display_name: D) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: String::new(),
            version: String::new(),
            work_dir: String::new(),
            username: String::new(),
            dependencies: Vec::new(),
            env_vars: BTreeMap::new(),
            arguments: Vec::new(),
            executable: String::new(),
            chroot: String::new(),
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependency<S: Into<String>>(mut self, dependency: S) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Validate the service identity, aggregating every field error
    pub fn validate(&self) -> Result<()> {
        self.collect_errors().into_result()
    }

    pub(crate) fn collect_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        let name_len = self.name.chars().count();
        if self.name.trim().is_empty() {
            errors.push("service.name", "is required");
        } else if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&name_len) {
            errors.push(
                "service.name",
                format!(
                    "must be between {} and {} characters (got {})",
                    NAME_MIN_LEN, NAME_MAX_LEN, name_len
                ),
            );
        }

        let display_len = self.display_name.chars().count();
        if self.display_name.trim().is_empty() {
            errors.push("service.display_name", "is required");
        } else if display_len > DISPLAY_NAME_MAX_LEN {
            errors.push(
                "service.display_name",
                format!(
                    "must be at most {} characters (got {})",
                    DISPLAY_NAME_MAX_LEN, display_len
                ),
            );
        }

        let description_len = self.description.chars().count();
        if description_len > DESCRIPTION_MAX_LEN {
            errors.push(
                "service.description",
                format!(
                    "must be at most {} characters (got {})",
                    DESCRIPTION_MAX_LEN, description_len
                ),
            );
        }

        for (i, dependency) in self.dependencies.iter().enumerate() {
            if dependency.trim().is_empty() {
                errors.push(format!("service.dependencies[{}]", i), "must not be empty");
            }
        }

        for (key, value) in &self.env_vars {
            if key.trim().is_empty() {
                errors.push("service.env_vars", "keys must not be empty");
            }
            if value.is_empty() {
                errors.push(format!("service.env_vars.{}", key), "value must not be empty");
            }
        }

        errors
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(default_service_name(), default_display_name())
    }
}

impl LifecycleConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stop_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_retry_timeout_ms)
    }

    /// Total escalation budget; keep this below the service manager's stop timeout
    pub fn total_stop_budget(&self) -> Duration {
        self.stop_timeout() + self.stop_retry_timeout()
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.collect_errors().into_result()
    }

    pub(crate) fn collect_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.start_timeout_ms == 0 {
            errors.push("lifecycle.start_timeout_ms", "must be greater than 0");
        }
        if self.stop_timeout_ms == 0 {
            errors.push("lifecycle.stop_timeout_ms", "must be greater than 0");
        }
        if self.stop_retry_timeout_ms == 0 {
            errors.push("lifecycle.stop_retry_timeout_ms", "must be greater than 0");
        }
        errors
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: default_start_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            stop_retry_timeout_ms: default_stop_retry_timeout_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            exit_grace_ms: default_exit_grace_ms(),
            force_exit: default_force_exit(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
        }
    }
}

#[derive(Deserialize, Default)]
struct RawFile {
    #[serde(default)]
    service: RawService,
}

#[derive(Deserialize, Default)]
struct RawService {
    #[serde(default)]
    env_vars: BTreeMap<String, String>,
}

/// Read `service.env_vars` straight from the TOML file with key case intact
fn read_env_vars(path: &Path) -> std::result::Result<BTreeMap<String, String>, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Foreign(Box::new(e)))?;
    let raw: RawFile = toml::from_str(&contents).map_err(|e| ConfigError::Foreign(Box::new(e)))?;
    Ok(raw.service.env_vars)
}

// Default value functions
fn default_service_name() -> String {
    "svcctl-worker".to_string()
}
fn default_display_name() -> String {
    "Svcctl Worker".to_string()
}

fn default_start_timeout_ms() -> u64 {
    30_000
}
fn default_stop_timeout_ms() -> u64 {
    3_000
}
fn default_stop_retry_timeout_ms() -> u64 {
    2_000
}
fn default_restart_delay_ms() -> u64 {
    100
}
fn default_exit_grace_ms() -> u64 {
    10_000
}
fn default_force_exit() -> bool {
    true
}

fn default_language() -> String {
    "en".to_string()
}
