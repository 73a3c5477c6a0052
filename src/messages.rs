use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Chinese,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Chinese => "zh",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "en-us" | "english" => Ok(Language::English),
            "zh" | "zh-cn" | "chinese" => Ok(Language::Chinese),
            other => Err(format!("unsupported language '{}'", other)),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// User-facing status lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    ServiceStarting,
    ServiceRunning,
    ServiceStopped,
    ServiceFailed,
    ShutdownRequested,
    StopForced,
    ConfigValid,
    ConfigInvalid,
    ExitCode,
}

impl MessageKey {
    pub const ALL: [MessageKey; 9] = [
        MessageKey::ServiceStarting,
        MessageKey::ServiceRunning,
        MessageKey::ServiceStopped,
        MessageKey::ServiceFailed,
        MessageKey::ShutdownRequested,
        MessageKey::StopForced,
        MessageKey::ConfigValid,
        MessageKey::ConfigInvalid,
        MessageKey::ExitCode,
    ];
}

/// Message catalog for one language
#[derive(Debug, Clone, Copy, Default)]
pub struct Messages {
    language: Language,
}

impl Messages {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    /// Catalog for a language code, falling back to English
    pub fn for_language(code: &str) -> Self {
        Self::new(code.parse().unwrap_or_default())
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn get(&self, key: MessageKey) -> &'static str {
        match self.language {
            Language::English => english(key),
            Language::Chinese => chinese(key),
        }
    }

    /// Message followed by a detail, e.g. a service name or error
    pub fn format(&self, key: MessageKey, detail: impl fmt::Display) -> String {
        format!("{}: {}", self.get(key), detail)
    }
}

fn english(key: MessageKey) -> &'static str {
    match key {
        MessageKey::ServiceStarting => "Starting service",
        MessageKey::ServiceRunning => "Service is running",
        MessageKey::ServiceStopped => "Service stopped",
        MessageKey::ServiceFailed => "Service failed",
        MessageKey::ShutdownRequested => "Shutdown requested",
        MessageKey::StopForced => "Service did not stop in time and was forced",
        MessageKey::ConfigValid => "Configuration is valid",
        MessageKey::ConfigInvalid => "Configuration validation failed",
        MessageKey::ExitCode => "Exit code",
    }
}

fn chinese(key: MessageKey) -> &'static str {
    match key {
        MessageKey::ServiceStarting => "正在启动服务",
        MessageKey::ServiceRunning => "服务正在运行",
        MessageKey::ServiceStopped => "服务已停止",
        MessageKey::ServiceFailed => "服务运行失败",
        MessageKey::ShutdownRequested => "收到关闭请求",
        MessageKey::StopForced => "服务未能及时停止，已强制停止",
        MessageKey::ConfigValid => "配置有效",
        MessageKey::ConfigInvalid => "配置验证失败",
        MessageKey::ExitCode => "退出码",
    }
}
