//! Configuration data model

use std::path::PathBuf;

/// Default cap on an inbound IPC payload (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Root configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub bar: BarSettings,
}

/// Global settings
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// When a modifier-forced bar is allowed to drop the other visibility triggers
///
/// With `Press`, pressing and releasing the bar modifier without doing
/// anything else in between also clears the mode and urgency triggers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModifierReset {
    #[default]
    Press,
    Release,
}

impl std::str::FromStr for ModifierReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "press" => Ok(Self::Press),
            "release" => Ok(Self::Release),
            _ => Err(format!(
                "Unknown modifier-reset value: {} (expected \"press\" or \"release\")",
                s
            )),
        }
    }
}

/// Settings for the single bar driven by one bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarSettings {
    /// Bar identifier; `None` means "use the first bar the compositor reports"
    pub id: Option<String>,
    /// Explicit IPC socket path, overriding `$SWAYSOCK` / `$I3SOCK`
    pub socket: Option<PathBuf>,
    pub modifier_reset: ModifierReset,
    /// Modifier (e.g. "Mod4") whose bare press toggles the bar
    pub toggle_modifier: Option<String>,
    /// Largest inbound payload accepted before the connection is dropped
    pub max_frame_size: u32,
}

impl Default for BarSettings {
    fn default() -> Self {
        Self {
            id: None,
            socket: None,
            modifier_reset: ModifierReset::default(),
            toggle_modifier: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl BarSettings {
    /// Whether the bridge needs the compositor's binding events
    pub fn wants_binding_events(&self) -> bool {
        self.modifier_reset == ModifierReset::Press || self.toggle_modifier.is_some()
    }
}
