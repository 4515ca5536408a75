//! Tracing configuration.
//!
//! [`TracingConfig`] is the plain value read once from the environment.
//! [`TracingSettings`] is the shared, live view handed to instrumentation;
//! its verbosity and snapshot cap are atomics so a change made at runtime is
//! seen by the very next step invocation.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How much per-step state is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Timing, errors and input/output state snapshots.
    Debug,
    /// Timing and errors only.
    #[default]
    Info,
    /// Timing and errors only.
    Error,
}

impl Verbosity {
    /// True when state snapshots should be captured.
    pub fn captures_state(self) -> bool {
        matches!(self, Verbosity::Debug)
    }

    fn as_u8(self) -> u8 {
        match self {
            Verbosity::Debug => 0,
            Verbosity::Info => 1,
            Verbosity::Error => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Verbosity::Debug,
            2 => Verbosity::Error,
            _ => Verbosity::Info,
        }
    }
}

impl FromStr for Verbosity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Verbosity::Debug),
            "info" => Ok(Verbosity::Info),
            "error" => Ok(Verbosity::Error),
            _ => Err(CoreError::InvalidVerbosity {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verbosity::Debug => "debug",
            Verbosity::Info => "info",
            Verbosity::Error => "error",
        };
        f.write_str(s)
    }
}

pub const DEFAULT_PROJECT: &str = "flowtrace";
pub const DEFAULT_ENDPOINT: &str = "https://api.smith.langchain.com";
pub const DEFAULT_UI_URL: &str = "https://smith.langchain.com";

/// Tracing configuration as read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    pub verbosity: Verbosity,
    /// Backend project the sessions and runs are filed under.
    pub project: String,
    /// Master switch for the external backend connection.
    pub enabled: bool,
    /// Backend credential. `None` means "no credentials configured".
    pub api_key: Option<String>,
    pub endpoint: String,
    pub ui_url: String,
    /// Per-string byte cap for state snapshots; 0 means unbounded.
    pub max_snapshot_bytes: usize,
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            verbosity: Verbosity::Info,
            project: DEFAULT_PROJECT.to_string(),
            enabled: true,
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            ui_url: DEFAULT_UI_URL.to_string(),
            max_snapshot_bytes: 0,
        }
    }
}

impl TracingConfig {
    /// Reads configuration from `FLOWTRACE_*` environment variables.
    ///
    /// Never fails: malformed values are logged and replaced by defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = TracingConfig::default();

        let verbosity = match lookup("FLOWTRACE_LOG_LEVEL") {
            Some(raw) => raw.parse::<Verbosity>().unwrap_or_else(|err| {
                tracing::warn!("{}; falling back to info", err);
                Verbosity::Info
            }),
            None => defaults.verbosity,
        };

        let enabled = match lookup("FLOWTRACE_TRACING_ENABLED") {
            Some(raw) => parse_bool("FLOWTRACE_TRACING_ENABLED", &raw).unwrap_or_else(|err| {
                tracing::warn!("{}; tracing stays enabled", err);
                true
            }),
            None => defaults.enabled,
        };

        let max_snapshot_bytes = match lookup("FLOWTRACE_MAX_SNAPSHOT_BYTES") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(
                    "invalid FLOWTRACE_MAX_SNAPSHOT_BYTES '{}'; snapshots stay unbounded",
                    raw
                );
                0
            }),
            None => defaults.max_snapshot_bytes,
        };

        TracingConfig {
            verbosity,
            project: lookup("FLOWTRACE_PROJECT").unwrap_or(defaults.project),
            enabled,
            api_key: lookup("FLOWTRACE_API_KEY").filter(|key| !key.trim().is_empty()),
            endpoint: lookup("FLOWTRACE_ENDPOINT").unwrap_or(defaults.endpoint),
            ui_url: lookup("FLOWTRACE_UI_URL").unwrap_or(defaults.ui_url),
            max_snapshot_bytes,
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, CoreError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::InvalidSetting {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Live settings shared by every instrumented step.
#[derive(Debug)]
pub struct TracingSettings {
    verbosity: AtomicU8,
    max_snapshot_bytes: AtomicUsize,
}

impl TracingSettings {
    pub fn new(verbosity: Verbosity) -> Self {
        TracingSettings {
            verbosity: AtomicU8::new(verbosity.as_u8()),
            max_snapshot_bytes: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &TracingConfig) -> Self {
        let settings = Self::new(config.verbosity);
        settings.set_max_snapshot_bytes(config.max_snapshot_bytes);
        settings
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_u8(self.verbosity.load(Ordering::Relaxed))
    }

    pub fn set_verbosity(&self, verbosity: Verbosity) {
        self.verbosity.store(verbosity.as_u8(), Ordering::Relaxed);
    }

    pub fn max_snapshot_bytes(&self) -> usize {
        self.max_snapshot_bytes.load(Ordering::Relaxed)
    }

    pub fn set_max_snapshot_bytes(&self, cap: usize) {
        self.max_snapshot_bytes.store(cap, Ordering::Relaxed);
    }
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self::new(Verbosity::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn verbosity_parses_case_insensitively() {
        assert_eq!("DEBUG".parse::<Verbosity>().unwrap(), Verbosity::Debug);
        assert_eq!(" info ".parse::<Verbosity>().unwrap(), Verbosity::Info);
        assert_eq!("Error".parse::<Verbosity>().unwrap(), Verbosity::Error);
        assert!(matches!(
            "trace".parse::<Verbosity>(),
            Err(CoreError::InvalidVerbosity { .. })
        ));
    }

    #[test]
    fn only_debug_captures_state() {
        assert!(Verbosity::Debug.captures_state());
        assert!(!Verbosity::Info.captures_state());
        assert!(!Verbosity::Error.captures_state());
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = TracingConfig::from_lookup(|_| None);
        assert_eq!(config, TracingConfig::default());
        assert!(config.api_key.is_none());
        assert!(config.enabled);
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = TracingConfig::from_lookup(lookup_from(&[
            ("FLOWTRACE_LOG_LEVEL", "debug"),
            ("FLOWTRACE_PROJECT", "summaries"),
            ("FLOWTRACE_TRACING_ENABLED", "off"),
            ("FLOWTRACE_API_KEY", "secret"),
            ("FLOWTRACE_MAX_SNAPSHOT_BYTES", "2048"),
        ]));
        assert_eq!(config.verbosity, Verbosity::Debug);
        assert_eq!(config.project, "summaries");
        assert!(!config.enabled);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.max_snapshot_bytes, 2048);
    }

    #[test]
    fn malformed_values_fall_back() {
        let config = TracingConfig::from_lookup(lookup_from(&[
            ("FLOWTRACE_LOG_LEVEL", "loud"),
            ("FLOWTRACE_TRACING_ENABLED", "maybe"),
            ("FLOWTRACE_API_KEY", "   "),
            ("FLOWTRACE_MAX_SNAPSHOT_BYTES", "lots"),
        ]));
        assert_eq!(config.verbosity, Verbosity::Info);
        assert!(config.enabled);
        assert!(config.api_key.is_none());
        assert_eq!(config.max_snapshot_bytes, 0);
    }

    #[test]
    fn settings_reflect_runtime_changes() {
        let settings = TracingSettings::new(Verbosity::Info);
        assert_eq!(settings.verbosity(), Verbosity::Info);
        settings.set_verbosity(Verbosity::Debug);
        assert_eq!(settings.verbosity(), Verbosity::Debug);
        settings.set_max_snapshot_bytes(64);
        assert_eq!(settings.max_snapshot_bytes(), 64);
    }
}
