//! Engine configuration
//!
//! Configuration is layered: defaults, then an optional YAML/JSON file, then
//! `NODEFLOW_*` environment variables.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `NODEFLOW_EVENT_CAPACITY` | `event_capacity` |
//! | `NODEFLOW_FOCUS_ON_PAUSE` | `focus_on_pause` |
//! | `NODEFLOW_CLEAR_BREAKPOINTS_ON_STOP` | `clear_breakpoints_on_stop` |
//! | `NODEFLOW_BREAKPOINT_SIZE` | `breakpoint_region.size` |
//! | `NODEFLOW_BREAKPOINT_MARGIN` | `breakpoint_region.margin` |
//! | `NODEFLOW_TITLE_HEIGHT` | `breakpoint_region.title_height` |
//!
//! # Example
//!
//! ```rust,no_run
//! use nodeflow_core::config::{ConfigBuilder, EngineConfig, ENV_PREFIX};
//!
//! let config = EngineConfig::from_env_with_defaults(ENV_PREFIX)?;
//! assert!(config.event_capacity > 0);
//! # Ok::<(), nodeflow_core::GraphError>(())
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

use crate::error::{GraphError, Result};
use crate::interaction::BreakpointRegion;

/// Prefix for all engine environment variables
pub const ENV_PREFIX: &str = "NODEFLOW_";

/// Configuration that can be validated and layered with environment overrides
///
/// `from_env` reports only the variables that are actually set, so applying
/// it over a file-loaded value changes exactly those fields, even when an
/// override equals the built-in default.
pub trait ConfigBuilder: Default + Clone {
    /// Partial configuration holding only explicitly set values
    type Overrides: Default;

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Read `{prefix}{FIELD}` environment variables
    fn from_env(prefix: &str) -> Result<Self::Overrides>;

    /// Overwrite every field present in `overrides`
    fn apply(&mut self, overrides: Self::Overrides) -> &mut Self;

    /// Create and validate the default configuration
    fn build() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides on top of `base` and validate
    fn layered(mut base: Self, prefix: &str) -> Result<Self> {
        base.apply(Self::from_env(prefix)?);
        base.validate()?;
        Ok(base)
    }

    /// Defaults overlaid with the environment, validated
    fn from_env_with_defaults(prefix: &str) -> Result<Self> {
        Self::layered(Self::default(), prefix)
    }
}

/// Build an environment key from a prefix and a field name
pub fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase())
}

/// Read an environment variable; `Ok(None)` when it is not set
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(GraphError::Configuration(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Read and parse an environment variable
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            GraphError::Configuration(format!(
                "Failed to parse environment variable '{}': {}",
                key, e
            ))
        }),
        None => Ok(None),
    }
}

/// Read a boolean environment variable (`true/false`, `1/0`, `yes/no`, `on/off`)
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    let Some(value) = get_env(key)? else {
        return Ok(None);
    };
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(GraphError::Configuration(format!(
            "Invalid boolean value for '{}': {}",
            key, value
        ))),
    }
}

/// Load a YAML or JSON file, picking the format from the extension
pub fn load_config_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            GraphError::Configuration(format!(
                "Unable to determine file extension for {:?}",
                path
            ))
        })?;

    let content = std::fs::read_to_string(path)?;
    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
        "json" => Ok(serde_json::from_str(&content)?),
        other => Err(GraphError::Configuration(format!(
            "Unsupported config format '{}' for {:?}",
            other, path
        ))),
    }
}

/// Engine options explicitly set in the environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    pub event_capacity: Option<usize>,
    pub focus_on_pause: Option<bool>,
    pub clear_breakpoints_on_stop: Option<bool>,
    pub breakpoint_size: Option<f32>,
    pub breakpoint_margin: Option<f32>,
    pub title_height: Option<f32>,
}

impl EnvOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Runtime options for graph sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Buffered events per subscriber before the slowest one lags
    pub event_capacity: usize,

    /// Publish a canvas focus request when a node halts
    pub focus_on_pause: bool,

    /// Disarm every breakpoint when the session stops
    pub clear_breakpoints_on_stop: bool,

    pub breakpoint_region: BreakpointRegion,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            focus_on_pause: true,
            clear_breakpoints_on_stop: true,
            breakpoint_region: BreakpointRegion::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_focus_on_pause(mut self, focus: bool) -> Self {
        self.focus_on_pause = focus;
        self
    }

    pub fn with_clear_breakpoints_on_stop(mut self, clear: bool) -> Self {
        self.clear_breakpoints_on_stop = clear;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Load from a file, then apply `NODEFLOW_*` overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    pub fn from_file_with_prefix(path: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let config: Self = load_config_file(path)?;
        Self::layered(config, prefix)
    }
}

impl ConfigBuilder for EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(GraphError::Configuration(
                "event_capacity must be non-zero".into(),
            ));
        }
        let region = &self.breakpoint_region;
        if region.size <= 0.0 || region.title_height <= 0.0 || region.margin < 0.0 {
            return Err(GraphError::Configuration(format!(
                "invalid breakpoint region {:?}",
                region
            )));
        }
        Ok(())
    }

    type Overrides = EnvOverrides;

    fn from_env(prefix: &str) -> Result<EnvOverrides> {
        let key = |name: &str| build_env_key(prefix, name);
        Ok(EnvOverrides {
            event_capacity: get_env_parse(&key("event_capacity"))?,
            focus_on_pause: get_env_bool(&key("focus_on_pause"))?,
            clear_breakpoints_on_stop: get_env_bool(&key("clear_breakpoints_on_stop"))?,
            breakpoint_size: get_env_parse(&key("breakpoint_size"))?,
            breakpoint_margin: get_env_parse(&key("breakpoint_margin"))?,
            title_height: get_env_parse(&key("title_height"))?,
        })
    }

    fn apply(&mut self, overrides: EnvOverrides) -> &mut Self {
        if overrides.is_empty() {
            return self;
        }
        tracing::debug!(?overrides, "Applying environment overrides");
        if let Some(capacity) = overrides.event_capacity {
            self.event_capacity = capacity;
        }
        if let Some(focus) = overrides.focus_on_pause {
            self.focus_on_pause = focus;
        }
        if let Some(clear) = overrides.clear_breakpoints_on_stop {
            self.clear_breakpoints_on_stop = clear;
        }
        if let Some(size) = overrides.breakpoint_size {
            self.breakpoint_region.size = size;
        }
        if let Some(margin) = overrides.breakpoint_margin {
            self.breakpoint_region.margin = margin;
        }
        if let Some(height) = overrides.title_height {
            self.breakpoint_region.title_height = height;
        }
        self
    }
}
