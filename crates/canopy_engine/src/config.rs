//! Configuration parameters and the execution settings derived from them.
//!
//! [`ConfigurationParameters`] is a flat string map. It can be built in code,
//! read from dotenv-style `key=value` files with `dotenvy` and overridden from
//! the process environment, where `CANOPY_EXECUTION_PARALLEL_ENABLED` maps to
//! `canopy.execution.parallel.enabled`.
//!
//! # Example
//!
//! ```
//! use canopy_engine::config::{ConfigurationParameters, ExecutionConfiguration};
//!
//! let params = ConfigurationParameters::from_properties(
//!     "# run everything concurrently\n\
//!      canopy.execution.parallel.enabled=true\n\
//!      canopy.execution.parallel.mode.default=concurrent\n\
//!      canopy.execution.parallel.config.strategy=fixed\n\
//!      canopy.execution.parallel.config.fixed.parallelism=3\n",
//! )?;
//! let config = ExecutionConfiguration::from_parameters(&params)?;
//! assert!(config.parallel_enabled);
//! assert_eq!(config.parallelism(), 3);
//! # Ok::<(), canopy_engine::config::ConfigError>(())
//! ```

use core::fmt;
use core::str::FromStr;
use std::io;
use std::path::Path;

use hashbrown::HashMap;

use crate::node::ExecutionMode;

/// Enables the worker pool.
pub const PARALLEL_ENABLED: &str = "canopy.execution.parallel.enabled";
/// Mode of nodes that declare none.
pub const DEFAULT_EXECUTION_MODE: &str = "canopy.execution.parallel.mode.default";
/// How the pool size is chosen: `dynamic` or `fixed`.
pub const PARALLEL_STRATEGY: &str = "canopy.execution.parallel.config.strategy";
/// Multiplier applied to the available cores by the dynamic strategy.
pub const DYNAMIC_FACTOR: &str = "canopy.execution.parallel.config.dynamic.factor";
/// Pool size used by the fixed strategy.
pub const FIXED_PARALLELISM: &str = "canopy.execution.parallel.config.fixed.parallelism";

const ENV_PREFIX: &str = "CANOPY_";

/// Errors raised while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A key holds a value that cannot be used.
    #[error("invalid value '{value}' for '{key}': expected {expected}")]
    InvalidValue {
        /// The key.
        key: String,
        /// The offending value.
        value: String,
        /// What would have been accepted.
        expected: &'static str,
    },

    /// A required key is absent.
    #[error("missing required configuration parameter '{key}'")]
    Missing {
        /// The key.
        key: String,
    },

    /// A configuration file could not be read or parsed.
    #[error("cannot load configuration from {origin}: {message}")]
    Unreadable {
        /// Path of the file, or `<text>` for in-memory input.
        origin: String,
        /// What went wrong.
        message: String,
    },
}

/// Flat string key/value configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationParameters {
    values: HashMap<String, String>,
}

impl ConfigurationParameters {
    /// Creates an empty set of parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses dotenv-style `key=value` lines.
    ///
    /// Blank lines and `#` comments are ignored and values may be quoted.
    /// Later lines override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unreadable`] for a malformed line.
    pub fn from_properties(text: &str) -> Result<Self, ConfigError> {
        Self::from_reader("<text>", text.as_bytes())
    }

    /// Reads a dotenv-style file.
    ///
    /// The file is only parsed; the process environment is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unreadable`] if the file cannot be opened or
    /// holds a malformed line.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let pairs = dotenvy::from_path_iter(path).map_err(|e| unreadable(&origin, &e))?;
        let params = Self::from_pairs(&origin, pairs)?;
        tracing::debug!(path = %origin, keys = params.len(), "configuration file loaded");
        Ok(params)
    }

    /// Reads dotenv-style lines from `reader`, naming it `origin` in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unreadable`] if reading fails or a line is
    /// malformed.
    pub fn from_reader(origin: &str, reader: impl io::Read) -> Result<Self, ConfigError> {
        Self::from_pairs(origin, dotenvy::from_read_iter(reader))
    }

    fn from_pairs(
        origin: &str,
        pairs: impl IntoIterator<Item = dotenvy::Result<(String, String)>>,
    ) -> Result<Self, ConfigError> {
        let mut params = Self::new();
        for pair in pairs {
            let (key, value) = pair.map_err(|e| unreadable(origin, &e))?;
            params.set(key, value);
        }
        Ok(params)
    }

    /// Applies overrides from `CANOPY_*` environment variables.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(std::env::vars())
    }

    /// Applies overrides from `CANOPY_*` variables in `vars`.
    #[must_use]
    pub fn with_overrides_from(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        for (name, value) in vars {
            if let Some(key) = env_key(&name) {
                tracing::trace!(%key, "configuration overridden from environment");
                self.set(key, value);
            }
        }
        self
    }

    /// Sets `key` to `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Returns the raw value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Reads `key` as a boolean (`true`/`false`, case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for any other value.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get(key)
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(invalid(key, value, "true or false")),
            })
            .transpose()
    }

    /// Reads `key` with [`FromStr`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if parsing fails.
    pub fn get_parsed<T: FromStr>(
        &self,
        key: &str,
        expected: &'static str,
    ) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|value| value.parse().map_err(|_| invalid(key, value, expected)))
            .transpose()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no key is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn unreadable(origin: &str, error: &dotenvy::Error) -> ConfigError {
    ConfigError::Unreadable {
        origin: origin.to_owned(),
        message: error.to_string(),
    }
}

fn invalid(key: &str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
        expected,
    }
}

/// `CANOPY_EXECUTION_PARALLEL_ENABLED` → `canopy.execution.parallel.enabled`.
fn env_key(name: &str) -> Option<String> {
    let rest = name.strip_prefix(ENV_PREFIX)?;
    if rest.is_empty() {
        return None;
    }
    Some(format!("canopy.{}", rest.to_ascii_lowercase().replace('_', ".")))
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" => Ok(ExecutionMode::Concurrent),
            "same_thread" => Ok(ExecutionMode::SameThread),
            _ => Err(invalid(DEFAULT_EXECUTION_MODE, s, "same_thread or concurrent")),
        }
    }
}

/// How many worker threads the pool gets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParallelismStrategy {
    /// `max(1, floor(available cores * factor))`.
    Dynamic {
        /// Multiplier applied to the number of available cores.
        factor: f64,
    },
    /// A fixed number of workers.
    Fixed {
        /// Number of workers.
        parallelism: usize,
    },
}

impl ParallelismStrategy {
    /// Returns the number of workers for this machine.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        match *self {
            ParallelismStrategy::Dynamic { factor } => {
                let cores = std::thread::available_parallelism().map_or(1, usize::from);
                dynamic_parallelism(cores, factor)
            }
            ParallelismStrategy::Fixed { parallelism } => parallelism.max(1),
        }
    }
}

impl Default for ParallelismStrategy {
    fn default() -> Self {
        ParallelismStrategy::Dynamic { factor: 1.0 }
    }
}

impl fmt::Display for ParallelismStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParallelismStrategy::Dynamic { factor } => write!(f, "dynamic(factor={factor})"),
            ParallelismStrategy::Fixed { parallelism } => write!(f, "fixed({parallelism})"),
        }
    }
}

fn dynamic_parallelism(cores: usize, factor: f64) -> usize {
    ((cores as f64 * factor).floor() as usize).max(1)
}

/// Execution settings read from [`ConfigurationParameters`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfiguration {
    /// Whether the worker pool is used.
    pub parallel_enabled: bool,
    /// Mode of nodes that declare none.
    pub default_execution_mode: ExecutionMode,
    /// Pool sizing.
    pub strategy: ParallelismStrategy,
}

impl Default for ExecutionConfiguration {
    fn default() -> Self {
        Self {
            parallel_enabled: false,
            default_execution_mode: ExecutionMode::SameThread,
            strategy: ParallelismStrategy::default(),
        }
    }
}

impl ExecutionConfiguration {
    /// Reads the settings, falling back to defaults for absent keys.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for malformed values, and for the fixed
    /// strategy without a parallelism.
    pub fn from_parameters(params: &ConfigurationParameters) -> Result<Self, ConfigError> {
        let parallel_enabled = params.get_bool(PARALLEL_ENABLED)?.unwrap_or(false);
        let default_execution_mode = params
            .get(DEFAULT_EXECUTION_MODE)
            .map(str::parse::<ExecutionMode>)
            .transpose()?
            .unwrap_or(ExecutionMode::SameThread);

        let strategy = match params.get(PARALLEL_STRATEGY).map(str::to_ascii_lowercase).as_deref() {
            None | Some("dynamic") => {
                let factor: f64 = params
                    .get_parsed(DYNAMIC_FACTOR, "a positive decimal")?
                    .unwrap_or(1.0);
                if !(factor.is_finite() && factor > 0.0) {
                    return Err(invalid(
                        DYNAMIC_FACTOR,
                        params.get(DYNAMIC_FACTOR).unwrap_or_default(),
                        "a positive decimal",
                    ));
                }
                ParallelismStrategy::Dynamic { factor }
            }
            Some("fixed") => {
                let parallelism: usize = params
                    .get_parsed(FIXED_PARALLELISM, "a positive integer")?
                    .ok_or_else(|| ConfigError::Missing {
                        key: FIXED_PARALLELISM.to_owned(),
                    })?;
                if parallelism == 0 {
                    return Err(invalid(FIXED_PARALLELISM, "0", "a positive integer"));
                }
                ParallelismStrategy::Fixed { parallelism }
            }
            Some(other) => return Err(invalid(PARALLEL_STRATEGY, other, "dynamic or fixed")),
        };

        Ok(Self {
            parallel_enabled,
            default_execution_mode,
            strategy,
        })
    }

    /// Returns the number of workers to start when parallel execution is on.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.strategy.parallelism()
    }
}
