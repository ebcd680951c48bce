//! Tracing subscriber setup.
//!
//! [`TracingSetup`] installs a `tracing_subscriber` registry with an
//! [`EnvFilter`] and one fmt layer. It is configured with builder methods or
//! read from [`ConfigurationParameters`].
//!
//! # Example
//!
//! ```
//! use canopy_core::{TracingFormat, TracingSetup};
//! use tracing::Level;
//!
//! // Development: pretty output with debug level and span events
//! TracingSetup::new()
//!     .with_level(Level::DEBUG)
//!     .with_format(TracingFormat::Pretty)
//!     .with_span_events(true)
//!     .init();
//!
//! // Production: JSON output, engine internals at info
//! let prod = TracingSetup::new()
//!     .with_format(TracingFormat::Json)
//!     .with_env_filter("canopy_engine=info,warn");
//! # let _ = prod;
//! ```

use core::fmt;
use core::str::FromStr;

use canopy_engine::config::{ConfigError, ConfigurationParameters};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Maximum log level (`trace`, `debug`, `info`, `warn`, `error`).
pub const LOG_LEVEL: &str = "canopy.log.level";
/// Output format (`pretty`, `compact`, `json`).
pub const LOG_FORMAT: &str = "canopy.log.format";
/// `EnvFilter` directive, overriding the level.
pub const LOG_FILTER: &str = "canopy.log.filter";

// ─────────────────────────────────────────────────────────────────────────────
// TracingFormat
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable colored output (default).
    #[default]
    Pretty,
    /// Compact single-line output.
    Compact,
    /// JSON structured output for log aggregation.
    Json,
}

impl FromStr for TracingFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(TracingFormat::Pretty),
            "compact" => Ok(TracingFormat::Compact),
            "json" => Ok(TracingFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                key: LOG_FORMAT.to_owned(),
                value: value.to_owned(),
                expected: "pretty, compact or json",
            }),
        }
    }
}

impl fmt::Display for TracingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingFormat::Pretty => write!(f, "pretty"),
            TracingFormat::Compact => write!(f, "compact"),
            TracingFormat::Json => write!(f, "json"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TracingSetup
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for the process-wide tracing subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingSetup {
    /// Maximum log level.
    level: Level,
    /// Output format.
    format: TracingFormat,
    /// Environment filter (e.g., "canopy_engine=debug,warn").
    env_filter: Option<String>,
    /// Whether to include span events (enter/exit).
    span_events: bool,
}

impl Default for TracingSetup {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingFormat::Pretty,
            env_filter: None,
            span_events: false,
        }
    }
}

impl TracingSetup {
    /// Creates a setup with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads [`LOG_LEVEL`], [`LOG_FORMAT`] and [`LOG_FILTER`], keeping the
    /// defaults for absent keys.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unknown level or format.
    pub fn from_parameters(params: &ConfigurationParameters) -> Result<Self, ConfigError> {
        let mut setup = Self::default();
        let level = params.get_parsed::<Level>(LOG_LEVEL, "trace, debug, info, warn or error")?;
        if let Some(level) = level {
            setup.level = level;
        }
        if let Some(format) = params.get(LOG_FORMAT) {
            setup.format = format.parse()?;
        }
        if let Some(filter) = params.get(LOG_FILTER) {
            setup.env_filter = Some(filter.to_owned());
        }
        Ok(setup)
    }

    /// Sets the maximum log level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets a custom environment filter string.
    ///
    /// Format: `target=level,target=level,...`
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Enables span enter/exit events in output.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Returns the configured level.
    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    /// Returns the configured format.
    #[must_use]
    pub fn format(&self) -> TracingFormat {
        self.format
    }

    fn filter(&self) -> EnvFilter {
        match &self.env_filter {
            Some(filter) => {
                EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
            }
            None => EnvFilter::new(self.level.as_str()),
        }
    }

    /// Installs the subscriber.
    ///
    /// Does nothing if a global subscriber is already installed.
    pub fn init(&self) {
        let span_events = if self.span_events {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        };

        // try_init fails when a subscriber is already installed
        let registry = tracing_subscriber::registry().with(self.filter());
        let installed = match self.format {
            TracingFormat::Pretty => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_span_events(span_events),
                )
                .try_init()
                .is_ok(),
            TracingFormat::Compact => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_span_events(span_events),
                )
                .try_init()
                .is_ok(),
            TracingFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_span_events(span_events),
                )
                .try_init()
                .is_ok(),
        };

        if installed {
            tracing::info!(level = %self.level, format = %self.format, "tracing initialized");
        }
    }
}
