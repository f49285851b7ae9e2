//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use courier_core::{
    ConfiguredEndpointResolver, ConventionEndpointResolver, ConventionOptions,
    DefaultEndpointProvider, Endpoint, EndpointResolver, InMemoryEndpointResolver,
    ProcessingOptions,
};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Dispatcher defaults.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Endpoint resolution settings.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Per-route processing overrides, keyed by route name.
    #[serde(default)]
    pub processing: HashMap<String, ProcessingOptions>,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase level name, as used in filter directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// The matching `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Span lifecycle events to log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    /// Level for the Courier crates, overriding `level` for dispatch logs.
    #[serde(default)]
    pub dispatch_level: Option<LogLevel>,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Per-module levels, e.g. `courier_transport = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, String>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file names and line numbers.
    #[serde(default)]
    pub file_location: bool,
}

// =============================================================================
// Dispatch
// =============================================================================

/// Default redelivery delays for failed messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Delay before a failed command is redelivered, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub failed_command_retry_delay_ms: u64,

    /// Delay before a failed event is redelivered, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub failed_event_retry_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            failed_command_retry_delay_ms: default_retry_delay_ms(),
            failed_event_retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retry_delay_ms() -> u64 {
    courier_framework::DEFAULT_FAILED_RETRY_DELAY_MS
}

// =============================================================================
// Routing
// =============================================================================

/// Default endpoint resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolverConfig {
    /// Destinations named after routes on the in-memory transport.
    #[default]
    InMemory,
    /// Named endpoints only.
    Configured,
    /// Broker naming conventions.
    Convention(ConventionOptions),
}

impl ResolverConfig {
    /// Builds the configured resolver.
    pub fn build(&self) -> Arc<dyn EndpointResolver> {
        match self {
            Self::InMemory => Arc::new(InMemoryEndpointResolver),
            Self::Configured => Arc::new(ConfiguredEndpointResolver),
            Self::Convention(options) => Arc::new(ConventionEndpointResolver::new(options.clone())),
        }
    }
}

/// Routing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Explicitly named endpoints.
    #[serde(default)]
    pub endpoints: HashMap<String, Endpoint>,

    /// Declare missing destinations during startup verification.
    #[serde(default)]
    pub create_missing_endpoints: bool,
}

impl RoutingConfig {
    /// Endpoint provider holding the named endpoints.
    pub fn endpoint_provider(&self) -> DefaultEndpointProvider {
        self.endpoints
            .iter()
            .map(|(name, endpoint)| (name.clone(), endpoint.clone()))
            .collect()
    }
}
