//! Tracing configuration and initialization.
//!
//! Log records go to stderr so that reports printed on stdout stay
//! machine-readable. Each container pipeline runs inside a `container` span
//! carrying the container name and run id.

use std::io;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Configuration for tracing initialization.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Service name for identification
    pub service_name: String,
    /// Log level used when `RUST_LOG` is not set
    pub log_level: Level,
    /// Whether to log span close events with their timings
    pub include_span_events: bool,
    /// Whether to output in JSON format
    pub json_output: bool,
    /// Whether to include file and line numbers
    pub include_location: bool,
    /// Whether to include target (module path)
    pub include_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "converge".to_string(),
            log_level: Level::INFO,
            include_span_events: false,
            json_output: false,
            include_location: false,
            include_target: false,
        }
    }
}

impl TracingConfig {
    /// Create a new config with the given service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    /// Pick the level from a `-v` count: 0 = info, 1 = debug, more = trace.
    pub fn with_verbosity(self, verbose: u8) -> Self {
        let level = match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        self.with_level(level).with_location(verbose > 1)
    }

    /// Enable JSON output format.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json_output = json;
        self
    }

    pub fn with_location(mut self, include: bool) -> Self {
        self.include_location = include;
        self.include_target = include;
        self
    }

    /// Include span close events in output.
    pub fn with_span_events(mut self, include: bool) -> Self {
        self.include_span_events = include;
        self
    }

    /// Build an EnvFilter from this config. `RUST_LOG` wins when set.
    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.to_string()))
    }
}

/// Initialize tracing with the given configuration.
///
/// This should be called once at application startup. Returns `false` if a
/// global subscriber was already installed.
///
/// # Example
///
/// ```no_run
/// use observability::{init_tracing, TracingConfig};
///
/// init_tracing(TracingConfig::new("converge").with_verbosity(1));
/// ```
pub fn init_tracing(config: TracingConfig) -> bool {
    let filter = config.build_filter();

    let span_events = if config.include_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let installed = if config.json_output {
        // JSON format for log aggregation
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!(
            service = %config.service_name,
            level = %config.log_level,
            "Tracing initialized"
        );
    }
    installed
}
