//! Watcher configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditConfig;
use crate::boreas::RunMode;
use crate::error::{Error, Result};
use crate::parser::Parser;
use crate::validation::{self, ValidationReport};

/// Sink for runtime errors raised by the poller, the ring consumer, or
/// the audit flusher.
///
/// Handlers must assume concurrent invocation from any of the worker
/// threads.
pub type ErrorHandler = Arc<dyn Fn(&Error, &Path) + Send + Sync>;

/// Hard floor on the poll interval.
pub(crate) const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Hard ceiling on the poll interval.
pub(crate) const MAX_POLL_INTERVAL: Duration = Duration::from_secs(600);
/// Soft ceiling before the watched-file count draws a warning.
pub(crate) const MAX_FILES_SOFT_LIMIT: usize = 10_000;
/// Bounds on an explicitly configured ring capacity.
pub(crate) const MIN_RING_CAPACITY: usize = 32;
pub(crate) const MAX_RING_CAPACITY: usize = 1 << 20;

/// How the dispatch ring trades latency for throughput.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OptimizationStrategy {
    /// Start balanced and adapt to the observed load every second.
    #[default]
    Auto,
    /// Lowest latency; events may be dropped under overload.
    SingleEvent,
    /// Balanced batching for a handful of files.
    SmallBatch,
    /// Throughput batching for large file sets.
    LargeBatch,
}

impl OptimizationStrategy {
    /// Parses the strategy names accepted in configuration sources.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(OptimizationStrategy::Auto),
            "single" | "singleevent" => Some(OptimizationStrategy::SingleEvent),
            "small" | "smallbatch" => Some(OptimizationStrategy::SmallBatch),
            "large" | "largebatch" => Some(OptimizationStrategy::LargeBatch),
            _ => None,
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            OptimizationStrategy::Auto => "auto",
            OptimizationStrategy::SingleEvent => "singleevent",
            OptimizationStrategy::SmallBatch => "smallbatch",
            OptimizationStrategy::LargeBatch => "largebatch",
        }
    }

    /// The run mode the consumer starts in. `Auto` starts balanced and
    /// re-evaluates from there.
    #[must_use]
    pub(crate) const fn initial_mode(self) -> RunMode {
        match self {
            OptimizationStrategy::Auto | OptimizationStrategy::SmallBatch => RunMode::SmallBatch,
            OptimizationStrategy::SingleEvent => RunMode::SingleEvent,
            OptimizationStrategy::LargeBatch => RunMode::LargeBatch,
        }
    }

    /// Ring capacity when none is pinned in the config.
    #[must_use]
    pub(crate) const fn default_capacity(self) -> usize {
        match self {
            OptimizationStrategy::Auto => 128,
            other => other.initial_mode().default_capacity(),
        }
    }

    /// Whether the consumer may switch modes at runtime.
    #[must_use]
    pub(crate) const fn is_adaptive(self) -> bool {
        matches!(self, OptimizationStrategy::Auto)
    }
}

/// Process-wide parameters of a watcher instance.
#[derive(Clone)]
pub struct Config {
    /// Time between polling ticks. Enforced to 10 ms..=10 min.
    pub poll_interval: Duration,
    /// Freshness window for cached stat snapshots; commonly half the
    /// poll interval. A TTL above the poll interval draws a warning.
    pub cache_ttl: Duration,
    /// Bound on watched files and on the stat cache.
    pub max_watched_files: usize,
    /// Dispatch ring policy.
    pub optimization_strategy: OptimizationStrategy,
    /// Explicit ring capacity; `0` derives it from the strategy.
    /// Non-zero values must be a power of two in 32..=1_048_576.
    pub boreas_capacity: usize,
    /// Audit trail settings.
    pub audit: AuditConfig,
    /// Runtime error sink; `None` installs a handler that logs at warn.
    pub error_handler: Option<ErrorHandler>,
    /// Single-parser override; `None` consults the parser registry.
    pub parser: Option<Arc<dyn Parser>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(2),
            max_watched_files: 100,
            optimization_strategy: OptimizationStrategy::Auto,
            boreas_capacity: 0,
            audit: AuditConfig::default(),
            error_handler: None,
            parser: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("poll_interval", &self.poll_interval)
            .field("cache_ttl", &self.cache_ttl)
            .field("max_watched_files", &self.max_watched_files)
            .field("optimization_strategy", &self.optimization_strategy)
            .field("boreas_capacity", &self.boreas_capacity)
            .field("audit", &self.audit)
            .field("error_handler", &self.error_handler.as_ref().map(|_| "custom"))
            .field("parser", &self.parser.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

impl Config {
    /// Validates the config, returning the first rule violation.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] carrying the violated rule code.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Full validation report with every error and warning.
    #[must_use]
    pub fn validate_detailed(&self) -> ValidationReport {
        validation::validate_detailed(self)
    }

    /// Defaults overlaid with `ARGUS_*` environment values.
    ///
    /// # Errors
    ///
    /// Invalid or out-of-range environment values fail with the specific
    /// rule code.
    pub fn load_from_env() -> Result<Self> {
        let mut config = Self::default();
        crate::env::overlay_env(&mut config)?;
        Ok(config)
    }

    /// Multi-source load: defaults, overlaid by `file_path` when it is
    /// non-empty, readable and parseable, overlaid by the environment.
    ///
    /// A missing or unparseable file is a warning-grade diagnostic, not
    /// an error; the environment always wins over the file.
    ///
    /// # Errors
    ///
    /// Security rejection of the path, or invalid environment values.
    pub fn load_multi_source(file_path: impl AsRef<Path>) -> Result<Self> {
        crate::env::load_multi_source(file_path.as_ref())
    }

    /// The ring capacity this config resolves to.
    #[must_use]
    pub fn effective_capacity(&self) -> usize {
        if self.boreas_capacity != 0 {
            self.boreas_capacity
        } else {
            self.optimization_strategy.default_capacity()
        }
    }

    /// The configured handler, or the default warn-logging handler.
    #[must_use]
    pub(crate) fn resolved_error_handler(&self) -> ErrorHandler {
        self.error_handler.clone().unwrap_or_else(default_error_handler)
    }
}

fn default_error_handler() -> ErrorHandler {
    Arc::new(|error: &Error, path: &Path| {
        tracing::warn!(
            path = %path.display(),
            code = error.code(),
            error = %error,
            "watch error"
        );
    })
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.cache_ttl, Duration::from_secs(2));
        assert_eq!(config.max_watched_files, 100);
        assert_eq!(config.optimization_strategy, OptimizationStrategy::Auto);
        assert_eq!(config.boreas_capacity, 0);
        assert!(!config.audit.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_strategy_parsing() {
        let cases = [
            ("auto", OptimizationStrategy::Auto),
            ("single", OptimizationStrategy::SingleEvent),
            ("singleevent", OptimizationStrategy::SingleEvent),
            ("small", OptimizationStrategy::SmallBatch),
            ("SmallBatch", OptimizationStrategy::SmallBatch),
            ("large", OptimizationStrategy::LargeBatch),
            ("largebatch", OptimizationStrategy::LargeBatch),
        ];
        for (name, expected) in cases {
            assert_eq!(OptimizationStrategy::parse(name), Some(expected), "{name}");
        }
        assert_eq!(OptimizationStrategy::parse("999"), None);
    }

    #[test]
    fn test_capacity_derivation() {
        let mut config = Config::default();
        assert_eq!(config.effective_capacity(), 128, "auto default");

        config.optimization_strategy = OptimizationStrategy::SingleEvent;
        assert_eq!(config.effective_capacity(), 64);

        config.optimization_strategy = OptimizationStrategy::LargeBatch;
        assert_eq!(config.effective_capacity(), 256);

        config.boreas_capacity = 1024;
        assert_eq!(config.effective_capacity(), 1024, "explicit capacity wins");
    }

    #[test]
    fn test_debug_skips_closures() {
        let config = Config {
            error_handler: Some(Arc::new(|_, _| {})),
            ..Config::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("custom"));
    }
}
