//! Error types for the watcher runtime.
//!
//! All failures surface through a single [`Error`] enum, which integrates
//! with [`miette`] for rich terminal diagnostics. Each variant carries a
//! diagnostic code under the `argus::` namespace and a stable string
//! identifier (see [`Error::code`]) that host applications can match on
//! without depending on variant shapes.

use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error as ThisError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the watcher, the audit pipeline, and configuration
/// loading.
///
/// Validation and lifecycle errors surface synchronously from the calls
/// that cause them. Errors during polling or dispatch are routed to the
/// configured error handler and never terminate the worker loops.
#[derive(Debug, ThisError, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    /// A path was rejected by security validation.
    ///
    /// The offending path is deliberately omitted from the message so a
    /// hostile path cannot inject content into logs.
    #[error("path rejected by security validation: {reason}")]
    #[diagnostic(
        code(argus::security),
        help("use an absolute path that stays inside your application's directories")
    )]
    Security {
        /// Why the path was rejected.
        reason: String,
    },

    /// A watched or configured file does not exist.
    #[error("file not found: {}", path.display())]
    #[diagnostic(
        code(argus::file_not_found),
        help("create the file first, or register with watch-for-creation")
    )]
    FileNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// A read, write, or stat operation failed.
    #[error("i/o error on '{}': {}", path.display(), source)]
    #[diagnostic(code(argus::io))]
    Io {
        /// The path the operation targeted.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A parser could not interpret file or remote content.
    #[error("{format} parse error: {message}")]
    #[diagnostic(
        code(argus::parse),
        help("check the file against its format's syntax rules")
    )]
    Parse {
        /// Format name as reported by the detector or parser.
        format: &'static str,
        /// Parser-supplied failure description.
        message: String,
    },

    /// A configuration validation rule was violated.
    #[error("invalid configuration [{code}]: {message}")]
    #[diagnostic(
        code(argus::invalid_config),
        help("see the rule code for the exact constraint that failed")
    )]
    InvalidConfig {
        /// The `ARGUS_`-prefixed rule code.
        code: &'static str,
        /// Human-readable description of the violation.
        message: String,
    },

    /// An event was dropped because the dispatch ring was full.
    #[error("event dropped, dispatch ring full: {}", path.display())]
    #[diagnostic(
        code(argus::ring_full),
        help("raise the ring capacity or switch to a batch optimization strategy")
    )]
    RingFull {
        /// Path of the dropped event.
        path: PathBuf,
    },

    /// `start` was called on a watcher that already started once.
    #[error("watcher already started")]
    #[diagnostic(code(argus::already_started))]
    AlreadyStarted,

    /// A lifecycle operation requires a running watcher.
    #[error("watcher is not running")]
    #[diagnostic(code(argus::not_running))]
    NotRunning,

    /// Graceful shutdown did not complete within its deadline.
    ///
    /// Events still queued in the ring at that point were dropped.
    #[error("graceful shutdown timed out after {timeout:?}")]
    #[diagnostic(
        code(argus::shutdown_timeout),
        help("a slow subscriber callback can hold up shutdown; raise the timeout or speed up the callback")
    )]
    ShutdownTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The audit configuration is unusable.
    #[error("invalid audit configuration: {message}")]
    #[diagnostic(
        code(argus::invalid_audit_config),
        help("audit requires a writable output file when enabled")
    )]
    InvalidAuditConfig {
        /// Description of the violation.
        message: String,
    },

    /// A remote provider scheme is already taken.
    #[error("remote provider scheme '{scheme}' already registered")]
    #[diagnostic(code(argus::already_registered))]
    AlreadyRegistered {
        /// The colliding URL scheme.
        scheme: String,
    },

    /// A subscriber callback panicked during delivery.
    ///
    /// The panic is recovered and the consumer keeps running; this error
    /// only reaches the error handler.
    #[error("subscriber callback panicked for '{}'", path.display())]
    #[diagnostic(code(argus::callback_panic))]
    CallbackPanic {
        /// Path whose delivery panicked.
        path: PathBuf,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Constructor helpers for ergonomic error creation
// ─────────────────────────────────────────────────────────────────────────────

impl Error {
    /// Creates a `Security` error.
    pub fn security(reason: impl Into<String>) -> Self {
        Error::Security {
            reason: reason.into(),
        }
    }

    /// Creates a `FileNotFound` error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Error::FileNotFound { path: path.into() }
    }

    /// Creates an `Io` error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a `Parse` error.
    pub fn parse(format: &'static str, message: impl Into<String>) -> Self {
        Error::Parse {
            format,
            message: message.into(),
        }
    }

    /// Creates an `InvalidConfig` error carrying a rule code.
    pub fn invalid_config(code: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            code,
            message: message.into(),
        }
    }

    /// Creates a `RingFull` error.
    pub fn ring_full(path: impl Into<PathBuf>) -> Self {
        Error::RingFull { path: path.into() }
    }

    /// Creates an `InvalidAuditConfig` error.
    pub fn invalid_audit_config(message: impl Into<String>) -> Self {
        Error::InvalidAuditConfig {
            message: message.into(),
        }
    }

    /// Creates an `AlreadyRegistered` error.
    pub fn already_registered(scheme: impl Into<String>) -> Self {
        Error::AlreadyRegistered {
            scheme: scheme.into(),
        }
    }

    /// Creates a `CallbackPanic` error.
    pub fn callback_panic(path: impl Into<PathBuf>) -> Self {
        Error::CallbackPanic { path: path.into() }
    }

    /// Stable string identifier for the error class.
    ///
    /// These identifiers do not change across releases and are safe to
    /// match on in host applications and log pipelines.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::Security { .. } => "SecurityError",
            Error::FileNotFound { .. } => "FileNotFound",
            Error::Io { .. } => "IOError",
            Error::Parse { .. } => "ParseError",
            Error::InvalidConfig { .. } => "InvalidConfig",
            Error::RingFull { .. } => "RingFull",
            Error::AlreadyStarted => "AlreadyStarted",
            Error::NotRunning => "NotRunning",
            Error::ShutdownTimeout { .. } => "ShutdownTimeout",
            Error::InvalidAuditConfig { .. } => "InvalidAuditConfig",
            Error::AlreadyRegistered { .. } => "AlreadyRegistered",
            Error::CallbackPanic { .. } => "CallbackPanic",
        }
    }

    /// Returns `true` for errors that only ever reach the error handler,
    /// never a `Result` position.
    #[must_use]
    pub fn is_dispatch_error(&self) -> bool {
        matches!(
            self,
            Error::RingFull { .. } | Error::CallbackPanic { .. } | Error::Parse { .. }
        )
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
