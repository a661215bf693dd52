//! Parser abstraction for multi-format configuration content.
//!
//! The core never commits to a concrete parser: it consumes the
//! [`Parser`] capability. A [`ParserRegistry`] holds registered parsers
//! in priority order; the first one whose `supports` accepts the format
//! wins, and a built-in minimal fallback per format covers everything
//! else.
//!
//! # Custom Parsers
//!
//! Implement the [`Parser`] trait to plug in an alternative
//! implementation for any format:
//!
//! ```rust,ignore
//! use argus::{ConfigFormat, ConfigMap, Parser};
//!
//! struct FastJson;
//!
//! impl Parser for FastJson {
//!     fn parse(&self, bytes: &[u8]) -> argus::Result<ConfigMap> {
//!         // ...
//!     }
//!
//!     fn supports(&self, format: ConfigFormat) -> bool {
//!         format == ConfigFormat::Json
//!     }
//!
//!     fn name(&self) -> &str { "fast-json" }
//! }
//!
//! argus::parser::register_parser(std::sync::Arc::new(FastJson));
//! ```

mod builtin;

pub use builtin::fallback_parse;

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::Result;
use crate::format::ConfigFormat;

/// Parsed configuration: a nested mapping with scalar leaves.
///
/// Scalars are `String`, `i64`, `f64`, or `bool`; containers are
/// mappings and sequences. Numeric leaves carry their most precise
/// parsed form, so consumers must tolerate either integer or float for
/// numeric fields.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Capability contract for configuration parsers.
///
/// Implementations must be safe for concurrent use; `parse` may be
/// called from the ring consumer while `supports` is queried elsewhere.
pub trait Parser: Send + Sync {
    /// Parses raw bytes into a configuration mapping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`](crate::Error::Parse) when the bytes do
    /// not form a valid document of the parser's format.
    fn parse(&self, bytes: &[u8]) -> Result<ConfigMap>;

    /// Whether this parser handles the given format.
    fn supports(&self, format: ConfigFormat) -> bool;

    /// Parser name for error messages and audit records.
    fn name(&self) -> &str;
}

/// Priority-ordered collection of [`Parser`] capabilities.
///
/// Registration order is priority order: the first registered parser
/// that supports a format handles it. Read-mostly after startup.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn Parser>>,
}

impl ParserRegistry {
    /// Creates an empty registry. Unregistered formats fall back to the
    /// built-in parsers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parser at the lowest priority.
    pub fn register(&mut self, parser: Arc<dyn Parser>) {
        self.parsers.push(parser);
    }

    /// Number of registered parsers (excluding built-in fallbacks).
    #[must_use]
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// Returns `true` when no custom parser is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Parses `bytes` as `format` with the first supporting parser, or
    /// the built-in fallback when none is registered for the format.
    ///
    /// # Errors
    ///
    /// Propagates the selected parser's error.
    pub fn parse(&self, bytes: &[u8], format: ConfigFormat) -> Result<ConfigMap> {
        for parser in &self.parsers {
            if parser.supports(format) {
                return parser.parse(bytes);
            }
        }
        builtin::fallback_parse(bytes, format)
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field(
                "parsers",
                &self.parsers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process-wide registry
// ─────────────────────────────────────────────────────────────────────────────

fn global_slot() -> &'static RwLock<Arc<ParserRegistry>> {
    static GLOBAL: OnceLock<RwLock<Arc<ParserRegistry>>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(Arc::new(ParserRegistry::new())))
}

/// Snapshot of the process-wide registry.
///
/// In-flight parses keep using the snapshot they grabbed; mutations
/// clone, modify, and swap, so late registration is safe but only
/// affects subsequent parses.
#[must_use]
pub fn global() -> Arc<ParserRegistry> {
    global_slot().read().clone()
}

/// Registers a parser into the process-wide registry.
///
/// Expected at process init, before the watcher starts.
pub fn register_parser(parser: Arc<dyn Parser>) {
    let slot = global_slot();
    let mut guard = slot.write();
    let mut next = (**guard).clone();
    next.register(parser);
    *guard = Arc::new(next);
}

// ============================================================================
// Unit Tests
// ============================================================================
