//! Argus - a configuration-watching runtime.
//!
//! A long-lived library that observes configuration files, detects
//! content changes by polling `stat`, parses the new content, and
//! delivers change notifications to the host application with a
//! tamper-evident audit trail. Built for hosts that must hot-reload
//! settings without a restart and prove, after the fact, what they
//! reloaded and when.
//!
//! # Features
//!
//! - **Poll-based detection** - os-stat polling with a bounded,
//!   TTL-admitted snapshot cache; deterministic across platforms, no OS
//!   event subscriptions.
//! - **BoreasLite dispatch ring** - a bounded MPSC ring of fixed-size
//!   events coordinated entirely with atomics; four run modes trade
//!   latency for throughput, switching automatically under `Auto`.
//! - **Tamper-evident audit** - every emission, delivery, and admin
//!   event is chained to the previous record's SHA-256 checksum;
//!   [`audit::verify_chain`] proves offline that nothing was altered.
//! - **Multi-format parsing** - JSON, YAML, TOML, HCL, INI, and
//!   properties out of the box, replaceable per format through the
//!   [`Parser`] registry.
//! - **Multi-source config** - defaults, overlaid by a config file,
//!   overlaid by `ARGUS_*` environment variables; the environment
//!   always wins.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use argus::{Config, Watcher};
//! use std::time::Duration;
//!
//! fn main() -> argus::Result<()> {
//!     let watcher = Watcher::new(Config::default())?;
//!
//!     watcher.watch("config/app.yaml", |change| {
//!         if let Some(config) = &change.config {
//!             println!("reloaded {} top-level keys", config.len());
//!         }
//!     })?;
//!
//!     watcher.start()?;
//!     // ... run the host application ...
//!     watcher.graceful_shutdown(Duration::from_secs(5))?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Lifecycle and validation errors surface synchronously. Runtime
//! failures (stat errors, parse errors, ring-full drops, callback
//! panics) are routed to the configured error handler and never crash
//! the process; the default handler logs them at `warn`.

pub mod audit;
pub mod boreas;
pub mod cache;
mod config;
mod env;
mod error;
mod format;
pub mod parser;
pub mod remote;
mod security;
pub mod validation;
mod watcher;

pub use audit::{AuditConfig, AuditEvent, AuditLevel, AuditLogger, AuditRecord, verify_chain};
pub use boreas::{BoreasLite, FileChangeEvent, RingStats, RunMode};
pub use cache::{CacheStats, StatCache, StatSnapshot};
pub use config::{Config, ErrorHandler, OptimizationStrategy};
pub use env::{parse_bool, parse_duration};
pub use error::{Error, Result};
pub use format::ConfigFormat;
pub use parser::{ConfigMap, Parser, ParserRegistry, register_parser};
pub use security::validate_watchable_path;
pub use validation::{ValidationIssue, ValidationReport, codes, validate, validate_detailed};
pub use watcher::{ChangeCallback, ChangeEvent, WatchOptions, Watcher};
