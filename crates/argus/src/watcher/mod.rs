//! Poll-based file watching with ring-buffered dispatch.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  stat + diff   ┌────────────┐  drain + parse  ┌─────────────┐
//! │  poller  │───────────────▶│ BoreasLite │────────────────▶│  consumer   │
//! │ (ticks)  │                │   (ring)   │                 │ (callbacks) │
//! └──────────┘                └────────────┘                 └─────────────┘
//!       │                                                          │
//!       └───────────────┐                          ┌───────────────┘
//!                       ▼                          ▼
//!                 ┌───────────┐             ┌─────────────┐
//!                 │ StatCache │             │ AuditLogger │
//!                 │  (TTL)    │             │   (chain)   │
//!                 └───────────┘             └─────────────┘
//! ```
//!
//! The poller is the sole `stat` caller and the sole ring producer per
//! path; the consumer is the sole reader and the sole invoker of
//! subscriber callbacks. Both honor one cancellation token wired at
//! [`Watcher::start`].

mod engine;
mod types;

// Public API
pub use engine::Watcher;
pub use types::{ChangeCallback, ChangeEvent, WatchOptions};
