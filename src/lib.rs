//! Trace-driven model of a single-level set-associative cache with true LRU replacement.
//!
//! The model only classifies references as hits or misses; no data is stored.
//! Hierarchies are built by chaining [`Cache`] instances, each with its own
//! lines, statistics and logical clock.

pub mod cache;
pub mod config;
pub mod trace;

pub use cache::{
    AccessResult, AccessType, Cache, ConfigError, Geometry, Line, Snapshot, Statistics,
};
pub use config::{Config, ConfigLoadError};
pub use trace::{Trace, TraceEntry, TraceError};
