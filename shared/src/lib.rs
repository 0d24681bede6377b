//! Vaktr Shared Library
//!
//! This crate contains the building blocks of the Vaktr telemetry relay
//! agent: the telemetry models, counter sampling, event-log watching, sinks,
//! configuration, and the resource-swap primitive that lets the agent replace
//! live resources while it keeps running.
//!
//! # Modules
//!
//! - [`models`] - Telemetry records, retrieved log records, and health snapshots
//! - [`counters`] - Counter descriptors, counter sources, and samplers
//! - [`events`] - Event sources and the event watcher
//! - [`sink`] - The telemetry sink interface and its implementations
//! - [`config`] - Settings documents and the agent configuration
//! - [`swap`] - Atomic replacement of live resources with exactly-once disposal
//!
//! # Example
//!
//! ```
//! use shared::counters::{CounterSet, CounterSpec, MemoryCounterSource};
//!
//! let spec = CounterSpec::parse(r"Processor(_Total)\% Processor Time|CPU").unwrap();
//! let source = MemoryCounterSource::new().with_counter("Processor", "_Total", "% Processor Time", 12.0);
//!
//! let counters = CounterSet::open_all(&[spec], &source).unwrap();
//! let sampler = counters.iter().next().unwrap();
//!
//! assert_eq!(sampler.friendly_name(), "CPU");
//! assert_eq!(sampler.next_value().unwrap(), 12.0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod counters;
pub mod events;
pub mod models;
pub mod sink;
pub mod swap;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;
