//! Performance counters.
//!
//! This module turns textual counter descriptors into live samplers:
//!
//! - [`spec`] - descriptor parsing into `CounterSpec`
//! - [`source`] - the `CounterSource` abstraction and an in-memory source
//! - [`sampler`] - `CounterSampler` and the ordered `CounterSet`
//! - [`system`] - host processor and memory counters

pub mod sampler;
pub mod source;
pub mod spec;
pub mod system;

pub use sampler::{CounterSampler, CounterSet};
pub use source::{
    CounterError, CounterHandle, CounterSource, CounterUnavailableError, MemoryCounterSource,
};
pub use spec::{CounterSpec, MalformedSpecError};
pub use system::SystemCounterSource;
