//! Event-log watching.
//!
//! - [`source`] - the `EventSource` abstraction and an in-process source
//! - [`watcher`] - `EventWatcher`, which delivers qualifying records to a handler
//! - [`journal`] - a source fed by journald's JSON export

pub mod journal;
pub mod source;
pub mod watcher;

pub use journal::JournalEventSource;
pub use source::{
    ChannelEventSource, EventDelivery, EventLevel, EventQuery, EventRecordUnavailableError,
    EventSource, EventSourceError, EventStream, RawEvent,
};
pub use watcher::{EventWatcher, LogHandler};
