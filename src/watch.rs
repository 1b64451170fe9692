//! Watch runtime: events and daemon.

mod events;
mod runtime;

pub use events::{ChangeEvent, KeyedChange, WatchConfig};
pub use runtime::WatchDaemon;
