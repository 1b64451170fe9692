//! Update scheduling primitives: per-key debounce timers and the dirty set kept
//! across full rebuilds.

mod debounce;
mod dirty;

pub use debounce::DebounceTimers;
pub use dirty::DirtyTracker;
