//! Embedsync
//!
//! Keeps a persistent, per-document embedding table (and a 2-D layout derived
//! from it) in sync with a corpus of documents that changes while the process
//! runs. Changes are debounced per document, recomputed by external jobs, and
//! merged into a keyed, atomically persisted table; full rebuilds replace the
//! whole table and re-queue whatever changed while they ran.

pub mod config;
pub mod coordinator;
pub mod corpus;
pub mod error;
pub mod job;
pub mod layout;
pub mod logging;
pub mod schedule;
pub mod store;
pub mod tooling;
pub mod types;
pub mod watch;
