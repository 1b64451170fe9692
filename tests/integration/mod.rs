//! Integration tests for embedsync

mod coordinator_properties;
mod end_to_end;
mod support;
