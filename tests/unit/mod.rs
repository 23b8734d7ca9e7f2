//! Unit tests for steadfast modules
//!
//! These tests drive the public API against in-memory or temp-dir SQLite
//! databases.

mod test_checkpoint;
mod test_config;
mod test_recovery;
mod test_store;
