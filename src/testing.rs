//! Test infrastructure
//!
//! [`MemoryDatabase`] stands in for PostgreSQL in unit and integration
//! tests; the fixtures describe a small blog and the analytics tables.
//! Tests against a live server use [`TestConfig`] and the cleanup helpers.

pub mod fixtures;
pub mod memory;
pub mod postgresql_cleanup;
pub mod test_helpers;

pub use memory::{MemoryConnector, MemoryDatabase};
pub use test_helpers::{generate_test_id, TestConfig};
