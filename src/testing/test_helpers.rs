//! Shared helpers for tests that run against a live PostgreSQL server
//!
//! Live tests are `#[ignore]`d by default and read their server from the
//! `PG_RELAY_TEST_*` environment variables.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::connect::ConnectionProfile;

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique test identifier for parallel test execution
pub fn generate_test_id() -> u64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    timestamp.wrapping_add(counter)
}

/// Test configuration for the source and target databases
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub source_database: String,
    pub target_database: String,
    /// Schema created for this test in both databases.
    pub schema: String,
}

impl TestConfig {
    /// Defaults point at the DevContainer's `postgresql` service.
    pub fn new(test_id: u64) -> Self {
        let var = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };
        TestConfig {
            host: var("PG_RELAY_TEST_HOST", "postgresql"),
            port: var("PG_RELAY_TEST_PORT", "5432").parse().unwrap_or(5432),
            user: var("PG_RELAY_TEST_USER", "postgres"),
            password: var("PG_RELAY_TEST_PASSWORD", "postgres"),
            source_database: var("PG_RELAY_TEST_SOURCE_DB", "relay_source"),
            target_database: var("PG_RELAY_TEST_TARGET_DB", "relay_target"),
            schema: format!("relay_test_{test_id}"),
        }
    }

    pub fn source_profile(&self) -> ConnectionProfile {
        self.profile("source", &self.source_database)
    }

    pub fn target_profile(&self) -> ConnectionProfile {
        self.profile("target", &self.target_database)
    }

    fn profile(&self, name: &str, database: &str) -> ConnectionProfile {
        ConnectionProfile {
            name: name.to_string(),
            host: self.host.clone(),
            port: self.port,
            database: database.to_string(),
            user: self.user.clone(),
            password: Some(self.password.clone()),
            ssl: false,
            connect_timeout: None,
        }
    }
}
