//! PostgreSQL backend
//!
//! Implements [`RelationalStore`](crate::RelationalStore) and
//! [`AnalyticsStore`](crate::AnalyticsStore) over a single
//! `tokio-postgres` session. Row values travel as JSON in both directions
//! (`to_jsonb` on the way out, `json_populate_record` on the way in), so
//! the server does all type conversion.

mod analytics;
mod client;
mod error;
mod introspect;

pub use client::PostgresDatabase;
