//! Embedded bookkeeping store: schema-versioned collections of JSON
//! documents in a single SQLite file, opened through [`Store`].
//!
//! Every write runs in its own transaction and leaves derived balances
//! (account running totals, client file rollups, invoice totals)
//! consistent before it commits. Monetary amounts are integer cents;
//! timestamps are epoch milliseconds UTC.

pub mod db;
mod derived;
pub mod error;
mod id;
pub mod migrate;
pub mod model;
mod observer;
mod onboarding;
mod repo;
pub mod schema;
mod seed;
pub mod store;
mod time;

pub use derived::DashboardSummary;
pub use error::{rules, StoreError, StoreResult};
pub use migrate::MigrationSummary;
pub use observer::{WriteEvent, WriteObserver, WriteOp};
pub use schema::{Collection, SCHEMA_VERSION};
pub use seed::SeedReport;
pub use store::Store;

/// Install the process-wide tracing subscriber. Safe to call more than
/// once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("TALLYBOOK_LOG").unwrap_or_else(|_| "tallybook=info,sqlx=warn".into()),
        )
        .with_target(true)
        .try_init();
}
