//! `SQLite` identity store and its shared infrastructure.
//!
//! - [`connection`]: lock acquisition with poison recovery, pragma setup
//! - [`metrics`]: per-operation counters and latency histograms
//! - [`identity`]: the [`IdentityBackend`](crate::storage::traits::IdentityBackend)
//!   implementation

mod connection;
mod identity;
mod metrics;

pub use connection::{acquire_lock, configure_connection};
pub use identity::SqliteIdentityStore;
pub use metrics::record_operation_metrics;
