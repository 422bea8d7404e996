//! Storage layer.
//!
//! Two independent stores sit behind traits so the workflows never see a
//! concrete client:
//! - **Vector**: one similarity index per scheme (Redis Stack, in-memory)
//! - **Identity**: participants, enrollment links and attendance (`SQLite`)
//!
//! There is no transaction spanning both. The enrollment workflow keeps them
//! consistent with a compensating delete; the reconciliation service finds
//! whatever slips through.

// Dropping a lock guard a few statements early has no measurable benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod sqlite;
pub mod traits;
pub mod vector;

pub use sqlite::SqliteIdentityStore;
pub use traits::{IdentityBackend, VectorBackend};
#[cfg(feature = "redis")]
pub use vector::RedisVectorBackend;
pub use vector::MemoryVectorBackend;

/// Returns the user's local data directory for fingerlink.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn get_user_data_dir() -> crate::Result<std::path::PathBuf> {
    directories::BaseDirs::new()
        .map(|b| b.data_local_dir().join("fingerlink"))
        .ok_or_else(|| {
            crate::Error::operation("get_user_data_dir", "could not determine user data directory")
        })
}
