// spf-common/src/lib.rs
pub mod cache;
pub mod config;
pub mod error;
pub mod hashes;
pub mod locator;

// Re-export key types
pub use cache::PermissionSafeCache;
pub use config::Config;
pub use error::{CopyFailure, Result, SpfError};
pub use hashes::{HashAlgorithm, HashMismatch, Hashes, MultiHasher};
pub use locator::Locator;
