// spf-core/src/lib.rs

pub mod materialize;

pub use materialize::{unpack_url, ArchiveMaterializer, Materialized};
