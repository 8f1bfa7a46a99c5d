// spf-aio/src/lib.rs
//! Filesystem side of spf: path/URL conventions, source tree copies, archive
//! extraction and file digest checks.

pub mod checksum;
pub mod copy;
pub mod extract;
pub mod fs;
pub mod path;

pub use checksum::{verify_file_hashes, verify_file_hashes_async};
pub use copy::copy_source_tree;
pub use extract::{extract_archive, ArchiveKind};
pub use path::{path_to_url, url_to_path, PathConvention};
