// spf-aio/src/checksum.rs
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use spf_common::error::{Result, SpfError};
use spf_common::hashes::Hashes;
use tracing::debug;

/// Verifies a file against the accepted digests. An empty `hashes` accepts
/// anything.
pub fn verify_file_hashes(path: &Path, hashes: &Hashes) -> Result<()> {
    if hashes.is_empty() {
        return Ok(());
    }
    debug!("Sync Verifying hashes for: {}", path.display());
    let file = File::open(path)?;
    hashes.check_against_reader(BufReader::new(file))
}

/// Asynchronously verifies a file. Hashing runs on the blocking pool.
pub async fn verify_file_hashes_async(path: &Path, hashes: &Hashes) -> Result<()> {
    if hashes.is_empty() {
        return Ok(());
    }
    let path = path.to_path_buf();
    let hashes = hashes.clone();
    tokio::task::spawn_blocking(move || verify_file_hashes(&path, &hashes))
        .await
        .map_err(|e| SpfError::Generic(format!("JoinError in hash verification: {e}")))?
}

#[cfg(test)]
mod tests {
    use spf_common::hashes::HashAlgorithm;

    use super::*;

    // sha256 of b"hello"
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn matching_digest_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        let hashes: Hashes = [(HashAlgorithm::Sha256, HELLO_SHA256.to_uppercase())]
            .into_iter()
            .collect();
        verify_file_hashes(&path, &hashes).unwrap();
    }

    #[tokio::test]
    async fn mismatch_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f");
        std::fs::write(&path, b"goodbye").unwrap();
        let hashes: Hashes = [(HashAlgorithm::Sha256, HELLO_SHA256.to_string())]
            .into_iter()
            .collect();
        let err = verify_file_hashes_async(&path, &hashes).await.unwrap_err();
        assert!(matches!(err, SpfError::HashMismatch(_)));
    }

    #[test]
    fn empty_hashes_skip_reading() {
        verify_file_hashes(Path::new("/definitely/not/here"), &Hashes::new()).unwrap();
    }
}
