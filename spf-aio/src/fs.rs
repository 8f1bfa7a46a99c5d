/*
File: spf-aio/src/fs.rs
Purpose: Primitive synchronous filesystem operations.
*/
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use spf_common::error::{Result, SpfError};
use tracing::{debug, error};

/// Resolves `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True if `target`, once normalized, stays inside `directory`.
pub fn is_within_directory(directory: &Path, target: &Path) -> bool {
    normalize_lexically(target).starts_with(normalize_lexically(directory))
}

/// Removes a file, symlink or directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SpfError::from(e)),
    };
    debug!("Removing {}", path.display());
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| {
        error!("Failed remove {}: {}", path.display(), e);
        SpfError::from(e)
    })
}

/// Empties `path` by removing it and creating it again.
pub fn recreate_dir(path: &Path) -> Result<()> {
    remove_path(path)?;
    create_dir_all(path)
}

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        SpfError::from(e)
    })
}

/// Copies `source` onto `destination` through a temp file in the destination
/// directory, so readers never see a half-written file.
pub fn copy_file_atomic(source: &Path, destination: &Path) -> Result<()> {
    let parent = destination.parent().ok_or_else(|| {
        SpfError::IoError(format!("{} has no parent directory", destination.display()))
    })?;
    create_dir_all(parent)?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    let mut reader = fs::File::open(source)?;
    io::copy(&mut reader, temp.as_file_mut())?;
    temp.persist(destination)
        .map_err(|e| SpfError::from(e.error))?;
    debug!(
        "Copied {} to {}",
        source.display(),
        destination.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("/a/b/../c", "/a/c")]
    #[case("/a/./b/", "/a/b")]
    #[case("a/../../b", "../b")]
    fn normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_lexically(Path::new(input)), PathBuf::from(expected));
    }

    #[rstest]
    #[case("/d/x", true)]
    #[case("/d/x/../y", true)]
    #[case("/d/../x", false)]
    #[case("/other", false)]
    fn within_directory(#[case] target: &str, #[case] expected: bool) {
        assert_eq!(is_within_directory(Path::new("/d"), Path::new(target)), expected);
    }

    #[test]
    fn remove_path_handles_files_dirs_and_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("dir");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/f"), b"x").unwrap();
        let file = tmp.path().join("file");
        fs::write(&file, b"y").unwrap();

        remove_path(&dir).unwrap();
        remove_path(&file).unwrap();
        remove_path(&tmp.path().join("missing")).unwrap();
        assert!(!dir.exists());
        assert!(!file.exists());
    }

    #[test]
    fn copy_file_atomic_replaces_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.bin");
        let dst = tmp.path().join("out/dst.bin");
        fs::write(&src, b"new").unwrap();
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, b"old contents").unwrap();
        copy_file_atomic(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new");
    }
}
