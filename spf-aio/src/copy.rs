// spf-aio/src/copy.rs
// Recursive source tree copy that keeps going past individual failures.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use spf_common::error::{CopyFailure, Result, SpfError};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Directory names never copied, at any depth.
const EXCLUDED_DIRS: &[&str] = &[".tox", ".nox"];

fn is_excluded(name: &OsStr) -> bool {
    EXCLUDED_DIRS.iter().any(|excluded| name == OsStr::new(excluded))
}

/// Where `target` shows up while walking `source`, if it lives inside it.
fn target_within_source(source: &Path, target: &Path) -> Option<PathBuf> {
    let source_real = fs::canonicalize(source).ok()?;
    let target_real = fs::canonicalize(target).ok()?;
    let relative = target_real.strip_prefix(&source_real).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(source.join(relative))
}

/// Copies the contents of `source` into `target`.
///
/// Regular files and directories are copied, symlinks are recreated as links
/// and other entry types (sockets, fifos, devices) are skipped with a warning.
/// A `target` inside `source` is left out of the walk.
/// Entries that fail are collected and reported together in one
/// [`SpfError::CopyTree`] once everything else has been copied.
pub fn copy_source_tree(source: &Path, target: &Path) -> Result<()> {
    debug!(
        "Copying source tree {} to {}",
        source.display(),
        target.display()
    );
    fs::create_dir_all(target)?;
    let nested_target = target_within_source(source, target);
    if let Some(nested) = &nested_target {
        debug!("Skipping {} while copying: it is the target", nested.display());
    }

    let mut failures = Vec::new();
    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || (!is_excluded(e.file_name()) && Some(e.path()) != nested_target.as_deref())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(source).to_path_buf();
                let cause = e
                    .io_error()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| e.to_string());
                warn!("Could not read {}: {}", path.display(), cause);
                failures.push(CopyFailure { path, cause });
                continue;
            }
        };

        let relative = match entry.path().strip_prefix(source) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let destination = target.join(relative);
        if let Err(e) = copy_entry(&entry, &destination) {
            debug!("Failed to copy {}: {}", entry.path().display(), e);
            failures.push(CopyFailure {
                path: entry.path().to_path_buf(),
                cause: e.to_string(),
            });
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(SpfError::CopyTree(failures))
    }
}

fn copy_entry(entry: &DirEntry, destination: &Path) -> io::Result<()> {
    let file_type = entry.file_type();
    if file_type.is_dir() {
        fs::create_dir_all(destination)
    } else if file_type.is_symlink() {
        let link_target = fs::read_link(entry.path())?;
        create_symlink(&link_target, entry.path(), destination)
    } else if file_type.is_file() {
        fs::copy(entry.path(), destination).map(|_| ())
    } else {
        warn!(
            "Ignoring special file {} while copying the source tree",
            entry.path().display()
        );
        Ok(())
    }
}

#[cfg(unix)]
fn create_symlink(link_target: &Path, _original: &Path, destination: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link_target, destination)
}

#[cfg(windows)]
fn create_symlink(link_target: &Path, original: &Path, destination: &Path) -> io::Result<()> {
    if fs::metadata(original).map(|m| m.is_dir()).unwrap_or(false) {
        std::os::windows::fs::symlink_dir(link_target, destination)
    } else {
        std::os::windows::fs::symlink_file(link_target, destination)
    }
}
