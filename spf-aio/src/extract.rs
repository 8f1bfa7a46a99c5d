// spf-aio/src/extract.rs
// Archive extraction. The format is picked from the declared content type,
// then the file name, then the file's magic bytes.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use spf_common::error::{Result, SpfError};
use tar::{Archive, EntryType};
use tracing::{debug, error, warn};
use xz2::read::XzDecoder;
use zip::read::ZipArchive;

use crate::fs::is_within_directory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

impl ArchiveKind {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "application/zip" | "application/x-zip-compressed" => Some(ArchiveKind::Zip),
            "application/x-tar" => Some(ArchiveKind::Tar),
            "application/gzip" | "application/x-gzip" => Some(ArchiveKind::TarGz),
            "application/x-bzip2" => Some(ArchiveKind::TarBz2),
            "application/x-xz" => Some(ArchiveKind::TarXz),
            _ => None,
        }
    }

    pub fn from_filename(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        const SUFFIXES: &[(&str, ArchiveKind)] = &[
            (".zip", ArchiveKind::Zip),
            (".whl", ArchiveKind::Zip),
            (".tar.gz", ArchiveKind::TarGz),
            (".tgz", ArchiveKind::TarGz),
            (".tar.bz2", ArchiveKind::TarBz2),
            (".tbz", ArchiveKind::TarBz2),
            (".tbz2", ArchiveKind::TarBz2),
            (".tar.xz", ArchiveKind::TarXz),
            (".txz", ArchiveKind::TarXz),
            (".tar", ArchiveKind::Tar),
        ];
        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, kind)| *kind)
    }

    /// Identifies the archive from its leading bytes.
    pub fn sniff(path: &Path) -> Option<Self> {
        match infer::get_from_path(path) {
            Ok(Some(kind)) => Self::from_content_type(kind.mime_type()),
            Ok(None) => None,
            Err(e) => {
                debug!("Could not sniff {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn detect(path: &Path, content_type: Option<&str>) -> Result<Self> {
        content_type
            .and_then(Self::from_content_type)
            .or_else(|| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(Self::from_filename)
            })
            .or_else(|| Self::sniff(path))
            .ok_or_else(|| SpfError::UnsupportedArchive {
                path: path.to_path_buf(),
                reason: match content_type {
                    Some(ct) => format!("cannot determine archive type (content type '{ct}')"),
                    None => "cannot determine archive type".to_string(),
                },
            })
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::TarBz2 => "tar.bz2",
            ArchiveKind::TarXz => "tar.xz",
        };
        f.write_str(name)
    }
}

/// Extracts `archive_path` into `target_dir`. When every member lives under
/// one top-level directory, that directory is stripped.
pub fn extract_archive(
    archive_path: &Path,
    target_dir: &Path,
    content_type: Option<&str>,
) -> Result<()> {
    let kind = ArchiveKind::detect(archive_path, content_type)?;
    debug!(
        "Extracting archive '{}' (type: {}) to '{}'",
        archive_path.display(),
        kind,
        target_dir.display()
    );
    fs::create_dir_all(target_dir)?;

    let strip = usize::from(infer_root(archive_path, kind)?.is_some());
    let file = File::open(archive_path)?;
    match kind {
        ArchiveKind::Zip => extract_zip_archive(file, target_dir, strip, archive_path),
        ArchiveKind::TarGz => {
            extract_tar_archive(GzDecoder::new(file), target_dir, strip, archive_path)
        }
        ArchiveKind::TarBz2 => {
            extract_tar_archive(BzDecoder::new(file), target_dir, strip, archive_path)
        }
        ArchiveKind::TarXz => {
            extract_tar_archive(XzDecoder::new(file), target_dir, strip, archive_path)
        }
        ArchiveKind::Tar => extract_tar_archive(file, target_dir, strip, archive_path),
    }
}

pub(crate) fn infer_root(archive_path: &Path, kind: ArchiveKind) -> Result<Option<PathBuf>> {
    let file = File::open(archive_path)?;
    let members = match kind {
        ArchiveKind::Zip => zip_members(file, archive_path)?,
        ArchiveKind::TarGz => tar_members(GzDecoder::new(file), archive_path)?,
        ArchiveKind::TarBz2 => tar_members(BzDecoder::new(file), archive_path)?,
        ArchiveKind::TarXz => tar_members(XzDecoder::new(file), archive_path)?,
        ArchiveKind::Tar => tar_members(file, archive_path)?,
    };
    Ok(single_root(&members, archive_path))
}

/// (member path, is directory)
type Member = (PathBuf, bool);

fn tar_members<R: Read>(reader: R, archive_path_for_log: &Path) -> Result<Vec<Member>> {
    let mut archive = Archive::new(reader);
    let mut members = Vec::new();
    for entry_result in archive.entries()? {
        let entry = entry_result.map_err(|e| {
            SpfError::Extraction(format!(
                "Error reading TAR entry from {}: {}",
                archive_path_for_log.display(),
                e
            ))
        })?;
        if is_metadata_entry(entry.header().entry_type()) {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| {
                SpfError::Extraction(format!(
                    "Invalid path in TAR entry from {}: {}",
                    archive_path_for_log.display(),
                    e
                ))
            })?
            .into_owned();
        members.push((path, entry.header().entry_type().is_dir()));
    }
    Ok(members)
}

fn zip_members<R: Read + Seek>(reader: R, archive_path_for_log: &Path) -> Result<Vec<Member>> {
    let mut archive = open_zip(reader, archive_path_for_log)?;
    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i).map_err(|e| {
            SpfError::Extraction(format!(
                "Error reading ZIP index {} in {}: {}",
                i,
                archive_path_for_log.display(),
                e
            ))
        })?;
        members.push((PathBuf::from(file.name()), file.is_dir()));
    }
    Ok(members)
}

fn is_metadata_entry(entry_type: EntryType) -> bool {
    matches!(
        entry_type,
        EntryType::XGlobalHeader | EntryType::XHeader | EntryType::GNULongName | EntryType::GNULongLink
    )
}

/// The shared leading directory of every member, if there is one. A lone
/// top-level file does not count as a root.
fn single_root(members: &[Member], archive_path_for_log: &Path) -> Option<PathBuf> {
    let mut unique_roots = HashSet::new();
    for (path, is_dir) in members {
        let mut components = path.components().filter(|c| *c != Component::CurDir);
        let Some(first) = components.next() else {
            continue;
        };
        let Component::Normal(name) = first else {
            debug!(
                "Non-standard top-level component ({:?}) found in {}, cannot infer single root.",
                first,
                archive_path_for_log.display()
            );
            return None;
        };
        if components.next().is_none() && !is_dir {
            debug!(
                "Top-level file {} in {}, not stripping a root.",
                path.display(),
                archive_path_for_log.display()
            );
            return None;
        }
        unique_roots.insert(PathBuf::from(name));
        if unique_roots.len() > 1 {
            debug!(
                "Multiple top-level items found in {}, cannot infer single root.",
                archive_path_for_log.display()
            );
            return None;
        }
    }
    let root = unique_roots.into_iter().next();
    match &root {
        Some(root) => debug!(
            "Inferred single root directory in {}: {}",
            archive_path_for_log.display(),
            root.display()
        ),
        None => warn!(
            "Archive {} appears to be empty.",
            archive_path_for_log.display()
        ),
    }
    root
}

/// Maps a member name onto the target directory. `Ok(None)` means the member
/// vanished under stripping; `Err` carries the rejection message.
fn member_target(
    target_dir: &Path,
    member: &Path,
    strip_components: usize,
) -> std::result::Result<Option<PathBuf>, String> {
    let mut out = target_dir.to_path_buf();
    let mut pushed = false;
    for comp in member
        .components()
        .filter(|c| *c != Component::CurDir)
        .skip(strip_components)
    {
        match comp {
            Component::Normal(p) => {
                out.push(p);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("Unsafe '..' in archive member {}", member.display()));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!(
                    "Disallowed component {:?} in archive member {}",
                    comp,
                    member.display()
                ));
            }
        }
    }
    if !pushed {
        return Ok(None);
    }
    if !out.starts_with(target_dir) {
        return Err(format!(
            "Path traversal {} -> {} detected",
            member.display(),
            out.display()
        ));
    }
    Ok(Some(out))
}

fn aggregate(errors: Vec<String>, archive_path_for_log: &Path) -> Result<()> {
    if errors.is_empty() {
        debug!("Finished extraction for {}", archive_path_for_log.display());
        return Ok(());
    }
    Err(SpfError::Extraction(format!(
        "Failed during extraction of {} with {} error(s): {}",
        archive_path_for_log.display(),
        errors.len(),
        errors.join("; ")
    )))
}

/// Represents a hardlink operation that was deferred until all regular
/// members exist.
struct DeferredHardLink {
    link_path: PathBuf,
    target_in_archive: PathBuf,
}

fn extract_tar_archive<R: Read>(
    reader: R,
    target_dir: &Path,
    strip_components: usize,
    archive_path_for_log: &Path,
) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    debug!(
        "Starting TAR extraction for {}",
        archive_path_for_log.display()
    );

    let mut deferred_hardlinks: Vec<DeferredHardLink> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result.map_err(|e| {
            SpfError::Extraction(format!(
                "Error reading TAR entry from {}: {}",
                archive_path_for_log.display(),
                e
            ))
        })?;
        let entry_type = entry.header().entry_type();
        if is_metadata_entry(entry_type) {
            continue;
        }

        let member: PathBuf = entry
            .path()
            .map_err(|e| {
                SpfError::Extraction(format!(
                    "Invalid path in TAR entry from {}: {}",
                    archive_path_for_log.display(),
                    e
                ))
            })?
            .into_owned();

        let destination = match member_target(target_dir, &member, strip_components) {
            Ok(Some(path)) => path,
            Ok(None) => {
                debug!("Skipping entry due to root stripping: {:?}", member);
                continue;
            }
            Err(msg) => {
                error!("{}", msg);
                errors.push(msg);
                continue;
            }
        };

        if entry_type == EntryType::Symlink {
            match entry.link_name() {
                Ok(Some(link)) => {
                    let resolved = destination
                        .parent()
                        .unwrap_or(target_dir)
                        .join(link.as_ref());
                    if link.is_absolute() || !is_within_directory(target_dir, &resolved) {
                        let msg = format!(
                            "Symlink {} points outside the extraction directory ({})",
                            member.display(),
                            link.display()
                        );
                        error!("{}", msg);
                        errors.push(msg);
                        continue;
                    }
                }
                _ => {
                    let msg = format!("Symlink entry '{}' has no target.", member.display());
                    warn!("{}", msg);
                    errors.push(msg);
                    continue;
                }
            }
        }

        if entry_type == EntryType::Link {
            match entry.link_name() {
                Ok(Some(link)) => {
                    deferred_hardlinks.push(DeferredHardLink {
                        link_path: destination,
                        target_in_archive: link.into_owned(),
                    });
                }
                _ => {
                    let msg = format!("Hardlink entry '{}' has no link target name.", member.display());
                    warn!("{}", msg);
                    errors.push(msg);
                }
            }
            continue;
        }

        if let Some(parent) = destination.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                let msg = format!("Failed create parent dir {}: {}", parent.display(), e);
                error!("{}", msg);
                errors.push(msg);
                continue;
            }
        }

        match entry.unpack(&destination) {
            Ok(_) => debug!("Unpacked TAR entry to: {}", destination.display()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Entry already exists at {}", destination.display());
            }
            Err(e) => {
                let msg = format!(
                    "Failed to unpack entry {:?} to {}: {}. Entry type: {:?}",
                    member,
                    destination.display(),
                    e,
                    entry_type
                );
                error!("{}", msg);
                errors.push(msg);
            }
        }
    }

    for deferred in deferred_hardlinks {
        let disk_target = match member_target(target_dir, &deferred.target_in_archive, strip_components) {
            Ok(Some(path)) => path,
            _ => {
                let msg = format!(
                    "Hardlink {} targets {} outside the extraction directory",
                    deferred.link_path.display(),
                    deferred.target_in_archive.display()
                );
                error!("{}", msg);
                errors.push(msg);
                continue;
            }
        };
        if deferred.link_path.symlink_metadata().is_ok() {
            let _ = fs::remove_file(&deferred.link_path);
        }
        if let Err(e) = fs::hard_link(&disk_target, &deferred.link_path) {
            let msg = format!(
                "Failed to create hardlink '{}' -> '{}': {}",
                deferred.link_path.display(),
                disk_target.display(),
                e
            );
            error!("{}", msg);
            errors.push(msg);
        }
    }

    aggregate(errors, archive_path_for_log)
}

fn open_zip<R: Read + Seek>(reader: R, archive_path_for_log: &Path) -> Result<ZipArchive<R>> {
    ZipArchive::new(reader).map_err(|e| SpfError::UnsupportedArchive {
        path: archive_path_for_log.to_path_buf(),
        reason: format!("failed to open ZIP: {e}"),
    })
}

fn extract_zip_archive<R: Read + Seek>(
    reader: R,
    target_dir: &Path,
    strip_components: usize,
    archive_path_for_log: &Path,
) -> Result<()> {
    let mut archive = open_zip(reader, archive_path_for_log)?;
    debug!(
        "Starting ZIP extraction for {}",
        archive_path_for_log.display()
    );

    let mut errors: Vec<String> = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| {
            SpfError::Extraction(format!(
                "Error reading ZIP index {} in {}: {}",
                i,
                archive_path_for_log.display(),
                e
            ))
        })?;
        let member = PathBuf::from(file.name());

        let destination = match member_target(target_dir, &member, strip_components) {
            Ok(Some(path)) => path,
            Ok(None) => continue,
            Err(msg) => {
                error!("{}", msg);
                errors.push(msg);
                continue;
            }
        };

        let result = if file.is_dir() {
            fs::create_dir_all(&destination)
        } else {
            write_zip_file(&mut file, &destination)
        };
        if let Err(e) = result {
            let msg = format!(
                "Failed to extract ZIP member {} to {}: {}",
                member.display(),
                destination.display(),
                e
            );
            error!("{}", msg);
            errors.push(msg);
            continue;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                if destination.is_file() && mode & 0o111 != 0 {
                    let perms = fs::Permissions::from_mode(0o755);
                    if let Err(e) = fs::set_permissions(&destination, perms) {
                        warn!(
                            "Failed set permissions on ZIP entry {}: {}",
                            destination.display(),
                            e
                        );
                    }
                }
            }
        }
    }

    aggregate(errors, archive_path_for_log)
}

fn write_zip_file<R: Read>(file: &mut R, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out_file = File::create(destination)?;
    io::copy(file, &mut out_file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("pkg-1.0.tar.gz", Some(ArchiveKind::TarGz))]
    #[case("pkg-1.0.TGZ", Some(ArchiveKind::TarGz))]
    #[case("pkg-1.0.tar.bz2", Some(ArchiveKind::TarBz2))]
    #[case("pkg-1.0.tar.xz", Some(ArchiveKind::TarXz))]
    #[case("pkg-1.0.tar", Some(ArchiveKind::Tar))]
    #[case("pkg-1.0-py3-none-any.whl", Some(ArchiveKind::Zip))]
    #[case("pkg-1.0.zip", Some(ArchiveKind::Zip))]
    #[case("pkg-1.0.txt", None)]
    fn kind_from_filename(#[case] name: &str, #[case] expected: Option<ArchiveKind>) {
        assert_eq!(ArchiveKind::from_filename(name), expected);
    }

    #[test]
    fn content_type_beats_filename() {
        let kind = ArchiveKind::detect(Path::new("download.tar.gz"), Some("application/zip")).unwrap();
        assert_eq!(kind, ArchiveKind::Zip);
        let kind =
            ArchiveKind::detect(Path::new("pkg.tar.gz"), Some("application/octet-stream")).unwrap();
        assert_eq!(kind, ArchiveKind::TarGz);
    }

    fn tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn strips_single_leading_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("pkg-1.0.tar.gz");
        tar_gz(
            &archive,
            &[("pkg-1.0/setup.py", b"setup()"), ("pkg-1.0/pkg/__init__.py", b"")],
        );
        let out = tmp.path().join("out");
        extract_archive(&archive, &out, None).unwrap();
        assert_eq!(fs::read(out.join("setup.py")).unwrap(), b"setup()");
        assert!(out.join("pkg/__init__.py").is_file());
    }

    #[test]
    fn keeps_layout_without_common_root() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("mixed.tar.gz");
        tar_gz(&archive, &[("a/one.txt", b"1"), ("b/two.txt", b"2")]);
        let out = tmp.path().join("out");
        extract_archive(&archive, &out, Some("application/x-gzip")).unwrap();
        assert!(out.join("a/one.txt").is_file());
        assert!(out.join("b/two.txt").is_file());
    }

    #[test]
    fn zip_members_with_parent_components_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("evil.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("ok.txt", options).unwrap();
            writer.write_all(b"fine").unwrap();
            writer.start_file("../escape.txt", options).unwrap();
            writer.write_all(b"bad").unwrap();
            writer.start_file("../../escape2.txt", options).unwrap();
            writer.write_all(b"bad").unwrap();
            writer.finish().unwrap();
        }
        let out = tmp.path().join("nested/out");
        let err = extract_archive(&archive, &out, None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("2 error(s)"), "{message}");
        assert!(out.join("ok.txt").is_file());
        assert!(!tmp.path().join("nested/escape.txt").exists());
        assert!(!tmp.path().join("escape2.txt").exists());
    }

    #[test]
    fn unknown_format_is_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes");
        fs::write(&path, b"plain text, not an archive").unwrap();
        let err = extract_archive(&path, &tmp.path().join("out"), Some("text/plain")).unwrap_err();
        assert!(matches!(err, SpfError::UnsupportedArchive { .. }));
    }

    #[test]
    fn sniffs_gzip_without_hints() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("download");
        tar_gz(&archive, &[("root/file.txt", b"x")]);
        assert_eq!(ArchiveKind::sniff(&archive), Some(ArchiveKind::TarGz));
        extract_archive(&archive, &tmp.path().join("out"), None).unwrap();
        assert!(tmp.path().join("out/file.txt").is_file());
    }
}
