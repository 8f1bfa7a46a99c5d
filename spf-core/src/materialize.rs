// spf-core/src/materialize.rs
//! Turns a locator into a populated build directory: source directories are
//! copied, archives are verified and extracted.

use std::path::{Path, PathBuf};

use spf_aio::checksum::verify_file_hashes;
use spf_aio::copy::copy_source_tree;
use spf_aio::extract::extract_archive;
use spf_aio::fs::{remove_path, recreate_dir};
use spf_aio::path::url_to_path;
use spf_common::error::{Result, SpfError};
use spf_common::hashes::Hashes;
use spf_common::locator::Locator;
use spf_net::download::{save_to_download_dir, HashVerifiedDownloader, ProgressFn};
use spf_net::session::FetchSession;
use tracing::{debug, info, warn};

/// What ended up in the build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Directory {
        /// Copy left in the download directory, if one was made.
        saved: Option<PathBuf>,
    },
    Archive {
        content_type: Option<String>,
        /// Verified archive kept in the download directory.
        saved: Option<PathBuf>,
    },
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        task()
    })
    .await
    .map_err(|e| SpfError::Generic(format!("JoinError in blocking task: {e}")))?
}

pub struct ArchiveMaterializer<'a> {
    session: &'a FetchSession,
    progress: Option<&'a ProgressFn<'a>>,
}

impl<'a> ArchiveMaterializer<'a> {
    pub fn new(session: &'a FetchSession) -> Self {
        Self {
            session,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Populates `build_dir` from `locator`. Archives are checked against
    /// `hashes` plus any digests pinned in the locator fragment.
    pub async fn unpack_url(
        &self,
        locator: &Locator,
        build_dir: &Path,
        download_dir: Option<&Path>,
        hashes: Option<&Hashes>,
    ) -> Result<Materialized> {
        let pinned = locator.hashes();
        let hashes = match hashes {
            Some(extra) => pinned.merge(extra),
            None => pinned,
        };

        match locator.scheme() {
            "file" => {
                let source = url_to_path(locator.url_without_fragment())?;
                if source.is_dir() {
                    self.unpack_directory(source, build_dir, download_dir).await
                } else {
                    self.unpack_local_archive(source, build_dir, download_dir, hashes)
                        .await
                }
            }
            "http" | "https" => {
                self.unpack_remote_archive(locator, build_dir, download_dir, &hashes)
                    .await
            }
            _ => Err(SpfError::UnsupportedLocator(locator.redacted())),
        }
    }

    async fn unpack_directory(
        &self,
        source: PathBuf,
        build_dir: &Path,
        download_dir: Option<&Path>,
    ) -> Result<Materialized> {
        info!("Copying source directory {}", source.display());
        let target = build_dir.to_path_buf();
        let download_target = match download_dir {
            Some(dir) => {
                let name = source.file_name().ok_or_else(|| SpfError::InvalidLocation {
                    url: source.display().to_string(),
                    reason: "source directory has no name".to_string(),
                })?;
                Some(dir.join(name))
            }
            None => None,
        };

        blocking(move || {
            recreate_dir(&target)?;
            copy_source_tree(&source, &target)?;
            let Some(saved) = download_target else {
                return Ok(Materialized::Directory { saved: None });
            };
            if saved.symlink_metadata().is_ok() {
                info!("Not copying to {}: it already exists", saved.display());
                return Ok(Materialized::Directory { saved: None });
            }
            copy_source_tree(&source, &saved)?;
            info!("Saved {}", saved.display());
            Ok(Materialized::Directory { saved: Some(saved) })
        })
        .await
    }

    async fn unpack_local_archive(
        &self,
        source: PathBuf,
        build_dir: &Path,
        download_dir: Option<&Path>,
        hashes: Hashes,
    ) -> Result<Materialized> {
        let target = build_dir.to_path_buf();
        let download_dir = download_dir.map(Path::to_path_buf);

        blocking(move || {
            let already_downloaded = match (&download_dir, source.file_name()) {
                (Some(dir), Some(name)) => reusable_copy(&dir.join(name), &hashes)?,
                _ => None,
            };
            let archive = already_downloaded.as_deref().unwrap_or(&source);
            verify_file_hashes(archive, &hashes)?;
            extract_archive(archive, &target, None)?;

            let saved = match (&download_dir, already_downloaded.clone()) {
                (_, Some(existing)) => Some(existing),
                (Some(dir), None) => Some(save_to_download_dir(&source, dir)?),
                (None, None) => None,
            };
            Ok(Materialized::Archive {
                content_type: None,
                saved,
            })
        })
        .await
    }

    async fn unpack_remote_archive(
        &self,
        locator: &Locator,
        build_dir: &Path,
        download_dir: Option<&Path>,
        hashes: &Hashes,
    ) -> Result<Materialized> {
        let downloader = HashVerifiedDownloader::new(self.session);
        let target = build_dir.to_path_buf();

        let Some(download_dir) = download_dir else {
            let scratch = tempfile::tempdir()?;
            let artifact = downloader
                .download(locator, scratch.path(), hashes, self.progress)
                .await?;
            let content_type = artifact.content_type.clone();
            blocking(move || {
                extract_archive(&artifact.path, &target, artifact.content_type.as_deref())
            })
            .await?;
            drop(scratch);
            return Ok(Materialized::Archive {
                content_type,
                saved: None,
            });
        };

        let artifact = downloader
            .download_to_cache(locator, download_dir, hashes, self.progress)
            .await?;
        let content_type = artifact.content_type.clone();
        let saved = artifact.path.clone();
        blocking(move || {
            extract_archive(&artifact.path, &target, artifact.content_type.as_deref())
        })
        .await?;
        Ok(Materialized::Archive {
            content_type,
            saved: Some(saved),
        })
    }
}

/// An earlier copy in the download directory is reused unless it fails the
/// requested digests, in which case it is removed.
fn reusable_copy(candidate: &Path, hashes: &Hashes) -> Result<Option<PathBuf>> {
    if !candidate.is_file() {
        return Ok(None);
    }
    match verify_file_hashes(candidate, hashes) {
        Ok(()) => {
            debug!("Using previously downloaded {}", candidate.display());
            Ok(Some(candidate.to_path_buf()))
        }
        Err(SpfError::HashMismatch(_)) => {
            warn!(
                "Previously-downloaded file {} has bad hash. Re-downloading.",
                candidate.display()
            );
            remove_path(candidate)?;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Shorthand for [`ArchiveMaterializer::unpack_url`] without progress
/// reporting.
pub async fn unpack_url(
    session: &FetchSession,
    locator: &Locator,
    build_dir: &Path,
    download_dir: Option<&Path>,
    hashes: Option<&Hashes>,
) -> Result<Materialized> {
    ArchiveMaterializer::new(session)
        .unpack_url(locator, build_dir, download_dir, hashes)
        .await
}
