// spf-net/src/download.rs
//! Streaming downloads checked against pinned digests.

use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Response;
use spf_aio::path::PathConvention;
use spf_common::error::{Result, SpfError};
use spf_common::hashes::Hashes;
use spf_common::locator::Locator;
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::session::FetchSession;

const DEFAULT_FILENAME: &str = "download";

/// Cumulative bytes received and the announced total, if any.
pub type ProgressFn<'a> = dyn Fn(u64, Option<u64>) + Send + Sync + 'a;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    pub content_type: Option<String>,
}

/// Reduces a server-supplied name to its final path component.
pub fn sanitize_content_filename(filename: &str) -> String {
    sanitize_content_filename_for(PathConvention::native(), filename)
}

pub fn sanitize_content_filename_for(convention: PathConvention, filename: &str) -> String {
    let separators: &[char] = match convention {
        PathConvention::Posix => &['/'],
        PathConvention::Windows => &['/', '\\'],
    };
    filename.rsplit(separators).next().unwrap_or_default().to_string()
}

/// Returns the sanitized `filename` parameter of a `Content-Disposition`
/// value, or `default` if there is none. `filename*` wins over `filename`.
pub fn parse_content_disposition(header: &str, default: &str) -> String {
    let mut plain = None;
    let mut extended = None;
    for param in split_params(header).into_iter().skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename" => plain = Some(unquote(value.trim())),
            "filename*" => extended = decode_extended(value.trim()),
            _ => {}
        }
    }
    let sanitized = extended
        .or(plain)
        .map(|name| sanitize_content_filename(&name))
        .unwrap_or_default();
    if sanitized.is_empty() {
        default.to_string()
    } else {
        sanitized
    }
}

/// Splits on `;` outside quoted strings.
fn split_params(header: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in header.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(header[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(header[start..].trim());
    params
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => value.to_string(),
    }
}

/// RFC 5987 `charset'lang'percent-encoded`.
fn decode_extended(value: &str) -> Option<String> {
    let mut parts = value.splitn(3, '\'');
    let _charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;
    Some(percent_decode_str(encoded).decode_utf8_lossy().into_owned())
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "application/zip" => Some(".zip"),
        "application/x-tar" => Some(".tar"),
        "application/gzip" | "application/x-gzip" => Some(".gz"),
        "application/x-bzip2" => Some(".bz2"),
        "application/x-xz" => Some(".xz"),
        "text/html" => Some(".html"),
        "application/json" => Some(".json"),
        _ => None,
    }
}

fn has_extension(name: &str) -> bool {
    Path::new(name).extension().is_some()
}

/// Human readable byte count.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1000.0;
    let b = bytes as f64;
    if b >= KB * KB * KB {
        format!("{:.1} GB", b / (KB * KB * KB))
    } else if b >= KB * KB * 10.0 {
        format!("{:.0} MB", b / (KB * KB))
    } else if b >= KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else if b >= KB * 10.0 {
        format!("{:.0} kB", b / KB)
    } else if b >= KB {
        format!("{:.1} kB", b / KB)
    } else {
        format!("{bytes} bytes")
    }
}

/// Picks the local filename for a response.
fn response_filename(locator: &Locator, response: &Response) -> String {
    let fallback = locator
        .filename()
        .map(|name| sanitize_content_filename(&name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
    let mut filename = match response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
    {
        Some(disposition) => parse_content_disposition(disposition, &fallback),
        None => fallback,
    };
    if filename == "." || filename == ".." {
        filename = DEFAULT_FILENAME.to_string();
    }

    if !has_extension(&filename) {
        let guessed = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(extension_for_content_type)
            .map(str::to_string)
            .or_else(|| {
                let final_url = response.url();
                if final_url.as_str() == locator.url_without_fragment() {
                    return None;
                }
                final_url
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .and_then(|last| Path::new(last).extension())
                    .map(|ext| format!(".{}", ext.to_string_lossy()))
            });
        if let Some(ext) = guessed {
            filename.push_str(&ext);
        }
    }
    filename
}

/// Downloads artifacts through a [`FetchSession`], verifying digests while
/// the bytes stream to disk.
pub struct HashVerifiedDownloader<'a> {
    session: &'a FetchSession,
}

impl<'a> HashVerifiedDownloader<'a> {
    pub fn new(session: &'a FetchSession) -> Self {
        Self { session }
    }

    /// Fetches `locator` into `destination_dir`. A digest mismatch or I/O
    /// failure leaves nothing behind at the destination.
    pub async fn download(
        &self,
        locator: &Locator,
        destination_dir: &Path,
        hashes: &Hashes,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<DownloadedArtifact> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        let response = self.session.get(locator, headers).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SpfError::HttpStatus {
                url: locator.redacted(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = response_filename(locator, &response);
        let total = response.content_length();
        match total {
            Some(len) => info!("Downloading {} ({})", locator, format_size(len)),
            None => info!("Downloading {}", locator),
        }

        spf_aio::fs::create_dir_all(destination_dir)?;
        let final_path = destination_dir.join(&filename);
        let (file, temp_path) = NamedTempFile::new_in(destination_dir)?.into_parts();
        debug!("Downloading to temporary path: {}", temp_path.display());

        // Dropping `temp_path` on any early return removes the partial file.
        stream_to_file(response, TokioFile::from_std(file), hashes, progress).await?;
        temp_path.persist(&final_path).map_err(|e| {
            SpfError::IoError(format!(
                "Failed to move {} to {}: {}",
                e.path.display(),
                final_path.display(),
                e.error
            ))
        })?;
        debug!("Saved {}", final_path.display());
        Ok(DownloadedArtifact {
            path: final_path,
            content_type,
        })
    }

    /// Always fetches fresh and replaces whatever same-named file
    /// `download_dir` already holds.
    pub async fn download_to_cache(
        &self,
        locator: &Locator,
        download_dir: &Path,
        hashes: &Hashes,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<DownloadedArtifact> {
        let scratch = tempfile::tempdir()?;
        let artifact = self.download(locator, scratch.path(), hashes, progress).await?;
        let path = save_to_download_dir(&artifact.path, download_dir)?;
        Ok(DownloadedArtifact {
            path,
            content_type: artifact.content_type,
        })
    }
}

async fn stream_to_file(
    mut response: Response,
    mut file: TokioFile,
    hashes: &Hashes,
    progress: Option<&ProgressFn<'_>>,
) -> Result<()> {
    let mut hasher = hashes.hasher();
    let total = response.content_length();
    let mut received = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        received += chunk.len() as u64;
        if let Some(report) = progress {
            report(received, total);
        }
    }
    file.flush().await?;
    drop(file);

    if !hashes.is_empty() {
        hashes.check_digests(&hasher.finish())?;
    }
    Ok(())
}

/// Copies a verified artifact into `download_dir` under its own name,
/// replacing any previous file there.
pub fn save_to_download_dir(artifact: &Path, download_dir: &Path) -> Result<PathBuf> {
    let name = artifact.file_name().ok_or_else(|| {
        SpfError::IoError(format!("{} has no file name", artifact.display()))
    })?;
    let destination = download_dir.join(name);
    spf_aio::fs::copy_file_atomic(artifact, &destination)?;
    info!("Saved {}", destination.display());
    Ok(destination)
}
