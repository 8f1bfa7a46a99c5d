// spf-aio/src/path.rs
//! Conversion between local paths and `file:` URLs.
//!
//! Both conventions work on plain strings so either one can be exercised on
//! any host. [`PathConvention::native`] picks the one matching the platform.

use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use spf_common::error::{Result, SpfError};

use crate::fs::normalize_lexically;

/// Characters left alone inside a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

/// Same as [`SEGMENT`] but keeps `/` separators.
const POSIX_PATH: &AsciiSet = &SEGMENT.remove(b'/');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathConvention {
    Posix,
    Windows,
}

impl PathConvention {
    pub fn native() -> Self {
        if cfg!(windows) {
            PathConvention::Windows
        } else {
            PathConvention::Posix
        }
    }

    /// Converts a `file:` URL to a path string.
    pub fn to_path(self, url: &str) -> Result<String> {
        let invalid = |reason: &str| SpfError::InvalidLocation {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let rest = match url.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("file:") => &url[5..],
            _ => return Err(invalid("not a file: URL")),
        };
        let rest = rest.split('#').next().unwrap_or(rest);
        let rest = rest.split('?').next().unwrap_or(rest);

        let (authority, path) = match rest.strip_prefix("//") {
            Some(after) => match after.find('/') {
                Some(idx) => (&after[..idx], &after[idx..]),
                None => (after, ""),
            },
            None => ("", rest),
        };

        let netloc = if authority.is_empty() || authority.eq_ignore_ascii_case("localhost") {
            String::new()
        } else {
            match self {
                PathConvention::Windows => format!("\\\\{authority}"),
                PathConvention::Posix => {
                    return Err(invalid(
                        "non-local file URIs are not supported on this platform",
                    ))
                }
            }
        };

        match self {
            PathConvention::Posix => Ok(decode(path)),
            PathConvention::Windows => windows_url_to_path(&format!("{netloc}{path}"))
                .ok_or_else(|| invalid("malformed drive specifier")),
        }
    }

    /// Converts a path string to a `file:` URL. Relative paths produce
    /// relative URLs; see [`path_to_url`] for the absolutizing variant.
    pub fn to_url(self, path: &str) -> Result<String> {
        match self {
            PathConvention::Posix => {
                let encoded = utf8_percent_encode(path, POSIX_PATH).to_string();
                if path.starts_with('/') {
                    Ok(format!("file://{encoded}"))
                } else {
                    Ok(format!("file:{encoded}"))
                }
            }
            PathConvention::Windows => windows_path_to_url(path).ok_or_else(|| {
                SpfError::InvalidLocation {
                    url: path.to_string(),
                    reason: "malformed drive specifier".to_string(),
                }
            }),
        }
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn encode_segment(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

fn windows_url_to_path(url: &str) -> Option<String> {
    let url = url.replace('|', ":");
    let Some((before, after)) = url.split_once(':') else {
        let url = url.strip_prefix("////").map(|u| format!("//{u}")).unwrap_or(url);
        return Some(decode(&url.replace('/', "\\")));
    };
    if after.contains(':') {
        return None;
    }
    let drive = before.chars().last().filter(|c| c.is_ascii_alphabetic())?;
    let mut path = format!("{}:", drive.to_ascii_uppercase());
    for component in after.split('/').filter(|c| !c.is_empty()) {
        path.push('\\');
        path.push_str(&decode(component));
    }
    if path.ends_with(':') && url.ends_with('/') {
        path.push('\\');
    }
    Some(path)
}

fn windows_path_to_url(path: &str) -> Option<String> {
    let Some((drive, rest)) = path.split_once(':') else {
        if let Some(unc) = path.strip_prefix("\\\\") {
            let segments: Vec<String> = unc.split('\\').map(encode_segment).collect();
            return Some(format!("file://{}", segments.join("/")));
        }
        let segments: Vec<String> = path.split('\\').map(encode_segment).collect();
        let joined = segments.join("/");
        return Some(if joined.starts_with('/') {
            format!("file://{joined}")
        } else {
            format!("file:{joined}")
        });
    };
    if drive.len() != 1 || rest.contains(':') {
        return None;
    }
    let mut url = format!("file:///{}:", drive.to_ascii_uppercase());
    for component in rest.split('\\').filter(|c| !c.is_empty()) {
        url.push('/');
        url.push_str(&encode_segment(component));
    }
    if url.ends_with(':') && rest.ends_with('\\') {
        url.push('/');
    }
    Some(url)
}

/// Converts a `file:` URL to a local path using the host convention.
pub fn url_to_path(url: &str) -> Result<PathBuf> {
    PathConvention::native().to_path(url).map(PathBuf::from)
}

/// Converts a local path to an absolute, normalized `file:` URL using the
/// host convention.
pub fn path_to_url(path: &Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let normalized = normalize_lexically(&absolute);
    let as_str = normalized
        .to_str()
        .ok_or_else(|| SpfError::InvalidLocation {
            url: normalized.display().to_string(),
            reason: "path is not valid UTF-8".to_string(),
        })?;
    PathConvention::native().to_url(as_str)
}
