// spf-common/src/locator.rs
//! URL-like source locations with optional embedded credentials and digest
//! fragments.

use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{Result, SpfError};
use crate::hashes::Hashes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    url: Url,
}

impl Locator {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim()).map_err(|e| SpfError::Url(raw.to_string(), e))?;
        Ok(Self {
            raw: raw.trim().to_string(),
            url,
        })
    }

    /// The locator exactly as it was supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Lowercase scheme, e.g. `git+https`.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The part of a compound `vcs+transport` scheme that names the wire
    /// protocol.
    pub fn transport_scheme(&self) -> &str {
        self.scheme().rsplit('+').next().unwrap_or_else(|| self.scheme())
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// Host plus explicit port, without credentials.
    pub fn netloc(&self) -> String {
        match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        }
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn is_file(&self) -> bool {
        self.scheme() == "file"
    }

    pub fn is_http(&self) -> bool {
        matches!(self.scheme(), "http" | "https")
    }

    /// Last non-empty path segment, percent-decoded.
    pub fn filename(&self) -> Option<String> {
        self.url
            .path()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
    }

    /// The raw locator with any `#fragment` removed.
    pub fn url_without_fragment(&self) -> &str {
        self.raw.split('#').next().unwrap_or(&self.raw)
    }

    /// Digests pinned through `#alg=hex` fragments.
    pub fn hashes(&self) -> Hashes {
        self.raw
            .split_once('#')
            .map(|(_, fragment)| Hashes::from_fragment(fragment))
            .unwrap_or_default()
    }

    /// Splits embedded `user:pass@` credentials off the locator. The returned
    /// URL carries neither credentials nor fragment; the credentials are
    /// percent-decoded exactly once.
    pub fn split_credentials(&self) -> (String, Option<(String, String)>) {
        let mut canonical = self.url.clone();
        canonical.set_fragment(None);
        let username = percent_decode_str(self.url.username())
            .decode_utf8_lossy()
            .into_owned();
        let password = self
            .url
            .password()
            .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned());

        if username.is_empty() && password.is_none() {
            return (canonical.to_string(), None);
        }
        let _ = canonical.set_username("");
        let _ = canonical.set_password(None);
        (
            canonical.to_string(),
            Some((username, password.unwrap_or_default())),
        )
    }

    /// Display form with any password masked.
    pub fn redacted(&self) -> String {
        let mut shown = self.url.clone();
        if shown.password().is_some() {
            let _ = shown.set_password(Some("****"));
        }
        shown.to_string()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl std::str::FromStr for Locator {
    type Err = SpfError;

    fn from_str(s: &str) -> Result<Self> {
        Locator::parse(s)
    }
}
