// spf-net/src/netrc.rs
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use netrc_rs::Netrc;
use tracing::{debug, warn};

use crate::auth::NetrcLookup;

/// Parsed netrc file.
pub struct NetrcFile {
    netrc: Netrc,
}

impl NetrcFile {
    pub fn parse(content: &str) -> Option<Self> {
        match Netrc::parse(content, false) {
            Ok(netrc) => Some(Self { netrc }),
            Err(e) => {
                warn!("Ignoring malformed netrc file: {}", e);
                None
            }
        }
    }

    pub fn load(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No netrc at {}: {}", path.display(), e);
                return None;
            }
        };
        debug!("Loaded netrc from {}", path.display());
        Self::parse(&content)
    }

    /// `$NETRC`, else `~/.netrc` (`~/_netrc` on Windows).
    pub fn from_env() -> Option<Self> {
        Self::default_path().and_then(|path| Self::load(&path))
    }

    fn default_path() -> Option<PathBuf> {
        if let Some(path) = env::var_os("NETRC").filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let home = BaseDirs::new()?.home_dir().to_path_buf();
        [".netrc", "_netrc"]
            .iter()
            .map(|name| home.join(name))
            .find(|candidate| candidate.is_file())
    }
}

impl NetrcLookup for NetrcFile {
    fn lookup(&self, host: &str) -> Option<(String, String)> {
        let machine = self
            .netrc
            .machines
            .iter()
            .find(|m| m.name.as_deref().is_some_and(|name| name.eq_ignore_ascii_case(host)))
            .or_else(|| self.netrc.machines.iter().find(|m| m.name.is_none()))?;
        let password = machine.password.clone()?;
        Some((machine.login.clone().unwrap_or_default(), password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETRC: &str = "machine example.com login alice password s3cret\n\
                         machine other.example login bob password hunter2\n\
                         default login anon password guest\n";

    #[test]
    fn finds_machine_entry_by_host() {
        let netrc = NetrcFile::parse(NETRC).unwrap();
        assert_eq!(
            netrc.lookup("example.com"),
            Some(("alice".to_string(), "s3cret".to_string()))
        );
        assert_eq!(
            netrc.lookup("OTHER.example"),
            Some(("bob".to_string(), "hunter2".to_string()))
        );
    }

    #[test]
    fn falls_back_to_default_entry() {
        let netrc = NetrcFile::parse(NETRC).unwrap();
        assert_eq!(
            netrc.lookup("unknown.example"),
            Some(("anon".to_string(), "guest".to_string()))
        );
    }

    #[test]
    fn missing_file_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(NetrcFile::load(&tmp.path().join("absent")).is_none());
    }
}
