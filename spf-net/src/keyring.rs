// spf-net/src/keyring.rs
use spf_common::error::{Result, SpfError};

use crate::auth::{KeyringProvider, LegacyKeyring};

/// The platform credential store (macOS Keychain, Windows Credential
/// Manager, Secret Service).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeyring;

impl OsKeyring {
    pub fn provider() -> KeyringProvider {
        KeyringProvider::Legacy(Box::new(OsKeyring))
    }
}

fn keyring_error(e: keyring::Error) -> SpfError {
    SpfError::Keyring(e.to_string())
}

impl LegacyKeyring for OsKeyring {
    fn get_password(&self, system: &str, username: &str) -> Result<Option<String>> {
        let entry = keyring::Entry::new(system, username).map_err(keyring_error)?;
        match entry.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keyring_error(e)),
        }
    }

    fn set_password(&self, system: &str, username: &str, password: &str) -> Result<()> {
        keyring::Entry::new(system, username)
            .and_then(|entry| entry.set_password(password))
            .map_err(keyring_error)
    }
}
