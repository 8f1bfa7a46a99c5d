// spf-net/src/lib.rs
//! Network side of spf: origin trust, credentials, the fetch session and
//! digest-verified downloads.

pub mod auth;
pub mod download;
pub mod keyring;
pub mod netrc;
pub mod session;
pub mod transport;
pub mod trust;
pub mod user_agent;

pub use auth::{
    Credential, CredentialPrompt, CredentialResolver, CredentialSource, KeyringProvider,
    LegacyKeyring, ModernKeyring, NetrcLookup,
};
pub use download::{
    parse_content_disposition, sanitize_content_filename, save_to_download_dir,
    DownloadedArtifact, HashVerifiedDownloader,
};
pub use keyring::OsKeyring;
pub use netrc::NetrcFile;
pub use session::FetchSession;
pub use transport::{ReqwestTransport, Transport};
pub use trust::{OriginTrustPolicy, SecureOrigin};
pub use user_agent::user_agent;
