// spf/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use spf_common::config::Config;
use spf_common::error::Result;
use spf_common::hashes::Hashes;
use spf_common::locator::Locator;
use spf_net::{CredentialPrompt, FetchSession};

pub mod check_origin;
pub mod download;
pub mod fetch;

use crate::cli::check_origin::CheckOriginArgs;
use crate::cli::download::DownloadArgs;
use crate::cli::fetch::FetchArgs;
use crate::ui::TerminalPrompt;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "spf", bin_name = "spf")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Materialize a source into a build directory
    Fetch(FetchArgs),
    /// Download and verify an artifact into a directory
    Download(DownloadArgs),
    /// Report whether a location is a secure origin
    CheckOrigin(CheckOriginArgs),
}

impl Command {
    pub async fn run(&self, config: Config) -> Result<()> {
        match self {
            Self::Fetch(command) => command.run(config).await,
            Self::Download(command) => command.run(config).await,
            Self::CheckOrigin(command) => command.run(config),
        }
    }
}

/// Options shared by every command that talks to an index.
#[derive(clap::Args, Debug, Default)]
pub struct SessionArgs {
    /// Primary package index
    #[arg(long, value_name = "URL")]
    pub index_url: Option<String>,

    /// Additional package index (repeatable)
    #[arg(long, value_name = "URL")]
    pub extra_index_url: Vec<String>,

    /// Host (or host:port) to trust even without valid HTTPS (repeatable)
    #[arg(long, value_name = "HOST")]
    pub trusted_host: Vec<String>,

    /// Never prompt for credentials
    #[arg(long)]
    pub no_input: bool,

    /// Cache root directory
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

impl SessionArgs {
    /// Overrides the loaded configuration with command-line flags.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(index_url) = &self.index_url {
            config.index_url = Some(index_url.clone());
        }
        config
            .extra_index_urls
            .extend(self.extra_index_url.iter().cloned());
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
        config.no_input |= self.no_input;
        config
    }

    pub fn build_session(&self, config: &Config) -> Result<FetchSession> {
        let prompt: Option<Box<dyn CredentialPrompt>> =
            if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
                Some(Box::new(TerminalPrompt))
            } else {
                None
            };
        let session = FetchSession::new(config, prompt)?;
        for host in &self.trusted_host {
            session.add_trusted_host(host, Some("command line"));
        }
        Ok(session)
    }
}

/// Accepts URLs as well as plain local paths.
pub fn parse_locator(raw: &str) -> Result<Locator> {
    let path = Path::new(raw);
    if path.exists() {
        return Locator::parse(&spf_aio::path::path_to_url(path)?);
    }
    Locator::parse(raw)
}

/// Parses repeated `alg:hex` flags.
pub fn parse_hashes(raw: &[String]) -> Result<Hashes> {
    let pairs = raw
        .iter()
        .map(|pair| Hashes::parse_pair(pair))
        .collect::<Result<Vec<_>>>()?;
    Ok(pairs.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use spf_common::hashes::HashAlgorithm;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_fetch_flags() {
        let args = CliArgs::parse_from([
            "spf",
            "-vv",
            "fetch",
            "https://files.example/pkg-1.0.tar.gz",
            "build",
            "--hash",
            "sha256:abc",
            "--trusted-host",
            "internal.example",
            "--no-input",
        ]);
        assert_eq!(args.verbose, 2);
        let Command::Fetch(fetch) = args.command else {
            panic!("expected fetch");
        };
        assert_eq!(fetch.build_dir, PathBuf::from("build"));
        assert_eq!(fetch.session.trusted_host, vec!["internal.example".to_string()]);
        assert!(fetch.session.no_input);

        let hashes = parse_hashes(&fetch.hashes).unwrap();
        assert!(hashes.allowed(HashAlgorithm::Sha256).unwrap().contains("abc"));
    }

    #[test]
    fn rejects_unknown_hash_algorithm() {
        assert!(parse_hashes(&["crc32:00".to_string()]).is_err());
    }
}
