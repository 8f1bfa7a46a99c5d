//! Contains the logic for the `fetch` command.
use std::path::PathBuf;

use colored::Colorize;
use spf_common::config::Config;
use spf_common::error::Result;
use spf_core::{ArchiveMaterializer, Materialized};

use crate::cli::{parse_hashes, parse_locator, SessionArgs};
use crate::ui;

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// URL, file: URL or local path of the source
    pub locator: String,

    /// Directory to populate
    pub build_dir: PathBuf,

    /// Keep a copy of the fetched source here
    #[arg(long, value_name = "DIR")]
    pub download_dir: Option<PathBuf>,

    /// Accepted digest as ALG:HEX (repeatable)
    #[arg(long = "hash", value_name = "ALG:HEX")]
    pub hashes: Vec<String>,

    #[command(flatten)]
    pub session: SessionArgs,
}

impl FetchArgs {
    pub async fn run(&self, config: Config) -> Result<()> {
        let config = self.session.apply(config);
        let session = self.session.build_session(&config)?;
        let locator = parse_locator(&self.locator)?;
        let hashes = parse_hashes(&self.hashes)?;
        tracing::debug!("Fetching {} into {}", locator, self.build_dir.display());

        let bar = ui::create_download_bar(&format!("Fetching {locator}"));
        let report = |received: u64, total: Option<u64>| ui::report_progress(&bar, received, total);
        let result = ArchiveMaterializer::new(&session)
            .with_progress(&report)
            .unpack_url(
                &locator,
                &self.build_dir,
                self.download_dir.as_deref(),
                Some(&hashes),
            )
            .await;
        bar.finish_and_clear();

        let saved = match result? {
            Materialized::Directory { saved } => saved,
            Materialized::Archive { saved, .. } => saved,
        };
        println!(
            "{} {}",
            "==>".bold().blue(),
            format!("Prepared {}", self.build_dir.display()).bold()
        );
        if let Some(saved) = saved {
            println!("Saved {}", saved.display());
        }
        Ok(())
    }
}
