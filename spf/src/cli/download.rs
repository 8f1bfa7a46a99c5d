//! Contains the logic for the `download` command.
use std::path::PathBuf;

use spf_aio::checksum::verify_file_hashes_async;
use spf_aio::path::url_to_path;
use spf_common::config::Config;
use spf_common::error::{Result, SpfError};
use spf_net::{save_to_download_dir, HashVerifiedDownloader};

use crate::cli::{parse_hashes, parse_locator, SessionArgs};
use crate::ui;

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// URL, file: URL or local path of the artifact
    pub locator: String,

    /// Destination directory; a same-named file there is replaced
    pub dir: PathBuf,

    /// Accepted digest as ALG:HEX (repeatable)
    #[arg(long = "hash", value_name = "ALG:HEX")]
    pub hashes: Vec<String>,

    #[command(flatten)]
    pub session: SessionArgs,
}

impl DownloadArgs {
    pub async fn run(&self, config: Config) -> Result<()> {
        let config = self.session.apply(config);
        let locator = parse_locator(&self.locator)?;
        let hashes = locator.hashes().merge(&parse_hashes(&self.hashes)?);

        let saved = if locator.is_file() {
            let source = url_to_path(locator.url_without_fragment())?;
            verify_file_hashes_async(&source, &hashes).await?;
            save_to_download_dir(&source, &self.dir)?
        } else if locator.is_http() {
            let session = self.session.build_session(&config)?;
            let bar = ui::create_download_bar(&format!("Downloading {locator}"));
            let report =
                |received: u64, total: Option<u64>| ui::report_progress(&bar, received, total);
            let result = HashVerifiedDownloader::new(&session)
                .download(&locator, &self.dir, &hashes, Some(&report))
                .await;
            bar.finish_and_clear();
            result?.path
        } else {
            return Err(SpfError::UnsupportedLocator(locator.redacted()));
        };
        println!("Saved {}", saved.display());
        Ok(())
    }
}
