//! Contains the logic for the `check-origin` command.
use spf_common::config::Config;
use spf_common::error::{Result, SpfError};
use spf_net::OriginTrustPolicy;

use crate::cli::parse_locator;

#[derive(clap::Args, Debug)]
pub struct CheckOriginArgs {
    /// Location to check
    pub locator: String,

    /// Host (or host:port) to trust (repeatable)
    #[arg(long, value_name = "HOST")]
    pub trusted_host: Vec<String>,

    /// List every origin considered secure
    #[arg(long)]
    pub list: bool,
}

impl CheckOriginArgs {
    pub fn run(&self, config: Config) -> Result<()> {
        let policy = OriginTrustPolicy::with_trusted_hosts(&config.trusted_hosts);
        for host in &self.trusted_host {
            policy.add_trusted_host(host, Some("command line"));
        }
        if self.list {
            for origin in policy.iter_secure_origins() {
                println!("{origin}");
            }
        }

        let locator = parse_locator(&self.locator)?;
        if policy.is_secure_locator(&locator) {
            println!("{locator} is a secure origin");
            Ok(())
        } else {
            Err(SpfError::InsecureOrigin(locator.redacted()))
        }
    }
}
