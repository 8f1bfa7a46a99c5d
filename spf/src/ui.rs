//! Terminal elements: progress bars and the credential prompt.

use std::time::Duration;

use dialoguer::{Confirm, Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use spf_common::error::{Result, SpfError};
use spf_net::CredentialPrompt;

/// Creates and configures a default spinner ProgressBar.
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.blue.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Byte progress bar; switches from spinner to bar once the total is known.
pub fn create_download_bar(message: &str) -> ProgressBar {
    let pb = create_spinner(message);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.blue.bold} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> "),
    );
    pb
}

/// Updates `pb` from a downloader progress callback.
pub fn report_progress(pb: &ProgressBar, received: u64, total: Option<u64>) {
    if let Some(total) = total {
        if pb.length() != Some(total) {
            pb.set_length(total);
        }
    }
    pb.set_position(received);
}

fn prompt_error(e: dialoguer::Error) -> SpfError {
    SpfError::Generic(format!("Prompt failed: {e}"))
}

/// Reads credentials from the controlling terminal.
pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn ask_username(&self, netloc: &str) -> Result<String> {
        Input::<String>::new()
            .with_prompt(format!("User for {netloc}"))
            .allow_empty(true)
            .interact_text()
            .map_err(prompt_error)
    }

    fn ask_password(&self) -> Result<String> {
        Password::new()
            .with_prompt("Password")
            .allow_empty_password(true)
            .interact()
            .map_err(prompt_error)
    }

    fn confirm_save(&self) -> Result<bool> {
        Confirm::new()
            .with_prompt("Save credentials to keyring")
            .default(false)
            .interact()
            .map_err(prompt_error)
    }
}
