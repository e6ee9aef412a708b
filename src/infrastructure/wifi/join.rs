//! Joining the camera's access point
//!
//! The platform join API is reached through the [`WifiJoiner`] seam. The
//! shipped joiner drives `nmcli` on Linux and `networksetup` on macOS.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Result of one join attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyAssociated,
    Denied,
    NotFound,
    InvalidPassphrase,
    Failed(String),
}

impl JoinOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Joined | Self::AlreadyAssociated)
    }
}

#[async_trait]
pub trait WifiJoiner: Send + Sync {
    /// SSID the WiFi interface is currently associated with
    async fn current_ssid(&self) -> Option<String>;

    async fn join(&self, ssid: &str, passphrase: Option<&str>) -> JoinOutcome;
}

/// Peripheral-derived names first, then the configured list; empty and
/// repeated names are dropped
pub fn candidate_ssids<'a>(
    discovered: impl IntoIterator<Item = &'a str>,
    configured: &'a [String],
) -> Vec<String> {
    let mut seen = HashSet::new();
    discovered
        .into_iter()
        .chain(configured.iter().map(String::as_str))
        .map(str::trim)
        .filter(|ssid| !ssid.is_empty())
        .filter(|ssid| seen.insert(ssid.to_string()))
        .map(str::to_string)
        .collect()
}

/// Try `candidates` strictly in order, one at a time, until one joins.
///
/// `on_attempt` sees every outcome, successful or not.
pub async fn join_first<J: WifiJoiner + ?Sized>(
    joiner: &J,
    candidates: &[String],
    passphrase: Option<&str>,
    mut on_attempt: impl FnMut(&str, &JoinOutcome),
) -> Option<String> {
    for ssid in candidates {
        let outcome = joiner.join(ssid, passphrase).await;
        on_attempt(ssid, &outcome);
        if outcome.is_success() {
            return Some(ssid.clone());
        }
    }
    None
}

/// Joins networks through the platform's command line tools
pub struct CommandLineJoiner {
    interface: String,
}

impl CommandLineJoiner {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    async fn output(program: &str, args: &[&str]) -> Option<std::process::Output> {
        match Command::new(program).args(args).output().await {
            Ok(output) => Some(output),
            Err(e) => {
                warn!("Failed to run {}: {}", program, e);
                None
            }
        }
    }
}

#[async_trait]
impl WifiJoiner for CommandLineJoiner {
    async fn current_ssid(&self) -> Option<String> {
        if cfg!(target_os = "macos") {
            let output =
                Self::output("networksetup", &["-getairportnetwork", &self.interface]).await?;
            parse_airport_network(&String::from_utf8_lossy(&output.stdout))
        } else {
            let output = Self::output("nmcli", &["-t", "-f", "active,ssid", "dev", "wifi"]).await?;
            parse_nmcli_active(&String::from_utf8_lossy(&output.stdout))
        }
    }

    async fn join(&self, ssid: &str, passphrase: Option<&str>) -> JoinOutcome {
        info!("Joining WiFi network {}", ssid);

        let mut args: Vec<&str> = Vec::new();
        let program = if cfg!(target_os = "macos") {
            args.extend(["-setairportnetwork", self.interface.as_str(), ssid]);
            if let Some(passphrase) = passphrase {
                args.push(passphrase);
            }
            "networksetup"
        } else {
            args.extend(["dev", "wifi", "connect", ssid]);
            if let Some(passphrase) = passphrase {
                args.extend(["password", passphrase]);
            }
            args.extend(["ifname", self.interface.as_str()]);
            "nmcli"
        };

        let Some(output) = Self::output(program, &args).await else {
            return JoinOutcome::Failed(format!("{} is not available", program));
        };

        let outcome = classify_join_output(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        );
        debug!("Join {} -> {:?}", ssid, outcome);
        outcome
    }
}

/// Active SSID from `nmcli -t -f active,ssid dev wifi`
pub fn parse_nmcli_active(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("yes:"))
        .map(|ssid| ssid.replace("\\:", ":"))
        .filter(|ssid| !ssid.is_empty())
}

/// Current SSID from `networksetup -getairportnetwork <if>`
pub fn parse_airport_network(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("Current Wi-Fi Network: "))
        .map(|ssid| ssid.trim().to_string())
        .filter(|ssid| !ssid.is_empty())
}

/// Map the tool's exit status and output to an outcome.
///
/// `networksetup` exits 0 even when the join fails, so the text decides.
pub fn classify_join_output(success: bool, stdout: &str, stderr: &str) -> JoinOutcome {
    let text = format!("{} {}", stdout.trim(), stderr.trim());
    let lower = text.to_lowercase();

    if lower.contains("already") && lower.contains("connect") {
        JoinOutcome::AlreadyAssociated
    } else if lower.contains("could not find") || lower.contains("no network with ssid") {
        JoinOutcome::NotFound
    } else if lower.contains("secrets were required")
        || lower.contains("invalid password")
        || lower.contains("passphrase")
    {
        JoinOutcome::InvalidPassphrase
    } else if lower.contains("not authorized") || lower.contains("permission denied") {
        JoinOutcome::Denied
    } else if !success || lower.contains("failed") || lower.contains("error") {
        JoinOutcome::Failed(text.trim().to_string())
    } else {
        JoinOutcome::Joined
    }
}
