//! Address-set blocker backed by ipset.
//!
//! A single managed `hash:ip` set is created on first use and loaded with
//! `ipset restore -!`, which applies the whole batch in one transaction and
//! treats already-present members as no-ops. Production traffic never sees
//! a half-updated set.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use feedguard_core::config::DefenseConfig;
use feedguard_core::types::{Indicator, IndicatorKind};

use crate::applier::{ApplyReport, DefenseApplier};
use crate::command::{ensure_success, run_command};
use crate::error::Result;

pub struct IpsetBlocker {
    bin: PathBuf,
    set_name: String,
    timeout: Duration,
}

impl IpsetBlocker {
    pub fn new(config: &DefenseConfig) -> Self {
        Self {
            bin: config.ipset_bin.clone(),
            set_name: config.ipset_set_name.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    /// Blocker with explicit paths (tests point this at a stub binary).
    pub fn with_settings(bin: PathBuf, set_name: String, timeout: Duration) -> Self {
        Self {
            bin,
            set_name,
            timeout,
        }
    }

    /// Create the managed set if it does not exist yet. Idempotent.
    async fn ensure_set(&self) -> Result<()> {
        let list = run_command(&self.bin, &["list", &self.set_name], None, self.timeout).await?;
        if list.status.success() {
            debug!(set = self.set_name.as_str(), "ipset set already exists");
            return Ok(());
        }
        info!(set = self.set_name.as_str(), "creating ipset set");
        let create = run_command(
            &self.bin,
            &["create", &self.set_name, "hash:ip", "timeout", "0"],
            None,
            self.timeout,
        )
        .await?;
        ensure_success("ipset create", &create)
    }
}

/// Render the `ipset restore` payload, one `add` line per address.
pub fn render_restore_payload<'a>(
    set_name: &str,
    ips: impl Iterator<Item = &'a str>,
) -> String {
    let mut payload = String::new();
    for ip in ips {
        let ip = ip.trim();
        if ip.is_empty() {
            continue;
        }
        payload.push_str(&format!("add {set_name} {ip}\n"));
    }
    payload
}

#[async_trait]
impl DefenseApplier for IpsetBlocker {
    fn name(&self) -> &'static str {
        "ipset"
    }

    fn handles(&self, kind: IndicatorKind) -> bool {
        kind == IndicatorKind::Ip
    }

    async fn apply(&self, batch: &BTreeSet<Indicator>) -> Result<ApplyReport> {
        let ips: Vec<&Indicator> = batch
            .iter()
            .filter(|i| i.kind == IndicatorKind::Ip)
            .collect();
        if ips.is_empty() {
            debug!("no addresses routed to ipset this run");
            return Ok(ApplyReport::default());
        }

        self.ensure_set().await?;

        let payload = render_restore_payload(&self.set_name, ips.iter().map(|i| i.value.as_str()));
        let output = run_command(
            &self.bin,
            &["restore", "-!"],
            Some(payload.as_bytes()),
            self.timeout,
        )
        .await?;
        ensure_success("ipset restore", &output)?;

        info!(
            set = self.set_name.as_str(),
            count = ips.len(),
            "blocked addresses via ipset"
        );
        let mut report = ApplyReport::default();
        report.applied.extend(ips.into_iter().cloned());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_payload_has_one_add_line_per_address() {
        let payload =
            render_restore_payload("feedguard_bad_ips", ["203.0.113.7", "198.51.100.23"].into_iter());
        assert_eq!(
            payload,
            "add feedguard_bad_ips 203.0.113.7\nadd feedguard_bad_ips 198.51.100.23\n"
        );
    }

    #[test]
    fn restore_payload_skips_blank_entries() {
        let payload = render_restore_payload("s", ["", "  ", "203.0.113.7"].into_iter());
        assert_eq!(payload, "add s 203.0.113.7\n");
    }
}
