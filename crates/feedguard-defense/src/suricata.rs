//! Rule-set updater that writes and hot-reloads a Suricata rules file.
//!
//! New indicators become drop rules appended to a managed rules file;
//! indicators already present in the file count as applied without a
//! rewrite. After a write the ruleset is reloaded: configuration test
//! first, then `suricatasc reload-rules`, falling back to a USR2 signal.
//! If the reload fails the appended rules are rolled back so the file
//! keeps matching the live state and the batch retries next run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use feedguard_core::config::DefenseConfig;
use feedguard_core::types::{Indicator, IndicatorKind};

use crate::applier::{ApplyReport, DefenseApplier};
use crate::command::{ensure_success, run_command};
use crate::error::{DefenseError, Result};
use crate::rules::{render_rule, ExistingRules};

pub struct SuricataRuleset {
    bin: PathBuf,
    suricatasc_bin: PathBuf,
    rules_path: PathBuf,
    config_path: PathBuf,
    pid_file: PathBuf,
    block_ips: bool,
    timeout: Duration,
}

impl SuricataRuleset {
    pub fn new(config: &DefenseConfig) -> Self {
        Self {
            bin: config.suricata_bin.clone(),
            suricatasc_bin: PathBuf::from("suricatasc"),
            rules_path: config.suricata_rules_path.clone(),
            config_path: config.suricata_config_path.clone(),
            pid_file: config.suricata_pid_file.clone(),
            block_ips: config.suricata_block_ips,
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    /// Updater with explicit paths (tests point these at stub binaries and
    /// a tempdir rules file).
    #[allow(clippy::too_many_arguments)]
    pub fn with_paths(
        bin: PathBuf,
        suricatasc_bin: PathBuf,
        rules_path: PathBuf,
        config_path: PathBuf,
        pid_file: PathBuf,
        block_ips: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            bin,
            suricatasc_bin,
            rules_path,
            config_path,
            pid_file,
            block_ips,
            timeout,
        }
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    fn read_rules_file(&self) -> Result<String> {
        match std::fs::read_to_string(&self.rules_path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(DefenseError::Io(e)),
        }
    }

    fn write_rules_file(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.rules_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.rules_path, content)?;
        Ok(())
    }

    /// Reload ladder: test the configuration, ask suricatasc, fall back to
    /// signalling the running process.
    async fn reload(&self) -> Result<()> {
        let config = self.config_path.display().to_string();
        let test = run_command(&self.bin, &["-T", "-c", &config], None, self.timeout).await?;
        ensure_success("suricata -T", &test)?;
        debug!("suricata configuration test passed");

        match run_command(&self.suricatasc_bin, &["reload-rules"], None, self.timeout).await {
            Ok(output) if output.status.success() => {
                info!("suricata rules reloaded via suricatasc");
                Ok(())
            }
            Ok(output) => {
                warn!(
                    status = %output.status,
                    "suricatasc reload failed, falling back to USR2"
                );
                self.signal_reload().await
            }
            Err(DefenseError::BinaryMissing { .. }) => self.signal_reload().await,
            Err(error) => Err(error),
        }
    }

    async fn signal_reload(&self) -> Result<()> {
        let pid = std::fs::read_to_string(&self.pid_file).map_err(|e| {
            DefenseError::CommandFailed {
                command: "suricata reload".into(),
                status: "pid file unreadable".into(),
                stderr: format!("{}: {e}", self.pid_file.display()),
            }
        })?;
        let pid = pid.trim().to_string();
        let output =
            run_command(Path::new("kill"), &["-USR2", &pid], None, self.timeout).await?;
        ensure_success("kill -USR2", &output)?;
        info!(pid = pid.as_str(), "sent USR2 reload signal to suricata");
        Ok(())
    }
}

#[async_trait]
impl DefenseApplier for SuricataRuleset {
    fn name(&self) -> &'static str {
        "suricata"
    }

    fn handles(&self, kind: IndicatorKind) -> bool {
        match kind {
            IndicatorKind::Hash | IndicatorKind::Url => true,
            IndicatorKind::Ip => self.block_ips,
        }
    }

    async fn apply(&self, batch: &BTreeSet<Indicator>) -> Result<ApplyReport> {
        let routed: Vec<&Indicator> = batch.iter().filter(|i| self.handles(i.kind)).collect();
        let mut report = ApplyReport::default();
        if routed.is_empty() {
            debug!("no indicators routed to suricata this run");
            return Ok(report);
        }

        let original = self.read_rules_file()?;
        let mut existing = ExistingRules::parse(&original);

        let mut fresh: Vec<(&Indicator, String)> = Vec::new();
        for indicator in routed {
            if existing.contains(indicator) {
                // Already in the live ruleset: idempotent no-op.
                report.applied.insert(indicator.clone());
                continue;
            }
            match render_rule(indicator, existing.next_sid(indicator.kind)) {
                Some(rule) => fresh.push((indicator, rule)),
                None => {
                    report.failed.insert(
                        indicator.clone(),
                        "no host/uri could be derived from the value".into(),
                    );
                }
            }
        }

        if fresh.is_empty() {
            return Ok(report);
        }

        let mut updated = original.clone();
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        for (_, rule) in &fresh {
            updated.push_str(rule);
            updated.push('\n');
        }
        self.write_rules_file(&updated)?;
        info!(
            count = fresh.len(),
            path = %self.rules_path.display(),
            "appended suricata drop rules"
        );

        match self.reload().await {
            Ok(()) => {
                report
                    .applied
                    .extend(fresh.into_iter().map(|(i, _)| i.clone()));
            }
            Err(error) => {
                warn!(error = %error, "suricata reload failed, rolling back appended rules");
                // Keep the file in step with the live ruleset so the batch
                // retries cleanly next run.
                if let Err(restore_error) = self.write_rules_file(&original) {
                    warn!(error = %restore_error, "rules-file rollback failed");
                }
                let reason = error.to_string();
                for (indicator, _) in fresh {
                    report.failed.insert(indicator.clone(), reason.clone());
                }
            }
        }

        Ok(report)
    }
}
