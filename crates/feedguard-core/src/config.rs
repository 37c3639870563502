//! Application settings: TOML configuration with environment overrides.
//!
//! Configuration is loaded once at startup and handed to the pipeline as an
//! immutable snapshot. Override priority for the scheduling and data-dir
//! fields: environment variable > config file > built-in default.

use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Top-level Feedguard configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedguardConfig {
    /// Directory holding the indicator store and the digest ledger.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub defense: DefenseConfig,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub extract: ExtractConfig,
}

/// Trigger times for the two independent timelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Daily content-digest trigger times, "HH:MM" in local time.
    #[serde(default = "default_cron_times")]
    pub cron_times: Vec<String>,

    /// The single daily IOC/defense trigger time, "HH:MM" in local time.
    #[serde(default = "default_ioc_time")]
    pub ioc_time: String,

    /// Seconds between trigger-loop ticks.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

/// Per-source fetch budgets and network discipline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Max news headlines per run (providers clamp to 1..=50).
    #[serde(default = "default_news_limit")]
    pub news_limit: usize,

    /// Max advisories per run (providers clamp to 1..=50).
    #[serde(default = "default_advisory_limit")]
    pub advisory_limit: usize,

    /// Recent threat-blog posts scanned for IOCs per run (clamped 1..=20).
    #[serde(default = "default_blog_post_limit")]
    pub blog_post_limit: usize,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Total attempts per source for transient failures.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

/// Defense mechanism toggles and command plumbing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenseConfig {
    /// Enable the ipset address-set blocker.
    #[serde(default = "default_true")]
    pub enable_ipset: bool,

    /// Enable the Suricata rule-set updater.
    #[serde(default)]
    pub enable_suricata: bool,

    #[serde(default = "default_ipset_bin")]
    pub ipset_bin: PathBuf,

    /// Name of the managed `hash:ip` set.
    #[serde(default = "default_ipset_set_name")]
    pub ipset_set_name: String,

    #[serde(default = "default_suricata_bin")]
    pub suricata_bin: PathBuf,

    /// The managed rules file Feedguard appends drop rules to.
    #[serde(default = "default_suricata_rules_path")]
    pub suricata_rules_path: PathBuf,

    #[serde(default = "default_suricata_config_path")]
    pub suricata_config_path: PathBuf,

    /// PID file used for the USR2 reload fallback.
    #[serde(default = "default_suricata_pid_file")]
    pub suricata_pid_file: PathBuf,

    /// Also route ip indicators to the rule-set updater.
    #[serde(default)]
    pub suricata_block_ips: bool,

    /// Timeout for each spawned mechanism command, in seconds.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Outbound SMTP settings and recipient lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// When disabled, digests are logged instead of mailed.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    /// SMTPS (implicit TLS) port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Sender address, also the SMTP username.
    #[serde(default)]
    pub smtp_user: String,

    /// App password; usually injected via FEEDGUARD_SMTP_PASSWORD.
    #[serde(default)]
    pub smtp_password: String,

    /// Operations-team recipients.
    #[serde(default)]
    pub team_to: Vec<String>,

    /// Customer-facing recipients.
    #[serde(default)]
    pub customer_to: Vec<String>,

    /// Timeout for one SMTP delivery, in seconds.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

/// Extraction policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Hosts never reported as malicious URL indicators (vendor domains,
    /// documentation hosts that show up in article boilerplate).
    #[serde(default = "default_allow_hosts")]
    pub allow_hosts: Vec<String>,
}

// --- Default value functions ---

fn default_data_dir() -> PathBuf {
    dirs_fallback(".local/share/feedguard")
}

fn default_cron_times() -> Vec<String> {
    vec!["06:00".to_string()]
}

fn default_ioc_time() -> String {
    "06:00".to_string()
}

fn default_tick_secs() -> u64 {
    30
}

fn default_news_limit() -> usize {
    10
}

fn default_advisory_limit() -> usize {
    10
}

fn default_blog_post_limit() -> usize {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_ipset_bin() -> PathBuf {
    PathBuf::from("/sbin/ipset")
}

fn default_ipset_set_name() -> String {
    "feedguard_bad_ips".to_string()
}

fn default_suricata_bin() -> PathBuf {
    PathBuf::from("/usr/bin/suricata")
}

fn default_suricata_rules_path() -> PathBuf {
    PathBuf::from("/etc/suricata/rules/feedguard.rules")
}

fn default_suricata_config_path() -> PathBuf {
    PathBuf::from("/etc/suricata/suricata.yaml")
}

fn default_suricata_pid_file() -> PathBuf {
    PathBuf::from("/var/run/suricata.pid")
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_allow_hosts() -> Vec<String> {
    [
        "ahnlab.com",
        "asec.ahnlab.com",
        "boannews.com",
        "krcert.or.kr",
        "attack.mitre.org",
        "virustotal.com",
        "github.com",
        "wikipedia.org",
        "example.com",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_true() -> bool {
    true
}

/// Resolve a path relative to the user's home directory.
fn dirs_fallback(relative: &str) -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(relative)
    } else {
        PathBuf::from("/tmp").join(relative)
    }
}

// --- Trait impls ---

impl Default for FeedguardConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            schedule: ScheduleConfig::default(),
            sources: SourcesConfig::default(),
            defense: DefenseConfig::default(),
            mail: MailConfig::default(),
            extract: ExtractConfig::default(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron_times: default_cron_times(),
            ioc_time: default_ioc_time(),
            tick_secs: default_tick_secs(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            news_limit: default_news_limit(),
            advisory_limit: default_advisory_limit(),
            blog_post_limit: default_blog_post_limit(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            enable_ipset: true,
            enable_suricata: false,
            ipset_bin: default_ipset_bin(),
            ipset_set_name: default_ipset_set_name(),
            suricata_bin: default_suricata_bin(),
            suricata_rules_path: default_suricata_rules_path(),
            suricata_config_path: default_suricata_config_path(),
            suricata_pid_file: default_suricata_pid_file(),
            suricata_block_ips: false,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            smtp_user: String::new(),
            smtp_password: String::new(),
            team_to: Vec::new(),
            customer_to: Vec::new(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            allow_hosts: default_allow_hosts(),
        }
    }
}

// --- Loading and validation ---

impl FeedguardConfig {
    /// Load configuration from a TOML file, apply environment overrides,
    /// and validate. A missing file yields the defaults; an invalid file
    /// or an invalid value is a fatal startup error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents).map_err(|e| {
                CoreError::Config(format!("failed to parse {}: {e}", path.display()))
            })?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("FEEDGUARD_CRON_TIME") {
            let times: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            if !times.is_empty() {
                self.schedule.cron_times = times;
            }
        }
        if let Ok(raw) = std::env::var("FEEDGUARD_IOC_TIME") {
            if !raw.trim().is_empty() {
                self.schedule.ioc_time = raw.trim().to_string();
            }
        }
        if let Ok(raw) = std::env::var("FEEDGUARD_DATA_DIR") {
            if !raw.trim().is_empty() {
                self.data_dir = PathBuf::from(raw.trim());
            }
        }
        if let Ok(raw) = std::env::var("FEEDGUARD_SMTP_PASSWORD") {
            if !raw.is_empty() {
                self.mail.smtp_password = raw;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.schedule.cron_times.is_empty() {
            return Err(CoreError::Config(
                "schedule.cron_times must list at least one HH:MM time".into(),
            ));
        }
        for raw in &self.schedule.cron_times {
            parse_hhmm(raw)?;
        }
        parse_hhmm(&self.schedule.ioc_time)?;
        if self.schedule.tick_secs == 0 {
            return Err(CoreError::Config("schedule.tick_secs must be non-zero".into()));
        }
        if self.mail.enabled {
            if self.mail.smtp_user.is_empty() {
                return Err(CoreError::Config(
                    "mail.smtp_user is required when mail is enabled".into(),
                ));
            }
            if self.mail.team_to.is_empty() && self.mail.customer_to.is_empty() {
                return Err(CoreError::Config(
                    "mail is enabled but no recipients are configured".into(),
                ));
            }
            for addr in self.mail.team_to.iter().chain(&self.mail.customer_to) {
                if !addr.contains('@') {
                    return Err(CoreError::Config(format!(
                        "recipient '{addr}' is not a mail address"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl ScheduleConfig {
    /// Digest trigger times, parsed.
    pub fn digest_times(&self) -> Result<Vec<NaiveTime>> {
        self.cron_times.iter().map(|raw| parse_hhmm(raw)).collect()
    }

    /// The IOC trigger time, parsed.
    pub fn ioc_trigger_time(&self) -> Result<NaiveTime> {
        parse_hhmm(&self.ioc_time)
    }
}

/// Parse a "HH:MM" local time.
pub fn parse_hhmm(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| CoreError::Config(format!("'{raw}' is not a valid HH:MM time")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FeedguardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sources.news_limit, 10);
        assert_eq!(config.schedule.cron_times, vec!["06:00"]);
        assert!(config.defense.enable_ipset);
        assert!(!config.defense.enable_suricata);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_str = r#"
[schedule]
cron_times = ["07:30", "18:00"]
ioc_time = "07:30"

[defense]
enable_suricata = true
"#;
        let config: FeedguardConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.schedule.cron_times.len(), 2);
        assert!(config.defense.enable_suricata);
        assert!(config.defense.enable_ipset);
        assert_eq!(config.sources.blog_post_limit, 5);
    }

    #[test]
    fn rejects_bad_trigger_time() {
        let mut config = FeedguardConfig::default();
        config.schedule.ioc_time = "25:99".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_enabled_mail_without_sender() {
        let mut config = FeedguardConfig::default();
        config.mail.enabled = true;
        config.mail.team_to = vec!["ops@example.com".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_recipient_without_at_sign() {
        let mut config = FeedguardConfig::default();
        config.mail.enabled = true;
        config.mail.smtp_user = "bot@example.com".into();
        config.mail.team_to = vec!["not-an-address".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_hhmm_accepts_leading_zero() {
        assert!(parse_hhmm("06:00").is_ok());
        assert!(parse_hhmm("23:59").is_ok());
        assert!(parse_hhmm("6 am").is_err());
    }
}
