//! Durable state: the indicator ledger and the digest ledger.
//!
//! The indicator store is the only persistence the pipeline requires. It is
//! the deduplication ledger that keeps already-applied indicators from being
//! re-submitted to the defenses, so an unreadable store is a fatal startup
//! error rather than a silent reset.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::types::{Indicator, IndicatorKind, SourceKind};

const STORE_FILE: &str = "indicators.json";
const LEDGER_FILE: &str = "sent_titles.txt";
const STORE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Indicator store
// ---------------------------------------------------------------------------

/// One persisted indicator row. Only `last_seen_at` ever changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIndicator {
    pub kind: IndicatorKind,
    pub value: String,
    pub source_kind: SourceKind,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// On-disk JSON layout.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    indicators: BTreeMap<String, StoredIndicator>,
}

/// The durable set of indicators already applied to the defenses, keyed by
/// `kind:value`.
#[derive(Debug)]
pub struct IndicatorStore {
    path: PathBuf,
    indicators: BTreeMap<String, StoredIndicator>,
}

impl IndicatorStore {
    /// Open the store under `data_dir`. A missing file starts empty; an
    /// unreadable or unparsable file fails fast.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(STORE_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "no indicator store yet, starting empty");
            return Ok(Self {
                path,
                indicators: BTreeMap::new(),
            });
        }

        let corrupt = |detail: String| CoreError::StoreCorrupt {
            path: path.display().to_string(),
            detail,
        };
        let data = std::fs::read_to_string(&path).map_err(|e| corrupt(e.to_string()))?;
        let file: StoreFile =
            serde_json::from_str(&data).map_err(|e| corrupt(e.to_string()))?;
        if file.version != STORE_VERSION {
            return Err(corrupt(format!(
                "unsupported store version {}",
                file.version
            )));
        }

        info!(count = file.indicators.len(), "loaded indicator store");
        Ok(Self {
            path,
            indicators: file.indicators,
        })
    }

    /// Whether this indicator has already been applied to the defenses.
    pub fn is_known(&self, indicator: &Indicator) -> bool {
        self.indicators.contains_key(&indicator.key())
    }

    /// The subset of `indicators` not yet known. Read-only probe; the store
    /// is not mutated.
    pub fn filter_new(&self, indicators: &BTreeSet<Indicator>) -> BTreeSet<Indicator> {
        indicators
            .iter()
            .filter(|i| !self.is_known(i))
            .cloned()
            .collect()
    }

    /// Record an indicator that a defense mechanism confirmed applied.
    ///
    /// Idempotent: a repeat record only refreshes `last_seen_at`. Callers
    /// must not record indicators whose application was not confirmed for
    /// the run's enabled mechanisms.
    pub fn record(&mut self, indicator: &Indicator, now: DateTime<Utc>) {
        self.indicators
            .entry(indicator.key())
            .and_modify(|existing| existing.last_seen_at = now)
            .or_insert_with(|| StoredIndicator {
                kind: indicator.kind,
                value: indicator.value.clone(),
                source_kind: indicator.source_kind,
                first_seen_at: now,
                last_seen_at: now,
            });
    }

    /// Serialize the store back to disk.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = StoreFile {
            version: STORE_VERSION,
            indicators: self.indicators.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        debug!(count = self.indicators.len(), "persisted indicator store");
        Ok(())
    }

    /// Look up a stored row by indicator.
    pub fn get(&self, indicator: &Indicator) -> Option<&StoredIndicator> {
        self.indicators.get(&indicator.key())
    }

    /// Snapshot of every stored indicator, for explicit re-sync.
    pub fn all(&self) -> BTreeSet<Indicator> {
        self.indicators
            .values()
            .map(|row| Indicator::new(row.kind, row.value.clone(), row.source_kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Digest ledger
// ---------------------------------------------------------------------------

/// Titles already delivered in a content digest, one per line on disk.
///
/// Unlike the indicator store this ledger is advisory: losing it means a
/// repeated digest line, not a repeated defense write, so a missing or
/// unreadable file just starts empty.
#[derive(Debug)]
pub struct DigestLedger {
    path: PathBuf,
    titles: BTreeSet<String>,
}

impl DigestLedger {
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(LEDGER_FILE);
        let titles = match std::fs::read_to_string(&path) {
            Ok(data) => data.lines().map(str::to_string).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "digest ledger unreadable, starting empty");
                BTreeSet::new()
            }
        };
        Self { path, titles }
    }

    pub fn contains(&self, title: &str) -> bool {
        self.titles.contains(title)
    }

    /// Append newly delivered titles to the ledger file.
    pub fn append<I>(&mut self, titles: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        use std::io::Write;

        let fresh: Vec<String> = titles
            .into_iter()
            .filter(|t| !t.is_empty() && self.titles.insert(t.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for title in &fresh {
            writeln!(file, "{title}")?;
        }
        debug!(count = fresh.len(), "digest ledger updated");
        Ok(())
    }
}
