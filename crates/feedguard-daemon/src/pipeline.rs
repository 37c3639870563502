//! The per-run pipeline: fetch → extract → filter → apply → report.
//!
//! Source fetches run concurrently with bounded retry; everything after the
//! fetch stage is sequential. The indicator store is touched only inside a
//! run-scoped exclusive section, and an indicator is recorded only once a
//! mechanism confirmed it applied — persistence follows defensive effect,
//! not extraction.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use feedguard_core::digest;
use feedguard_core::extract::IocExtractor;
use feedguard_core::retry::{retry_with_backoff, RetryPolicy};
use feedguard_core::store::{DigestLedger, IndicatorStore};
use feedguard_core::types::{
    Audience, ContentItem, Indicator, RunKind, RunResult, SourceKind,
};
use feedguard_defense::DefenseApplier;
use feedguard_sources::SourceProvider;

use crate::mailer::Mailer;

/// A provider paired with its configured fetch budget.
#[derive(Clone)]
pub struct ProviderSlot {
    pub provider: Arc<dyn SourceProvider>,
    pub limit: usize,
}

impl ProviderSlot {
    pub fn new(provider: Arc<dyn SourceProvider>, limit: usize) -> Self {
        Self { provider, limit }
    }
}

/// The assembled pipeline shared by both timelines.
pub struct Pipeline {
    digest_providers: Vec<ProviderSlot>,
    ioc_providers: Vec<ProviderSlot>,
    appliers: Vec<Arc<dyn DefenseApplier>>,
    extractor: IocExtractor,
    store: Mutex<IndicatorStore>,
    ledger: Mutex<DigestLedger>,
    mailer: Arc<dyn Mailer>,
    retry: RetryPolicy,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        digest_providers: Vec<ProviderSlot>,
        ioc_providers: Vec<ProviderSlot>,
        appliers: Vec<Arc<dyn DefenseApplier>>,
        extractor: IocExtractor,
        store: IndicatorStore,
        ledger: DigestLedger,
        mailer: Arc<dyn Mailer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            digest_providers,
            ioc_providers,
            appliers,
            extractor,
            store: Mutex::new(store),
            ledger: Mutex::new(ledger),
            mailer,
            retry,
        }
    }

    // -----------------------------------------------------------------
    // Digest timeline
    // -----------------------------------------------------------------

    /// One content-digest run: fetch news and advisories, drop titles the
    /// ledger already delivered, mail both audiences.
    pub async fn run_digest(&self) -> Result<RunResult> {
        let mut result = RunResult::new(RunKind::Digest, Utc::now());
        let date = Local::now().date_naive();

        let fetched = self.fetch_all(&self.digest_providers, &mut result).await;

        let (news, advisories) = {
            let ledger = self.ledger.lock().await;
            let mut news = Vec::new();
            let mut advisories = Vec::new();
            for item in fetched {
                if ledger.contains(&item.title) {
                    continue;
                }
                match item.source_kind {
                    SourceKind::Advisory => advisories.push(item),
                    _ => news.push(item),
                }
            }
            (news, advisories)
        };
        result.items_fetched = news.len() + advisories.len();

        let news_body = digest::render_news(&news, date, &result.errors);
        self.deliver(Audience::Customer, digest::news_subject(date), &news_body, &mut result)
            .await;
        self.deliver(Audience::Team, digest::news_subject(date), &news_body, &mut result)
            .await;

        if !advisories.is_empty() {
            let advisory_body = digest::render_advisories(&advisories, date, &result.errors);
            self.deliver(
                Audience::Customer,
                digest::advisory_subject(date),
                &advisory_body,
                &mut result,
            )
            .await;
            self.deliver(
                Audience::Team,
                digest::advisory_subject(date),
                &advisory_body,
                &mut result,
            )
            .await;
        }

        {
            let mut ledger = self.ledger.lock().await;
            let titles = news
                .iter()
                .chain(&advisories)
                .map(|item| item.title.clone());
            if let Err(error) = ledger.append(titles) {
                warn!(error = %error, "digest ledger update failed");
            }
        }

        info!(
            fetched = result.items_fetched,
            degraded = result.errors.len(),
            "digest run finished"
        );
        Ok(result)
    }

    // -----------------------------------------------------------------
    // IOC timeline
    // -----------------------------------------------------------------

    /// One IOC/defense run: fetch the threat blog, extract indicators,
    /// filter against the store, apply the novel subset, record successes,
    /// mail the team report.
    pub async fn run_ioc(&self) -> Result<RunResult> {
        let mut result = RunResult::new(RunKind::Ioc, Utc::now());
        let date = Local::now().date_naive();

        let items = self.fetch_all(&self.ioc_providers, &mut result).await;
        result.items_fetched = items.len();

        let indicators = self.extractor.extract(&items);

        // Run-scoped exclusive section: no other run reads or writes the
        // store while this run filters, applies, and records.
        let mut store = self.store.lock().await;
        let fresh = store.filter_new(&indicators);
        result.indicators_new = fresh.len();
        info!(
            extracted = indicators.len(),
            new = fresh.len(),
            "filtered indicators against the store"
        );

        let confirmed = self.apply_all(&fresh, &mut result).await;
        let now = Utc::now();
        for indicator in &confirmed {
            store.record(indicator, now);
        }
        if !confirmed.is_empty() {
            store.persist().context("persisting indicator store")?;
        }
        result.indicators_applied = confirmed.len();
        result.indicators_failed = fresh.len() - confirmed.len();
        drop(store);

        let fresh_sorted: Vec<Indicator> = fresh.iter().cloned().collect();
        let body = digest::render_iocs(&fresh_sorted, &result, date);
        self.deliver(Audience::Team, digest::ioc_subject(date), &body, &mut result)
            .await;

        info!(
            fetched = result.items_fetched,
            new = result.indicators_new,
            applied = result.indicators_applied,
            failed = result.indicators_failed,
            degraded = result.errors.len(),
            "ioc run finished"
        );
        Ok(result)
    }

    /// Re-apply every stored indicator to the enabled mechanisms. The store
    /// is not modified; this is the explicit re-sync escape hatch.
    pub async fn resync(&self) -> Result<()> {
        let store = self.store.lock().await;
        let all = store.all();
        info!(count = all.len(), "re-applying stored indicators");

        for applier in &self.appliers {
            let batch: BTreeSet<Indicator> = all
                .iter()
                .filter(|i| applier.handles(i.kind))
                .cloned()
                .collect();
            if batch.is_empty() {
                continue;
            }
            match applier.apply(&batch).await {
                Ok(report) => info!(
                    mechanism = applier.name(),
                    applied = report.applied.len(),
                    failed = report.failed.len(),
                    "re-sync batch finished"
                ),
                Err(error) => warn!(
                    mechanism = applier.name(),
                    error = %error,
                    "re-sync batch failed"
                ),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------

    /// Fetch every configured source concurrently with bounded retry.
    /// Per-source failures degrade the run instead of aborting it.
    async fn fetch_all(
        &self,
        providers: &[ProviderSlot],
        result: &mut RunResult,
    ) -> Vec<ContentItem> {
        let mut handles = Vec::with_capacity(providers.len());
        for slot in providers {
            let provider = Arc::clone(&slot.provider);
            let limit = slot.limit;
            let policy = self.retry;
            handles.push(tokio::spawn(async move {
                let kind = provider.kind();
                let outcome =
                    retry_with_backoff(policy, &kind.to_string(), || provider.fetch(limit)).await;
                (kind, outcome)
            }));
        }

        let mut items = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((kind, Ok(fetched))) => {
                    info!(source = %kind, count = fetched.len(), "source fetched");
                    items.extend(fetched);
                }
                Ok((kind, Err(error))) => {
                    warn!(source = %kind, error = %error, "source failed, continuing without it");
                    result.push_error(kind.to_string(), error.to_string());
                }
                Err(join_error) => {
                    warn!(error = %join_error, "fetch task panicked");
                    result.push_error("fetch", join_error.to_string());
                }
            }
        }
        items
    }

    /// Route the fresh indicators to every enabled mechanism and apply.
    ///
    /// Returns the set eligible for recording: applied by at least one
    /// mechanism and failed by none, so a half-applied indicator retries on
    /// the next run.
    async fn apply_all(
        &self,
        fresh: &BTreeSet<Indicator>,
        result: &mut RunResult,
    ) -> BTreeSet<Indicator> {
        let mut applied: BTreeSet<Indicator> = BTreeSet::new();
        let mut failed: BTreeSet<Indicator> = BTreeSet::new();

        for applier in &self.appliers {
            let batch: BTreeSet<Indicator> = fresh
                .iter()
                .filter(|i| applier.handles(i.kind))
                .cloned()
                .collect();
            if batch.is_empty() {
                continue;
            }
            match applier.apply(&batch).await {
                Ok(report) => {
                    for (indicator, reason) in &report.failed {
                        warn!(
                            mechanism = applier.name(),
                            indicator = %indicator,
                            reason = reason.as_str(),
                            "indicator not applied"
                        );
                        failed.insert(indicator.clone());
                    }
                    if !report.failed.is_empty() {
                        result.push_error(
                            applier.name(),
                            format!("{} indicator(s) not applied", report.failed.len()),
                        );
                    }
                    applied.extend(report.applied);
                }
                Err(error) => {
                    warn!(
                        mechanism = applier.name(),
                        error = %error,
                        "mechanism unavailable, batch skipped"
                    );
                    result.push_error(applier.name(), error.to_string());
                    failed.extend(batch);
                }
            }
        }

        applied.retain(|indicator| !failed.contains(indicator));
        applied
    }

    async fn deliver(
        &self,
        audience: Audience,
        subject: String,
        body: &str,
        result: &mut RunResult,
    ) {
        if let Err(error) = self.mailer.send(audience, &subject, body).await {
            warn!(audience = %audience, error = %error, "digest delivery failed");
            result.push_error(format!("mail:{audience}"), error.to_string());
        }
    }
}
