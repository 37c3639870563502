//! Feedguard daemon orchestration.
//!
//! [`Daemon`] wires the source providers, IOC extractor, indicator store,
//! defense appliers, digest composer, and mailer into the two scheduled
//! timelines, and owns the trigger loop with its shutdown discipline.

pub mod mailer;
pub mod pipeline;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use feedguard_core::config::FeedguardConfig;
use feedguard_core::extract::IocExtractor;
use feedguard_core::retry::RetryPolicy;
use feedguard_core::store::{DigestLedger, IndicatorStore};
use feedguard_core::types::RunResult;
use feedguard_defense::{DefenseApplier, IpsetBlocker, SuricataRuleset};
use feedguard_sources::{AdvisoryProvider, NewsProvider, SourceProvider, ThreatBlogProvider};

use crate::mailer::{LogMailer, Mailer, SmtpMailer};
use crate::pipeline::{Pipeline, ProviderSlot};
use crate::scheduler::Timeline;

/// The assembled daemon.
pub struct Daemon {
    config: FeedguardConfig,
    pipeline: Arc<Pipeline>,
}

impl Daemon {
    /// Build every collaborator from the configuration snapshot. Store
    /// corruption and invalid mail settings surface here and abort startup.
    pub fn new(config: FeedguardConfig) -> Result<Self> {
        let store =
            IndicatorStore::open(&config.data_dir).context("opening indicator store")?;
        let ledger = DigestLedger::open(&config.data_dir);

        let fetch_timeout = Duration::from_secs(config.sources.fetch_timeout_secs);
        let news = NewsProvider::new(fetch_timeout).context("building news provider")?;
        let advisory =
            AdvisoryProvider::new(fetch_timeout).context("building advisory provider")?;
        let threat_blog =
            ThreatBlogProvider::new(fetch_timeout).context("building threat-blog provider")?;

        let digest_providers = vec![
            ProviderSlot::new(Arc::new(news) as Arc<dyn SourceProvider>, config.sources.news_limit),
            ProviderSlot::new(
                Arc::new(advisory) as Arc<dyn SourceProvider>,
                config.sources.advisory_limit,
            ),
        ];
        let ioc_providers = vec![ProviderSlot::new(
            Arc::new(threat_blog) as Arc<dyn SourceProvider>,
            config.sources.blog_post_limit,
        )];

        let mut appliers: Vec<Arc<dyn DefenseApplier>> = Vec::new();
        if config.defense.enable_ipset {
            appliers.push(Arc::new(IpsetBlocker::new(&config.defense)));
        }
        if config.defense.enable_suricata {
            appliers.push(Arc::new(SuricataRuleset::new(&config.defense)));
        }
        if appliers.is_empty() {
            warn!("no defense mechanism enabled; indicators will be reported but never applied");
        }

        let mailer: Arc<dyn Mailer> = if config.mail.enabled {
            Arc::new(SmtpMailer::from_config(&config.mail).context("building SMTP mailer")?)
        } else {
            Arc::new(LogMailer)
        };

        let pipeline = Pipeline::new(
            digest_providers,
            ioc_providers,
            appliers,
            IocExtractor::new(config.extract.allow_hosts.clone()),
            store,
            ledger,
            mailer,
            RetryPolicy::new(config.sources.retry_attempts),
        );

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
        })
    }

    /// Enter the trigger loop until a shutdown signal arrives. In-flight
    /// runs are allowed to complete; overlapping triggers are skipped, not
    /// queued.
    pub async fn run(self) -> Result<()> {
        let mut digest_timeline =
            Timeline::new("digest", self.config.schedule.digest_times()?);
        let mut ioc_timeline =
            Timeline::new("ioc", vec![self.config.schedule.ioc_trigger_time()?]);

        let mut digest_task: Option<JoinHandle<()>> = None;
        let mut ioc_task: Option<JoinHandle<()>> = None;

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.schedule.tick_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            digest_times = ?self.config.schedule.cron_times,
            ioc_time = self.config.schedule.ioc_time.as_str(),
            "entering trigger loop"
        );

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(error) = signal {
                        error!(error = %error, "failed to listen for shutdown signal");
                    }
                    info!("shutdown requested; no new runs will start");
                    break;
                }
                _ = ticker.tick() => {
                    let now = Local::now();

                    if let Some(trigger) = digest_timeline.due(now) {
                        digest_task = spawn_run(
                            digest_task,
                            &digest_timeline,
                            trigger,
                            Arc::clone(&self.pipeline),
                            |pipeline| async move { pipeline.run_digest().await },
                        );
                    }

                    if let Some(trigger) = ioc_timeline.due(now) {
                        ioc_task = spawn_run(
                            ioc_task,
                            &ioc_timeline,
                            trigger,
                            Arc::clone(&self.pipeline),
                            |pipeline| async move { pipeline.run_ioc().await },
                        );
                    }
                }
            }
        }

        // In-flight mechanism writes finish before the process exits.
        if let Some(handle) = digest_task {
            let _ = handle.await;
        }
        if let Some(handle) = ioc_task {
            let _ = handle.await;
        }
        info!("shutdown complete");
        Ok(())
    }

    /// One immediate digest cycle and one IOC cycle, then exit. Degraded
    /// units are reported, not fatal; only store persistence failures are.
    pub async fn run_once(self) -> Result<()> {
        let digest = self.pipeline.run_digest().await?;
        log_outcome("digest", &digest);
        let ioc = self.pipeline.run_ioc().await?;
        log_outcome("ioc", &ioc);
        Ok(())
    }

    /// Explicit re-sync: push every stored indicator back into the enabled
    /// mechanisms.
    pub async fn resync(self) -> Result<()> {
        self.pipeline.resync().await
    }
}

fn spawn_run<F, Fut>(
    previous: Option<JoinHandle<()>>,
    timeline: &Timeline,
    trigger: chrono::NaiveTime,
    pipeline: Arc<Pipeline>,
    run: F,
) -> Option<JoinHandle<()>>
where
    F: FnOnce(Arc<Pipeline>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<RunResult>> + Send + 'static,
{
    if let Some(handle) = &previous {
        if !handle.is_finished() {
            warn!(
                timeline = timeline.label(),
                trigger = %trigger,
                "previous run still in flight, skipping trigger"
            );
            return previous;
        }
    }

    let label = timeline.label();
    info!(timeline = label, trigger = %trigger, "starting run");
    Some(tokio::spawn(async move {
        match run(pipeline).await {
            Ok(result) => log_outcome(label, &result),
            Err(error) => error!(timeline = label, error = %error, "run failed"),
        }
    }))
}

fn log_outcome(timeline: &str, result: &RunResult) {
    info!(
        timeline,
        fetched = result.items_fetched,
        new = result.indicators_new,
        applied = result.indicators_applied,
        failed = result.indicators_failed,
        degraded = result.errors.len(),
        "run complete"
    );
}
