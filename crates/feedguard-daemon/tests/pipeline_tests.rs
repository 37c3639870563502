//! End-to-end pipeline behavior over in-memory collaborators.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use feedguard_core::extract::IocExtractor;
use feedguard_core::retry::RetryPolicy;
use feedguard_core::store::{DigestLedger, IndicatorStore};
use feedguard_core::types::{Audience, ContentItem, Indicator, IndicatorKind, SourceKind};
use feedguard_daemon::mailer::Mailer;
use feedguard_daemon::pipeline::{Pipeline, ProviderSlot};
use feedguard_defense::{ApplyReport, DefenseApplier, DefenseError};
use feedguard_sources::{FetchError, SourceProvider};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

struct StaticProvider {
    kind: SourceKind,
    items: Vec<ContentItem>,
}

#[async_trait]
impl SourceProvider for StaticProvider {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn clamp_limit(&self, limit: usize) -> usize {
        limit.clamp(1, 50)
    }

    async fn fetch(&self, _limit: usize) -> Result<Vec<ContentItem>, FetchError> {
        Ok(self.items.clone())
    }
}

struct FailingProvider {
    kind: SourceKind,
}

#[async_trait]
impl SourceProvider for FailingProvider {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn clamp_limit(&self, limit: usize) -> usize {
        limit.clamp(1, 50)
    }

    async fn fetch(&self, _limit: usize) -> Result<Vec<ContentItem>, FetchError> {
        Err(FetchError::Malformed {
            url: "http://broken.example.net".into(),
            detail: "selector drift".into(),
        })
    }
}

struct MemoryApplier {
    label: &'static str,
    kinds: Vec<IndicatorKind>,
    fail: bool,
    applied: Mutex<BTreeSet<String>>,
    batches: Mutex<Vec<usize>>,
}

impl MemoryApplier {
    fn new(label: &'static str, kinds: Vec<IndicatorKind>) -> Arc<Self> {
        Arc::new(Self {
            label,
            kinds,
            fail: false,
            applied: Mutex::new(BTreeSet::new()),
            batches: Mutex::new(Vec::new()),
        })
    }

    fn failing(label: &'static str, kinds: Vec<IndicatorKind>) -> Arc<Self> {
        Arc::new(Self {
            label,
            kinds,
            fail: true,
            applied: Mutex::new(BTreeSet::new()),
            batches: Mutex::new(Vec::new()),
        })
    }

    fn applied_values(&self) -> BTreeSet<String> {
        self.applied.lock().unwrap().clone()
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl DefenseApplier for MemoryApplier {
    fn name(&self) -> &'static str {
        self.label
    }

    fn handles(&self, kind: IndicatorKind) -> bool {
        self.kinds.contains(&kind)
    }

    async fn apply(&self, batch: &BTreeSet<Indicator>) -> Result<ApplyReport, DefenseError> {
        self.batches.lock().unwrap().push(batch.len());
        if self.fail {
            return Err(DefenseError::CommandFailed {
                command: self.label.to_string(),
                status: "exit status: 1".into(),
                stderr: "permission denied".into(),
            });
        }
        let mut report = ApplyReport::default();
        let mut applied = self.applied.lock().unwrap();
        for indicator in batch {
            applied.insert(indicator.value.clone());
            report.applied.insert(indicator.clone());
        }
        Ok(report)
    }
}

#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<(Audience, String, String)>>,
}

impl CapturingMailer {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn messages(&self) -> Vec<(Audience, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send(&self, audience: Audience, subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((audience, subject.to_string(), body.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn blog_item(title: &str, body: &str) -> ContentItem {
    ContentItem {
        source_kind: SourceKind::ThreatBlog,
        title: title.into(),
        url: format!("https://blog.example.net/{}", title.replace(' ', "-")),
        published_at: None,
        body: body.into(),
    }
}

fn blog_slot(items: Vec<ContentItem>) -> ProviderSlot {
    ProviderSlot::new(
        Arc::new(StaticProvider {
            kind: SourceKind::ThreatBlog,
            items,
        }),
        5,
    )
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 2,
        initial_delay: Duration::from_millis(0),
        backoff_factor: 2,
    }
}

fn build_pipeline(
    dir: &TempDir,
    digest_providers: Vec<ProviderSlot>,
    ioc_providers: Vec<ProviderSlot>,
    appliers: Vec<Arc<dyn DefenseApplier>>,
    mailer: Arc<dyn Mailer>,
) -> Pipeline {
    Pipeline::new(
        digest_providers,
        ioc_providers,
        appliers,
        IocExtractor::new(vec!["example.com".into()]),
        IndicatorStore::open(dir.path()).unwrap(),
        DigestLedger::open(dir.path()),
        mailer,
        fast_retry(),
    )
}

// ---------------------------------------------------------------------------
// IOC runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn end_to_end_scenario_applies_and_records_both_indicators() {
    let dir = TempDir::new().unwrap();
    let ip_applier = MemoryApplier::new("ipset", vec![IndicatorKind::Ip]);
    let rule_applier =
        MemoryApplier::new("suricata", vec![IndicatorKind::Hash, IndicatorKind::Url]);
    let mailer = CapturingMailer::new();

    let pipeline = build_pipeline(
        &dir,
        Vec::new(),
        vec![blog_slot(vec![blog_item(
            "C2 writeup",
            "C2 server at 203.0.113.7, hash d41d8cd98f00b204e9800998ecf8427e",
        )])],
        vec![ip_applier.clone(), rule_applier.clone()],
        mailer.clone(),
    );

    let result = pipeline.run_ioc().await.unwrap();

    assert_eq!(result.items_fetched, 1);
    assert_eq!(result.indicators_new, 2);
    assert_eq!(result.indicators_applied, 2);
    assert_eq!(result.indicators_failed, 0);
    assert!(result.errors.is_empty());

    assert_eq!(
        ip_applier.applied_values(),
        BTreeSet::from(["203.0.113.7".to_string()])
    );
    assert_eq!(
        rule_applier.applied_values(),
        BTreeSet::from(["d41d8cd98f00b204e9800998ecf8427e".to_string()])
    );

    // Durable: a fresh store handle sees both entries.
    let reopened = IndicatorStore::open(dir.path()).unwrap();
    assert_eq!(reopened.len(), 2);

    // The IOC report went to the team only.
    let messages = mailer.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, Audience::Team);
    assert!(messages[0].1.contains("Malicious IOC"));
    assert!(messages[0].2.contains("203.0.113.7"));
}

#[tokio::test]
async fn one_failing_source_degrades_but_does_not_abort() {
    let dir = TempDir::new().unwrap();
    let applier = MemoryApplier::new("ipset", vec![IndicatorKind::Ip]);
    let mailer = CapturingMailer::new();

    let pipeline = build_pipeline(
        &dir,
        Vec::new(),
        vec![
            blog_slot(vec![blog_item("post one", "infra at 203.0.113.10")]),
            ProviderSlot::new(
                Arc::new(FailingProvider {
                    kind: SourceKind::ThreatBlog,
                }),
                5,
            ),
            blog_slot(vec![blog_item("post two", "infra at 203.0.113.11")]),
        ],
        vec![applier.clone()],
        mailer.clone(),
    );

    let result = pipeline.run_ioc().await.unwrap();

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.indicators_new, 2);
    assert_eq!(result.indicators_applied, 2);
    assert_eq!(
        applier.applied_values(),
        BTreeSet::from(["203.0.113.10".to_string(), "203.0.113.11".to_string()])
    );

    // The degraded source shows up in the team report.
    let messages = mailer.messages();
    assert!(messages[0].2.contains("Status: degraded"));
    assert!(messages[0].2.contains("threat-blog"));
}

#[tokio::test]
async fn second_run_sees_nothing_new() {
    let dir = TempDir::new().unwrap();
    let applier = MemoryApplier::new("ipset", vec![IndicatorKind::Ip]);
    let mailer = CapturingMailer::new();

    let pipeline = build_pipeline(
        &dir,
        Vec::new(),
        vec![blog_slot(vec![blog_item("repost", "same C2 at 203.0.113.7")])],
        vec![applier.clone()],
        mailer.clone(),
    );

    let first = pipeline.run_ioc().await.unwrap();
    assert_eq!(first.indicators_new, 1);
    assert_eq!(applier.batch_count(), 1);

    let second = pipeline.run_ioc().await.unwrap();
    assert_eq!(second.indicators_new, 0);
    assert_eq!(second.indicators_applied, 0);
    // Known indicators never reach the mechanism again.
    assert_eq!(applier.batch_count(), 1);

    let reopened = IndicatorStore::open(dir.path()).unwrap();
    assert_eq!(reopened.len(), 1);
}

#[tokio::test]
async fn failed_mechanism_leaves_its_indicators_unrecorded() {
    let dir = TempDir::new().unwrap();
    let broken_ipset = MemoryApplier::failing("ipset", vec![IndicatorKind::Ip]);
    let working_rules =
        MemoryApplier::new("suricata", vec![IndicatorKind::Hash, IndicatorKind::Url]);
    let mailer = CapturingMailer::new();

    let pipeline = build_pipeline(
        &dir,
        Vec::new(),
        vec![blog_slot(vec![blog_item(
            "mixed",
            "ip 203.0.113.7 and hash d41d8cd98f00b204e9800998ecf8427e",
        )])],
        vec![broken_ipset.clone(), working_rules.clone()],
        mailer.clone(),
    );

    let result = pipeline.run_ioc().await.unwrap();

    assert_eq!(result.indicators_new, 2);
    assert_eq!(result.indicators_applied, 1);
    assert_eq!(result.indicators_failed, 1);
    assert_eq!(result.errors.len(), 1);

    // Only the hash was confirmed; the ip stays unrecorded and will retry.
    let reopened = IndicatorStore::open(dir.path()).unwrap();
    assert_eq!(reopened.len(), 1);
    assert!(reopened.is_known(&Indicator::new(
        IndicatorKind::Hash,
        "d41d8cd98f00b204e9800998ecf8427e",
        SourceKind::ThreatBlog,
    )));
}

#[tokio::test]
async fn retried_indicator_applies_on_the_next_run() {
    let dir = TempDir::new().unwrap();
    let mailer = CapturingMailer::new();
    let items = vec![blog_item("persistent", "C2 at 203.0.113.7")];

    // First run: the mechanism is down.
    {
        let pipeline = build_pipeline(
            &dir,
            Vec::new(),
            vec![blog_slot(items.clone())],
            vec![MemoryApplier::failing("ipset", vec![IndicatorKind::Ip])],
            mailer.clone(),
        );
        let result = pipeline.run_ioc().await.unwrap();
        assert_eq!(result.indicators_applied, 0);
    }

    // Second run: the mechanism recovered; the same indicator is still new.
    let applier = MemoryApplier::new("ipset", vec![IndicatorKind::Ip]);
    let pipeline = build_pipeline(
        &dir,
        Vec::new(),
        vec![blog_slot(items)],
        vec![applier.clone()],
        mailer,
    );
    let result = pipeline.run_ioc().await.unwrap();

    assert_eq!(result.indicators_new, 1);
    assert_eq!(result.indicators_applied, 1);
    assert_eq!(
        applier.applied_values(),
        BTreeSet::from(["203.0.113.7".to_string()])
    );
}

// ---------------------------------------------------------------------------
// Digest runs
// ---------------------------------------------------------------------------

fn news_item(title: &str) -> ContentItem {
    ContentItem {
        source_kind: SourceKind::News,
        title: title.into(),
        url: format!("https://news.example.net/{}", title.replace(' ', "-")),
        published_at: None,
        body: String::new(),
    }
}

fn advisory_item(title: &str) -> ContentItem {
    ContentItem {
        source_kind: SourceKind::Advisory,
        title: title.into(),
        url: format!("https://cert.example.org/{}", title.replace(' ', "-")),
        published_at: None,
        body: String::new(),
    }
}

#[tokio::test]
async fn digest_run_mails_both_audiences() {
    let dir = TempDir::new().unwrap();
    let mailer = CapturingMailer::new();

    let pipeline = build_pipeline(
        &dir,
        vec![
            ProviderSlot::new(
                Arc::new(StaticProvider {
                    kind: SourceKind::News,
                    items: vec![news_item("big breach")],
                }),
                10,
            ),
            ProviderSlot::new(
                Arc::new(StaticProvider {
                    kind: SourceKind::Advisory,
                    items: vec![advisory_item("urgent patch")],
                }),
                10,
            ),
        ],
        Vec::new(),
        Vec::new(),
        mailer.clone(),
    );

    let result = pipeline.run_digest().await.unwrap();
    assert_eq!(result.items_fetched, 2);
    assert!(result.errors.is_empty());

    let messages = mailer.messages();
    // News to both audiences, advisories to both audiences.
    assert_eq!(messages.len(), 4);
    let customers = messages
        .iter()
        .filter(|(a, _, _)| *a == Audience::Customer)
        .count();
    assert_eq!(customers, 2);
    assert!(messages.iter().any(|(_, s, _)| s.contains("Security News")));
    assert!(messages
        .iter()
        .any(|(_, s, _)| s.contains("Vulnerability Advisories")));
}

#[tokio::test]
async fn digest_ledger_suppresses_repeated_titles() {
    let dir = TempDir::new().unwrap();
    let mailer = CapturingMailer::new();

    let slots = || {
        vec![ProviderSlot::new(
            Arc::new(StaticProvider {
                kind: SourceKind::News,
                items: vec![news_item("same headline")],
            }) as Arc<dyn SourceProvider>,
            10,
        )]
    };

    let pipeline = build_pipeline(&dir, slots(), Vec::new(), Vec::new(), mailer.clone());
    let first = pipeline.run_digest().await.unwrap();
    assert_eq!(first.items_fetched, 1);

    // A fresh pipeline (fresh process) still sees the delivered title.
    let pipeline = build_pipeline(&dir, slots(), Vec::new(), Vec::new(), mailer.clone());
    let second = pipeline.run_digest().await.unwrap();
    assert_eq!(second.items_fetched, 0);

    let messages = mailer.messages();
    // Second run's news body reports an empty day instead of repeating.
    let last_body = &messages.last().unwrap().2;
    assert!(last_body.contains("no new headlines"));
}

#[tokio::test]
async fn digest_run_reports_degraded_source_in_status_line() {
    let dir = TempDir::new().unwrap();
    let mailer = CapturingMailer::new();

    let pipeline = build_pipeline(
        &dir,
        vec![
            ProviderSlot::new(Arc::new(FailingProvider { kind: SourceKind::News }), 10),
            ProviderSlot::new(
                Arc::new(StaticProvider {
                    kind: SourceKind::Advisory,
                    items: vec![advisory_item("still works")],
                }),
                10,
            ),
        ],
        Vec::new(),
        Vec::new(),
        mailer.clone(),
    );

    let result = pipeline.run_digest().await.unwrap();
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.items_fetched, 1);

    let messages = mailer.messages();
    assert!(!messages.is_empty());
    assert!(messages[0].2.contains("Status: degraded"));
    assert!(messages[0].2.contains("news"));
}
