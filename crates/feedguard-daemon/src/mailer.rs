//! Outbound mail delivery.
//!
//! The pipeline only knows the [`Mailer`] capability; delivery failures are
//! logged and recorded against the run, never used to roll back defense
//! changes that already landed.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

use feedguard_core::config::MailConfig;
use feedguard_core::types::Audience;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, audience: Audience, subject: &str, body: &str) -> Result<()>;
}

/// SMTPS mailer with per-audience recipient routing.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    team_to: Vec<Mailbox>,
    customer_to: Vec<Mailbox>,
}

impl SmtpMailer {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let from: Mailbox = config
            .smtp_user
            .parse()
            .with_context(|| format!("invalid sender address '{}'", config.smtp_user))?;
        let team_to = parse_recipients(&config.team_to)?;
        let customer_to = parse_recipients(&config.customer_to)?;

        let credentials =
            Credentials::new(config.smtp_user.clone(), config.smtp_password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .with_context(|| format!("building SMTP transport for {}", config.smtp_host))?
            .port(config.smtp_port)
            .credentials(credentials)
            .timeout(Some(Duration::from_secs(config.send_timeout_secs)))
            .build();

        Ok(Self {
            transport,
            from,
            team_to,
            customer_to,
        })
    }

    fn recipients(&self, audience: Audience) -> &[Mailbox] {
        match audience {
            Audience::Team => &self.team_to,
            Audience::Customer => &self.customer_to,
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, audience: Audience, subject: &str, body: &str) -> Result<()> {
        let recipients = self.recipients(audience);
        if recipients.is_empty() {
            warn!(audience = %audience, "no recipients configured, skipping delivery");
            return Ok(());
        }

        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in recipients {
            builder = builder.to(recipient.clone());
        }
        let message = builder
            .body(body.to_string())
            .context("building digest message")?;

        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        info!(audience = %audience, subject, "digest sent");
        Ok(())
    }
}

fn parse_recipients(raw: &[String]) -> Result<Vec<Mailbox>> {
    raw.iter()
        .map(|addr| {
            addr.parse::<Mailbox>()
                .with_context(|| format!("invalid recipient address '{addr}'"))
        })
        .collect()
}

/// Stand-in used when mail delivery is disabled: the digest goes to the
/// log instead of an inbox.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, audience: Audience, subject: &str, body: &str) -> Result<()> {
        info!(audience = %audience, subject, "mail disabled; digest logged");
        debug!(body, "digest body");
        Ok(())
    }
}
