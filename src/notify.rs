//! Positive-match notifications.
//!
//! [`Notifier::notify_positive`] gathers the stored revisions of a hash,
//! groups them by file name and mails the configured recipients. It refuses
//! to run for a hash whose persisted status is not positive. Delivery
//! failures are logged as critical and returned; nothing is retried here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{NotifyConfig, WikiConfig};
use crate::error::ScanError;
use crate::models::{FileCandidate, MatchStatus, SourceTable};
use crate::rows::RowSource;
use crate::store::MatchStore;

/// A composed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub to: Vec<String>,
    pub from: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            to = ?message.to,
            from = %message.from,
            subject = %message.subject,
            "mail (log transport)\n{}",
            message.text_body
        );
        Ok(())
    }
}

/// Posts messages as JSON to a mail relay.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl MailTransport for WebhookTransport {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let response = self.client.post(&self.url).json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("mail relay returned {}: {}", status, body);
        }
        Ok(())
    }
}

/// Build the transport named in `[notify].transport`.
pub fn create_transport(config: &NotifyConfig) -> Result<Arc<dyn MailTransport>> {
    match config.transport.as_str() {
        "log" => Ok(Arc::new(LogTransport)),
        "webhook" => {
            let url = config
                .webhook_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("notify.webhook_url required for webhook transport"))?;
            Ok(Arc::new(WebhookTransport::new(url)?))
        }
        other => bail!("Unknown notify transport: {}", other),
    }
}

pub struct Notifier {
    store: Arc<dyn MatchStore>,
    rows: RowSource,
    transport: Arc<dyn MailTransport>,
    recipients: Vec<String>,
    sender: String,
    candidate_limit: usize,
    wiki: WikiConfig,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn MatchStore>,
        rows: RowSource,
        transport: Arc<dyn MailTransport>,
        config: &NotifyConfig,
        wiki: WikiConfig,
    ) -> Self {
        Self {
            store,
            rows,
            transport,
            recipients: config.recipients.clone(),
            sender: config.sender.clone(),
            candidate_limit: config.candidate_limit,
            wiki,
        }
    }

    /// Notify the recipients that `hash` matched.
    ///
    /// With `min_timestamp`, revisions uploaded before it are left out of
    /// the message.
    pub async fn notify_positive(
        &self,
        hash: &str,
        min_timestamp: Option<&str>,
    ) -> Result<(), ScanError> {
        let status = self
            .store
            .get(hash)
            .await?
            .map_or(MatchStatus::Unknown, |r| r.status);
        if status != MatchStatus::Positive {
            error!(hash, %status, "refusing to send positive-match notification");
            return Err(ScanError::NotPositive {
                hash: hash.to_string(),
                status: status.to_string(),
            });
        }

        if self.recipients.is_empty() {
            warn!(hash, "positive match but notify.recipients is empty; nothing sent");
            return Ok(());
        }

        let candidates = self.rows.collect_candidates(hash, self.candidate_limit).await?;
        let message = self.compose(hash, &candidates, min_timestamp);

        match self.transport.send(&message).await {
            Ok(()) => {
                info!(hash, recipients = self.recipients.len(), "positive-match notification sent");
                Ok(())
            }
            Err(e) => {
                error!(hash, error = %e, "CRITICAL: positive-match notification was not delivered");
                Err(ScanError::NotifyDelivery {
                    hash: hash.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn compose(
        &self,
        hash: &str,
        candidates: &[FileCandidate],
        min_timestamp: Option<&str>,
    ) -> MailMessage {
        let kept = candidates.iter().filter(|c| match (min_timestamp, &c.timestamp) {
            (Some(min), Some(ts)) => ts.as_str() >= min,
            _ => true,
        });

        let mut dated: BTreeMap<&str, Vec<&FileCandidate>> = BTreeMap::new();
        let mut undated: Vec<&FileCandidate> = Vec::new();
        for c in kept {
            if c.display_timestamp().is_some() {
                dated.entry(c.name.as_str()).or_default().push(c);
            } else {
                undated.push(c);
            }
        }

        let subject = format!("Hash match found for uploaded file(s) with SHA-1 {}", hash);
        let intro = format!(
            "Stored files with the content hash {} matched the hash-matching service.",
            hash
        );

        let mut text = format!("{}\n\n", intro);
        let mut html = format!("<p>{}</p>\n", escape_html(&intro));

        if dated.is_empty() && undated.is_empty() {
            let none = "No stored revisions were found for this hash.";
            text.push_str(none);
            text.push('\n');
            html.push_str(&format!("<p>{}</p>\n", none));
        }

        for (name, revisions) in &dated {
            text.push_str(&format!("{}\n", name));
            html.push_str(&format!("<h3>{}</h3>\n<ul>\n", escape_html(name)));
            for c in revisions {
                let when = c.display_timestamp().unwrap_or_default();
                let label = revision_label(c);
                match self.public_link(c) {
                    Some(link) => {
                        text.push_str(&format!("  - {} ({}) {}\n", when, label, link));
                        html.push_str(&format!(
                            "<li><a href=\"{}\">{}</a> ({})</li>\n",
                            escape_html(&link),
                            escape_html(&when),
                            label
                        ));
                    }
                    None => {
                        text.push_str(&format!("  - {} ({})\n", when, label));
                        html.push_str(&format!("<li>{} ({})</li>\n", escape_html(&when), label));
                    }
                }
            }
            html.push_str("</ul>\n");
        }

        if !undated.is_empty() {
            text.push_str("Versions with unknown upload time:\n");
            html.push_str("<h3>Versions with unknown upload time</h3>\n<ul>\n");
            for c in &undated {
                text.push_str(&format!("  - {} ({})\n", c.name, revision_label(c)));
                html.push_str(&format!(
                    "<li>{} ({})</li>\n",
                    escape_html(&c.name),
                    revision_label(c)
                ));
            }
            html.push_str("</ul>\n");
        }

        MailMessage {
            to: self.recipients.clone(),
            from: self.sender.clone(),
            subject,
            html_body: html,
            text_body: text,
        }
    }

    fn public_link(&self, candidate: &FileCandidate) -> Option<String> {
        if candidate.deleted {
            return None;
        }
        let page = self.wiki.file_page_url(&candidate.name)?;
        Some(match candidate.source_table {
            SourceTable::Current => page,
            SourceTable::HistoricalRevision => format!("{}#filehistory", page),
            SourceTable::Deleted => return None,
        })
    }
}

fn revision_label(candidate: &FileCandidate) -> &'static str {
    match candidate.source_table {
        SourceTable::Current => "current version",
        SourceTable::HistoricalRevision if candidate.deleted => "suppressed old version",
        SourceTable::HistoricalRevision => "old version",
        SourceTable::Deleted => "deleted",
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
