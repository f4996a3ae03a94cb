use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub matcher: MatcherConfig,
    pub media: MediaConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub wiki: WikiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatcherConfig {
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    /// Root of the upload directory tree.
    pub root: PathBuf,
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_thumbnail_width() -> u32 {
    320
}
fn default_min_dimension() -> u32 {
    160
}
fn default_max_bytes() -> u64 {
    4_000_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Hashes per scan batch.
    #[serde(default = "default_scan_batch_size")]
    pub batch_size: usize,
    /// Rows per page when enumerating the candidates of one hash.
    #[serde(default = "default_candidate_batch_size")]
    pub candidate_batch_size: usize,
    #[serde(default = "default_scan_sleep_secs")]
    pub sleep_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: default_scan_batch_size(),
            candidate_batch_size: default_candidate_batch_size(),
            sleep_secs: default_scan_sleep_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_scan_batch_size() -> usize {
    100
}
fn default_candidate_batch_size() -> usize {
    20
}
fn default_scan_sleep_secs() -> u64 {
    1
}
fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_import_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub sleep_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_import_batch_size(),
            sleep_secs: 0,
        }
    }
}

fn default_import_batch_size() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Maximum revisions listed in one message.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            sender: String::new(),
            transport: default_transport(),
            webhook_url: None,
            candidate_limit: default_candidate_limit(),
        }
    }
}

fn default_transport() -> String {
    "log".to_string()
}
fn default_candidate_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct WikiConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_article_path")]
    pub article_path: String,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            article_path: default_article_path(),
        }
    }
}

fn default_article_path() -> String {
    "/wiki/$1".to_string()
}

impl WikiConfig {
    /// Public URL of a file description page, if a base URL is configured.
    pub fn file_page_url(&self, name: &str) -> Option<String> {
        let base = self.base_url.as_deref()?.trim_end_matches('/');
        let title = format!("File:{}", name.replace(' ', "_"));
        let encoded = urlencoding::encode(&title).replace("%3A", ":");
        Some(format!("{}{}", base, self.article_path.replace("$1", &encoded)))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.scan.batch_size == 0 {
        anyhow::bail!("scan.batch_size must be > 0");
    }
    if config.scan.candidate_batch_size == 0 {
        anyhow::bail!("scan.candidate_batch_size must be > 0");
    }
    if config.scan.concurrency == 0 {
        anyhow::bail!("scan.concurrency must be >= 1");
    }
    if config.import.batch_size == 0 {
        anyhow::bail!("import.batch_size must be > 0");
    }

    if config.media.min_dimension == 0 {
        anyhow::bail!("media.min_dimension must be > 0");
    }
    if config.media.max_bytes == 0 {
        anyhow::bail!("media.max_bytes must be > 0");
    }
    if config.media.thumbnail_width < config.media.min_dimension {
        anyhow::bail!("media.thumbnail_width must be >= media.min_dimension");
    }

    if config.notify.candidate_limit == 0 {
        anyhow::bail!("notify.candidate_limit must be > 0");
    }
    if !config.notify.recipients.is_empty() && config.notify.sender.trim().is_empty() {
        anyhow::bail!("notify.sender must be set when notify.recipients is non-empty");
    }
    match config.notify.transport.as_str() {
        "log" => {}
        "webhook" => {
            if config.notify.webhook_url.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!("notify.webhook_url must be set when transport is 'webhook'");
            }
        }
        other => anyhow::bail!(
            "Unknown notify transport: '{}'. Must be log or webhook.",
            other
        ),
    }

    Ok(())
}
