use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Listing-Harvester
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub target: TargetConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_pagination")]
    pub pagination: Vec<PaginationEntry>,
    #[serde(rename = "extractor")]
    pub extractors: Vec<ExtractorConfig>,
    #[serde(default)]
    pub probe: ProbeConfig,
    pub output: OutputConfig,
    pub user_agent: UserAgentConfig,
}

impl Config {
    /// Listing URL with the search terms substituted
    pub fn listing_url(&self) -> String {
        crate::url::expand_listing_url(&self.target.listing_url, &self.target.search_terms)
    }

    /// Hex SHA-256 of what makes two runs "the same search"
    ///
    /// Stored in the checkpoint so that a checkpoint written for another
    /// listing is never replayed. Tuning knobs such as pool size do not
    /// change it.
    pub fn search_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.listing_url().as_bytes());
        hasher.update([0u8]);
        for column in &self.output.columns {
            hasher.update(column.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// The listing to harvest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    /// Listing URL; `{query}` is replaced by the URL-encoded search terms
    pub listing_url: String,

    #[serde(default)]
    pub search_terms: String,

    /// CSS selector that is present once a listing page has rendered
    pub ready_selector: String,
}

/// Harvest loop behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HarvestConfig {
    /// Number of pooled sessions used for enrichment
    pub pool_size: usize,

    /// Highest page number to process
    pub max_pages: u32,

    /// Stop after this many items have been admitted
    pub item_limit: Option<usize>,

    /// Bound on one enrichment attempt (milliseconds)
    pub item_timeout_ms: u64,

    /// Bound on waiting for a page to become ready (milliseconds)
    pub page_load_timeout_ms: u64,

    /// Fixed pause after each pagination step (milliseconds)
    pub settle_delay_ms: u64,

    /// How long shutdown waits for busy sessions (milliseconds)
    pub close_timeout_ms: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            max_pages: 100,
            item_limit: None,
            item_timeout_ms: 30_000,
            page_load_timeout_ms: 10_000,
            settle_delay_ms: 1_000,
            close_timeout_ms: 10_000,
        }
    }
}

impl HarvestConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Retry policy for enrichment and pagination clicks
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 1.5,
        }
    }
}

/// One way of moving to the next listing page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PaginationEntry {
    pub name: String,

    /// CSS selector of the control to click
    pub selector: String,

    /// Exact text the control must have; `{next}` is the next page number
    pub text: Option<String>,

    /// How long to wait for the control to become clickable (milliseconds)
    #[serde(default = "default_strategy_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_strategy_timeout_ms() -> u64 {
    5_000
}

/// Numbered page link, then next arrow, then load-more button
pub fn default_pagination() -> Vec<PaginationEntry> {
    vec![
        PaginationEntry {
            name: "numbered-link".to_string(),
            selector: "a[class*='page'], span[class*='page']".to_string(),
            text: Some("{next}".to_string()),
            timeout_ms: default_strategy_timeout_ms(),
        },
        PaginationEntry {
            name: "next-arrow".to_string(),
            selector: "a[rel='next'], a[aria-label='Next'], a.next".to_string(),
            text: None,
            timeout_ms: 3_000,
        },
        PaginationEntry {
            name: "load-more".to_string(),
            selector: "a.load-more, button.load-more".to_string(),
            text: None,
            timeout_ms: 3_000,
        },
    ]
}

/// A named, selector-driven extraction strategy
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtractorConfig {
    pub name: String,

    /// CSS selector matching one listing card
    pub item_selector: String,

    pub identity: IdentityRule,

    #[serde(default)]
    pub fields: Vec<FieldRule>,

    /// CSS selector present once a detail page has rendered
    pub detail_ready_selector: Option<String>,

    #[serde(default)]
    pub details: Vec<DetailRule>,
}

/// Where a card's detail link lives
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IdentityRule {
    pub selector: String,
    #[serde(default = "default_identity_attribute")]
    pub attribute: String,
}

fn default_identity_attribute() -> String {
    "href".to_string()
}

/// A field read from a listing card
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldRule {
    pub name: String,
    pub selector: String,
    /// Attribute to read; the element text is used when absent
    pub attribute: Option<String>,
    /// Counts towards the probe's success rate
    #[serde(default)]
    pub required: bool,
}

/// A field read from a detail page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DetailRule {
    pub name: String,
    pub selector: String,
    pub attribute: Option<String>,
    /// Join every match with "; " instead of taking the first
    #[serde(default)]
    pub multiple: bool,
    /// Values pointing at this host are followed and replaced by the final URL
    pub resolve_redirect_host: Option<String>,
}

/// Validation probe for extraction strategies
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProbeConfig {
    pub sample_size: usize,
    pub min_success_rate: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            sample_size: 5,
            min_success_rate: 0.6,
        }
    }
}

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Tsv,
    Sqlite,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the output file
    pub path: PathBuf,

    #[serde(default = "default_format")]
    pub format: OutputFormat,

    /// Overrides the format's delimiter (single character)
    pub delimiter: Option<String>,

    /// Written in place of missing fields
    #[serde(default = "default_placeholder")]
    pub placeholder: String,

    /// Column order after the identity column
    pub columns: Vec<String>,

    /// Path to the checkpoint file
    pub checkpoint_path: PathBuf,

    /// Extra query parameters ignored when building identities
    #[serde(default)]
    pub volatile_params: Vec<String>,
}

fn default_format() -> OutputFormat {
    OutputFormat::Csv
}

fn default_placeholder() -> String {
    "N/A".to_string()
}

impl OutputConfig {
    /// Delimiter byte for delimited formats
    pub fn delimiter_byte(&self) -> u8 {
        match (&self.delimiter, self.format) {
            (Some(d), _) => d.as_bytes().first().copied().unwrap_or(b','),
            (None, OutputFormat::Tsv) => b'\t',
            (None, _) => b',',
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: String,

    /// Email address for crawler-related contact
    pub contact_email: String,
}
