//! Listing-Harvester: a resumable harvester for paginated result listings
//!
//! This crate walks a dynamically-rendered listing page by page, enriches every
//! newly discovered item with a follow-up fetch on a pool of rendering sessions,
//! and persists the results append-only with a checkpoint after every page.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod output;
pub mod session;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Session pool error: {0}")]
    Pool(#[from] session::PoolError),

    #[error("Checkpoint error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] extract::ExtractError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No extraction strategy passed validation (tried: {})", tried.join(", "))]
    NoViableExtractor { tried: Vec<String> },

    #[error("Pagination failed on page {page}: {message}")]
    Pagination { page: u32, message: String },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::RunState,
        to: state::RunState,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Returns true for failures caused by durable persistence (checkpoint or output)
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Output(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for harvest operations
pub type HarvestResult<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, RetryExecutor, RetryPolicy};
pub use extract::{DetailFields, EnrichedItem, FieldValue, Identity, RawItem};
pub use state::{Deduplicator, ExitReason, RunState, RunSummary};
pub use url::canonical_identity;
