//! Configuration module for Listing-Harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use listing_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvest will use {} sessions", config.harvest.pool_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    default_pagination, Config, DetailRule, ExtractorConfig, FieldRule, HarvestConfig,
    IdentityRule, OutputConfig, OutputFormat, PaginationEntry, ProbeConfig, RetryConfig,
    TargetConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
