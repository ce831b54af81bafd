//! Extraction strategy registry
//!
//! Listing markup drifts, so several extraction strategies may be configured.
//! The registry tries them in priority order against the first listing page
//! and commits to the first one whose sample meets the minimum success rate.

use super::{ExtractError, ExtractResult, Extractor, RawItem, SelectorExtractor};
use crate::config::Config;
use crate::session::{Session, SessionError};
use std::sync::Arc;

/// Result of probing the registered strategies on one page
pub enum ProbeOutcome {
    /// A strategy passed; `items` is what it extracted from the probed page
    Selected {
        extractor: Arc<dyn Extractor>,
        items: Vec<RawItem>,
    },
    /// No strategy found any item on the page, so nothing could be judged
    Inconclusive,
    /// Strategies found items but none reached the success rate
    NoneViable { tried: Vec<String> },
}

/// Ordered list of extraction strategies plus the probe parameters
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    sample_size: usize,
    min_success_rate: f64,
}

impl ExtractorRegistry {
    pub fn new(sample_size: usize, min_success_rate: f64) -> Self {
        Self {
            extractors: Vec::new(),
            sample_size: sample_size.max(1),
            min_success_rate,
        }
    }

    /// Builds a registry of [`SelectorExtractor`]s from the `[[extractor]]` sections
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new(config.probe.sample_size, config.probe.min_success_rate);
        for extractor in &config.extractors {
            registry.register(Arc::new(SelectorExtractor::new(
                extractor.clone(),
                config.output.volatile_params.clone(),
                config.harvest.page_load_timeout(),
            )));
        }
        registry
    }

    /// Adds a strategy after the ones already registered
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    pub fn names(&self) -> Vec<String> {
        self.extractors.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Tries every strategy on the page shown by `session`
    ///
    /// A strategy passes when, among the first `sample_size` items it
    /// extracts, the share with all required fields present is at least
    /// `min_success_rate`. Extraction errors count as a failed probe, except
    /// a closed session which is returned as an error.
    pub async fn probe(&self, session: &mut dyn Session) -> ExtractResult<ProbeOutcome> {
        let mut tried = Vec::new();
        let mut saw_items = false;

        for extractor in &self.extractors {
            tried.push(extractor.name().to_string());

            let items = match extractor.extract_listing_page(session).await {
                Ok(items) => items,
                Err(ExtractError::Session(SessionError::Closed)) => {
                    return Err(ExtractError::Session(SessionError::Closed));
                }
                Err(e) => {
                    tracing::warn!("Extractor '{}' failed during probe: {}", extractor.name(), e);
                    continue;
                }
            };

            if items.is_empty() {
                tracing::info!("Extractor '{}' found no items", extractor.name());
                continue;
            }
            saw_items = true;

            let sample = &items[..items.len().min(self.sample_size)];
            let complete = sample.iter().filter(|item| extractor.is_complete(item)).count();
            let rate = complete as f64 / sample.len() as f64;

            if rate >= self.min_success_rate {
                tracing::info!(
                    "Using extractor '{}' ({}/{} sample items complete)",
                    extractor.name(),
                    complete,
                    sample.len()
                );
                return Ok(ProbeOutcome::Selected {
                    extractor: Arc::clone(extractor),
                    items,
                });
            }

            tracing::warn!(
                "Extractor '{}' rejected: {:.0}% of sample complete, {:.0}% required",
                extractor.name(),
                rate * 100.0,
                self.min_success_rate * 100.0
            );
        }

        if saw_items {
            Ok(ProbeOutcome::NoneViable { tried })
        } else {
            Ok(ProbeOutcome::Inconclusive)
        }
    }
}
