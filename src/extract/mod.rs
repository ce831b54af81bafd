//! Item extraction
//!
//! This module defines the records that flow through a harvest and the
//! [`Extractor`] capability that produces them:
//! - [`RawItem`]: identity plus listing fields, read from a listing page
//! - [`DetailFields`]: fields read from the item's own detail page
//! - [`EnrichedItem`]: both together, ready to be written
//!
//! Optional fields that are absent are represented by [`FieldValue::Missing`]
//! rather than by errors.

mod registry;
mod selector;

pub use registry::{ExtractorRegistry, ProbeOutcome};
pub use selector::SelectorExtractor;

use crate::crawler::Retryable;
use crate::session::{Session, SessionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while extracting items
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Item {index} on {page_url} has no usable identity")]
    MissingIdentity { index: usize, page_url: String },

    #[error("Detail page for {identity} did not become ready")]
    DetailNotReady { identity: String },
}

impl Retryable for ExtractError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Session(e) => e.is_transient(),
            Self::DetailNotReady { .. } => true,
            Self::MissingIdentity { .. } => false,
        }
    }
}

/// Result type for extraction operations
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Stable key of a listing item (its canonical detail URL)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value of one extracted field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Present(String),
    /// The field was not found on the page
    Missing,
}

impl FieldValue {
    /// Builds a value from raw text; blank text counts as missing
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Self::Missing
        } else {
            Self::Present(trimmed.to_string())
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Present(value) => Some(value),
            Self::Missing => None,
        }
    }

    /// Returns the value, or `placeholder` when missing
    pub fn render<'a>(&'a self, placeholder: &'a str) -> &'a str {
        self.as_deref().unwrap_or(placeholder)
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Missing, |v| Self::from_text(&v))
    }
}

static MISSING: FieldValue = FieldValue::Missing;

/// An item as found on a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub identity: Identity,
    pub fields: BTreeMap<String, FieldValue>,
}

impl RawItem {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Looks up a field, treating unknown names as missing
    pub fn field(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&MISSING)
    }
}

/// Fields read from an item's detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailFields {
    fields: BTreeMap<String, FieldValue>,
}

impl DetailFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A listing item together with its detail fields
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedItem {
    pub raw: RawItem,
    pub details: DetailFields,
}

impl EnrichedItem {
    pub fn new(raw: RawItem, details: DetailFields) -> Self {
        Self { raw, details }
    }

    pub fn identity(&self) -> &Identity {
        &self.raw.identity
    }

    /// Looks up a column: detail fields first, then listing fields
    pub fn field(&self, name: &str) -> &FieldValue {
        match self.details.get(name) {
            Some(value) => value,
            None => self.raw.field(name),
        }
    }
}

/// Site-specific extraction strategy
///
/// The harvest engine calls `extract_listing_page` on the navigation session
/// and `extract_details` on pooled sessions, possibly from several tasks at
/// once.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Name used in logs and in the probe report
    fn name(&self) -> &str;

    /// Reads every item on the listing page currently shown by `session`
    ///
    /// Items without a usable identity are skipped.
    async fn extract_listing_page(&self, session: &mut dyn Session) -> ExtractResult<Vec<RawItem>>;

    /// Opens the item's detail page in `session` and reads its fields
    async fn extract_details(
        &self,
        session: &mut dyn Session,
        identity: &Identity,
    ) -> ExtractResult<DetailFields>;

    /// Returns true if every field this strategy requires is present
    fn is_complete(&self, item: &RawItem) -> bool;
}
