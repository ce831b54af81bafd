//! Rendering-session capability
//!
//! The harvest engine never talks to a concrete rendering engine. Everything it
//! needs from one is expressed by the [`Session`] trait:
//! - `navigate` / `current_url`
//! - bounded `wait_until` on a [`WaitCondition`]
//! - `query` / `query_within` returning [`Element`] snapshots
//! - `click`, `run_script` and `close`
//!
//! Sessions are stateful and must never be used by two operations at once. The
//! [`SessionPool`] enforces that for enrichment work.

mod http;
mod pool;

pub use http::{build_http_client, HttpSession, HttpSessionFactory};
pub use pool::{PoolError, SessionGuard, SessionPool};

use crate::crawler::Retryable;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a rendering session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout { operation: String, after: Duration },

    #[error("Stale element handle {handle}")]
    StaleElement { handle: String },

    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        url: String,
        message: String,
        transient: bool,
    },

    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("Element is not actionable: {0}")]
    NotActionable(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Session is closed")]
    Closed,
}

impl Retryable for SessionError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::StaleElement { .. } => true,
            Self::Navigation { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Text filter applied on top of a CSS selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    /// Trimmed element text equals the value
    Exact(String),
    /// Element text contains the value
    Contains(String),
}

impl TextMatch {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Exact(expected) => text.trim() == expected,
            Self::Contains(needle) => text.contains(needle.as_str()),
        }
    }
}

/// Describes how to find elements: a CSS selector plus an optional text filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub css: String,
    pub text: Option<TextMatch>,
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: None,
        }
    }

    pub fn with_exact_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(TextMatch::Exact(text.into()));
        self
    }

    pub fn with_text_containing(mut self, text: impl Into<String>) -> Self {
        self.text = Some(TextMatch::Contains(text.into()));
        self
    }

    /// Returns true if `text` passes this locator's text filter
    pub fn accepts_text(&self, text: &str) -> bool {
        self.text.as_ref().map_or(true, |m| m.matches(text))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            None => write!(f, "{}", self.css),
            Some(TextMatch::Exact(t)) => write!(f, "{}[text='{}']", self.css, t),
            Some(TextMatch::Contains(t)) => write!(f, "{}[text~='{}']", self.css, t),
        }
    }
}

/// Conditions a session can wait for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// At least one element matches
    Present(Locator),
    /// At least one matching element can be clicked
    Actionable(Locator),
    /// The session's current URL differs from `from`
    UrlChanged { from: String },
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present(locator) => write!(f, "presence of {}", locator),
            Self::Actionable(locator) => write!(f, "actionable {}", locator),
            Self::UrlChanged { from } => write!(f, "URL change from {}", from),
        }
    }
}

/// Opaque reference to an element in one document generation
///
/// Every navigation starts a new generation; handles from older generations
/// are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub generation: u64,
    pub index: usize,
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generation, self.index)
    }
}

/// Snapshot of an element taken at query time
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    handle: ElementHandle,
    text: String,
    attributes: HashMap<String, String>,
}

impl Element {
    pub fn new(
        handle: ElementHandle,
        text: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> Self {
        Self {
            handle,
            text: text.into(),
            attributes,
        }
    }

    pub fn handle(&self) -> ElementHandle {
        self.handle
    }

    /// Whitespace-trimmed text content
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// An element is actionable unless it is explicitly disabled
    pub fn is_actionable(&self) -> bool {
        self.attribute("disabled").is_none() && self.attribute("aria-disabled") != Some("true")
    }
}

/// One exclusive, stateful handle to a rendering context
#[async_trait]
pub trait Session: Send {
    /// Identifier used in logs (pool slot number)
    fn id(&self) -> usize;

    /// Loads `url` into this session, starting a new document generation
    async fn navigate(&mut self, url: &str) -> SessionResult<()>;

    /// URL of the current document, if any
    fn current_url(&self) -> Option<String>;

    /// Waits up to `timeout` for `condition`
    ///
    /// Returns `Ok(false)` on timeout. Errors are reserved for failures other
    /// than the condition not becoming true.
    async fn wait_until(&mut self, condition: &WaitCondition, timeout: Duration)
        -> SessionResult<bool>;

    /// Finds all elements of the current document matching `locator`
    async fn query(&mut self, locator: &Locator) -> SessionResult<Vec<Element>>;

    /// Finds elements matching `locator` inside `scope`
    async fn query_within(&mut self, scope: &Element, locator: &Locator)
        -> SessionResult<Vec<Element>>;

    /// Clicks an element previously returned by this session
    async fn click(&mut self, element: &Element) -> SessionResult<()>;

    /// Runs a script in the page and returns its JSON result
    async fn run_script(&mut self, code: &str) -> SessionResult<serde_json::Value>;

    /// Tears the session down; further calls fail with [`SessionError::Closed`]
    async fn close(&mut self) -> SessionResult<()>;
}

/// Creates rendering sessions for the pool and for navigation
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, slot: usize) -> SessionResult<Box<dyn Session>>;
}
