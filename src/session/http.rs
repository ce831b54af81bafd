//! Static-document rendering session
//!
//! `HttpSession` implements the session capability on top of plain HTTP:
//! - `navigate` fetches the document with `reqwest` (following redirects)
//! - queries run CSS selectors over the fetched HTML with `scraper`
//! - `click` follows the element's link target
//!
//! A static document never changes once loaded, so `wait_until` evaluates its
//! condition once against the current document. Script execution is not
//! available.

use super::{
    Element, ElementHandle, Locator, Session, SessionError, SessionFactory, SessionResult,
    WaitCondition,
};
use crate::config::UserAgentConfig;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::time::Duration;

/// Path from the document root to an element: one (locator, match index) per level
type ElementPath = Vec<(Locator, usize)>;

/// Builds the HTTP client shared by all sessions
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Whole-request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL; ContactEmail)
    let user_agent = format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Session over a static HTML document fetched with `reqwest`
pub struct HttpSession {
    id: usize,
    client: Client,
    current_url: Option<String>,
    document: Option<String>,
    generation: u64,
    handles: Vec<ElementPath>,
    closed: bool,
}

impl HttpSession {
    pub fn new(id: usize, client: Client) -> Self {
        Self {
            id,
            client,
            current_url: None,
            document: None,
            generation: 0,
            handles: Vec::new(),
            closed: false,
        }
    }

    /// Creates a session already showing `html` (for testing)
    #[cfg(test)]
    pub fn with_document(id: usize, url: &str, html: &str) -> Self {
        let mut session = Self::new(id, Client::new());
        session.load(url.to_string(), html.to_string());
        session
    }

    fn load(&mut self, url: String, body: String) {
        self.generation += 1;
        self.handles.clear();
        self.current_url = Some(url);
        self.document = Some(body);
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn path_of(&self, element: &Element) -> SessionResult<ElementPath> {
        let handle = element.handle();
        if handle.generation != self.generation {
            return Err(SessionError::StaleElement {
                handle: handle.to_string(),
            });
        }
        self.handles
            .get(handle.index)
            .cloned()
            .ok_or_else(|| SessionError::StaleElement {
                handle: handle.to_string(),
            })
    }

    /// Selects `locator` below `scope` and registers a handle for every match
    fn collect(
        &mut self,
        scope: &[(Locator, usize)],
        locator: &Locator,
    ) -> SessionResult<Vec<Element>> {
        let Some(document) = self.document.as_deref() else {
            return Ok(Vec::new());
        };

        let snapshots = select_in_document(document, scope, locator)?.ok_or_else(|| {
            SessionError::StaleElement {
                handle: format!("{}:scope", self.generation),
            }
        })?;

        let mut elements = Vec::with_capacity(snapshots.len());
        for (match_index, (text, attributes)) in snapshots.into_iter().enumerate() {
            let mut path = scope.to_vec();
            path.push((locator.clone(), match_index));
            self.handles.push(path);

            let handle = ElementHandle {
                generation: self.generation,
                index: self.handles.len() - 1,
            };
            elements.push(Element::new(handle, text, attributes));
        }

        Ok(elements)
    }
}

#[async_trait]
impl Session for HttpSession {
    fn id(&self) -> usize {
        self.id
    }

    async fn navigate(&mut self, url: &str) -> SessionResult<()> {
        self.ensure_open()?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| navigation_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                message: format!("HTTP {}", status.as_u16()),
                transient: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            });
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| navigation_error(url, &e))?;

        tracing::debug!("Session {} loaded {} ({} bytes)", self.id, final_url, body.len());
        self.load(final_url, body);
        Ok(())
    }

    fn current_url(&self) -> Option<String> {
        self.current_url.clone()
    }

    async fn wait_until(
        &mut self,
        condition: &WaitCondition,
        _timeout: Duration,
    ) -> SessionResult<bool> {
        self.ensure_open()?;

        let satisfied = match condition {
            WaitCondition::UrlChanged { from } => self
                .current_url
                .as_deref()
                .map_or(false, |current| current != from),
            WaitCondition::Present(locator) => !self.collect(&[], locator)?.is_empty(),
            WaitCondition::Actionable(locator) => self
                .collect(&[], locator)?
                .iter()
                .any(|el| el.is_actionable() && link_target(el).is_some()),
        };

        Ok(satisfied)
    }

    async fn query(&mut self, locator: &Locator) -> SessionResult<Vec<Element>> {
        self.ensure_open()?;
        self.collect(&[], locator)
    }

    async fn query_within(
        &mut self,
        scope: &Element,
        locator: &Locator,
    ) -> SessionResult<Vec<Element>> {
        self.ensure_open()?;
        let path = self.path_of(scope)?;
        self.collect(&path, locator)
    }

    async fn click(&mut self, element: &Element) -> SessionResult<()> {
        self.ensure_open()?;
        self.path_of(element)?;

        if !element.is_actionable() {
            return Err(SessionError::NotActionable(format!(
                "element {} is disabled",
                element.handle()
            )));
        }

        let href = link_target(element).ok_or_else(|| {
            SessionError::NotActionable(format!("element {} has no link target", element.handle()))
        })?;
        let base = self
            .current_url
            .clone()
            .ok_or_else(|| SessionError::NotActionable("no document loaded".to_string()))?;
        let target = crate::url::resolve_link(&base, href)
            .map_err(|e| SessionError::NotActionable(e.to_string()))?;

        self.navigate(target.as_str()).await
    }

    async fn run_script(&mut self, _code: &str) -> SessionResult<serde_json::Value> {
        Err(SessionError::Unsupported("script execution on a static document"))
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.closed = true;
        self.document = None;
        self.handles.clear();
        Ok(())
    }
}

/// Creates [`HttpSession`]s sharing one connection pool
#[derive(Clone)]
pub struct HttpSessionFactory {
    client: Client,
}

impl HttpSessionFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn create(&self, slot: usize) -> SessionResult<Box<dyn Session>> {
        Ok(Box::new(HttpSession::new(slot, self.client.clone())))
    }
}

fn navigation_error(url: &str, error: &reqwest::Error) -> SessionError {
    SessionError::Navigation {
        url: url.to_string(),
        message: error.to_string(),
        transient: error.is_timeout() || error.is_connect(),
    }
}

/// Returns the followable link target of an element
///
/// Excludes `javascript:`, `mailto:`, `tel:`, `data:` and fragment-only links.
fn link_target(element: &Element) -> Option<&str> {
    let href = element
        .attribute("href")
        .or_else(|| element.attribute("data-href"))?
        .trim();

    let excluded = href.is_empty()
        || href.starts_with('#')
        || ["javascript:", "mailto:", "tel:", "data:"]
            .iter()
            .any(|scheme| href.starts_with(scheme));

    (!excluded).then_some(href)
}

fn parse_selector(css: &str) -> SessionResult<Selector> {
    Selector::parse(css).map_err(|_| SessionError::InvalidSelector(css.to_string()))
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

fn snapshot(element: ElementRef<'_>) -> (String, HashMap<String, String>) {
    let attributes = element
        .value()
        .attrs()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    (element_text(&element), attributes)
}

fn nth_match<'a, I>(candidates: I, locator: &Locator, index: usize) -> Option<ElementRef<'a>>
where
    I: Iterator<Item = ElementRef<'a>>,
{
    candidates
        .filter(|el| locator.accepts_text(&element_text(el)))
        .nth(index)
}

/// Runs `locator` below the element at `scope` in a freshly parsed document
///
/// Returns `Ok(None)` when the scope element no longer resolves.
fn select_in_document(
    html: &str,
    scope: &[(Locator, usize)],
    locator: &Locator,
) -> SessionResult<Option<Vec<(String, HashMap<String, String>)>>> {
    let document = Html::parse_document(html);
    let selector = parse_selector(&locator.css)?;

    let Some(((first, first_index), rest)) = scope.split_first() else {
        return Ok(Some(
            document
                .select(&selector)
                .filter(|el| locator.accepts_text(&element_text(el)))
                .map(snapshot)
                .collect(),
        ));
    };

    let first_selector = parse_selector(&first.css)?;
    let mut current = nth_match(document.select(&first_selector), first, *first_index);

    for (level, index) in rest {
        let Some(parent) = current else {
            return Ok(None);
        };
        let level_selector = parse_selector(&level.css)?;
        current = nth_match(parent.select(&level_selector), level, *index);
    }

    Ok(current.map(|scope_element| {
        scope_element
            .select(&selector)
            .filter(|el| locator.accepts_text(&element_text(el)))
            .map(snapshot)
            .collect()
    }))
}
