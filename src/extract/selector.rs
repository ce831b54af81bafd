//! Configuration-driven extraction strategy
//!
//! A [`SelectorExtractor`] reads listing cards and detail pages with the CSS
//! selectors of one `[[extractor]]` section. Absent optional fields become
//! [`FieldValue::Missing`]; session failures are propagated.

use super::{DetailFields, ExtractError, ExtractResult, Extractor, FieldValue, Identity, RawItem};
use crate::config::{DetailRule, ExtractorConfig};
use crate::session::{Element, Locator, Session, SessionError, WaitCondition};
use async_trait::async_trait;
use std::time::Duration;

/// Separator used when a detail field collects several matches
const MULTI_VALUE_SEPARATOR: &str = "; ";

pub struct SelectorExtractor {
    config: ExtractorConfig,
    volatile_params: Vec<String>,
    ready_timeout: Duration,
}

impl SelectorExtractor {
    /// Creates an extractor from one `[[extractor]]` section
    ///
    /// # Arguments
    ///
    /// * `config` - Selectors for cards, identity, listing fields and detail fields
    /// * `volatile_params` - Query parameters stripped from identities
    /// * `ready_timeout` - Bound on waiting for a detail page to render
    pub fn new(
        config: ExtractorConfig,
        volatile_params: Vec<String>,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            config,
            volatile_params,
            ready_timeout,
        }
    }

    fn item_identity(
        &self,
        page_url: &str,
        href: Option<&str>,
        index: usize,
    ) -> ExtractResult<Identity> {
        let missing = || ExtractError::MissingIdentity {
            index,
            page_url: page_url.to_string(),
        };

        let href = href.map(str::trim).filter(|h| !h.is_empty()).ok_or_else(missing)?;
        crate::url::canonical_identity(page_url, href, &self.volatile_params).map_err(|e| {
            tracing::trace!("Unusable identity link '{}': {}", href, e);
            missing()
        })
    }

    async fn read_detail(
        &self,
        session: &mut dyn Session,
        rule: &DetailRule,
    ) -> ExtractResult<FieldValue> {
        let matches = session.query(&Locator::css(&rule.selector)).await?;

        if rule.multiple {
            let values: Vec<String> = matches
                .iter()
                .filter_map(|el| element_value(el, rule.attribute.as_deref()))
                .collect();
            return Ok(FieldValue::from(
                (!values.is_empty()).then(|| values.join(MULTI_VALUE_SEPARATOR)),
            ));
        }

        Ok(FieldValue::from(
            matches
                .first()
                .and_then(|el| element_value(el, rule.attribute.as_deref())),
        ))
    }

    /// Follows a redirect link and returns the URL it lands on
    ///
    /// Failures keep the original value.
    async fn resolve_redirect(&self, session: &mut dyn Session, value: &str, host: &str) -> String {
        let points_at_host = url::Url::parse(value)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(host)))
            .unwrap_or(false);
        if !points_at_host {
            return value.to_string();
        }

        match session.navigate(value).await {
            Ok(()) => match session.current_url() {
                Some(final_url) if final_url != value => {
                    tracing::debug!("Resolved redirect {} -> {}", value, final_url);
                    final_url
                }
                _ => value.to_string(),
            },
            Err(e) => {
                tracing::debug!("Could not resolve redirect {}: {}", value, e);
                value.to_string()
            }
        }
    }
}

#[async_trait]
impl Extractor for SelectorExtractor {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn extract_listing_page(&self, session: &mut dyn Session) -> ExtractResult<Vec<RawItem>> {
        let page_url = session.current_url().ok_or_else(|| {
            ExtractError::Session(SessionError::NotActionable(
                "no listing page loaded".to_string(),
            ))
        })?;

        let cards = session.query(&Locator::css(&self.config.item_selector)).await?;
        let identity_locator = Locator::css(&self.config.identity.selector);

        let mut items = Vec::with_capacity(cards.len());
        for (index, card) in cards.iter().enumerate() {
            let links = session.query_within(card, &identity_locator).await?;
            let href = links
                .first()
                .and_then(|el| el.attribute(&self.config.identity.attribute));

            let identity = match self.item_identity(&page_url, href, index) {
                Ok(identity) => identity,
                Err(e) => {
                    tracing::debug!("Skipping item: {}", e);
                    continue;
                }
            };

            let mut item = RawItem::new(identity);
            for field in &self.config.fields {
                let found = session
                    .query_within(card, &Locator::css(&field.selector))
                    .await?;
                let value = found
                    .first()
                    .and_then(|el| element_value(el, field.attribute.as_deref()));
                item.fields.insert(field.name.clone(), FieldValue::from(value));
            }
            items.push(item);
        }

        tracing::debug!(
            "Extractor '{}' found {} items ({} cards) on {}",
            self.config.name,
            items.len(),
            cards.len(),
            page_url
        );
        Ok(items)
    }

    async fn extract_details(
        &self,
        session: &mut dyn Session,
        identity: &Identity,
    ) -> ExtractResult<DetailFields> {
        session.navigate(identity.as_str()).await?;

        if let Some(ready) = &self.config.detail_ready_selector {
            let condition = WaitCondition::Present(Locator::css(ready));
            if !session.wait_until(&condition, self.ready_timeout).await? {
                return Err(ExtractError::DetailNotReady {
                    identity: identity.to_string(),
                });
            }
        }

        let mut details = DetailFields::new();
        let mut redirects = Vec::new();
        for rule in &self.config.details {
            let value = self.read_detail(session, rule).await?;
            if let (Some(host), FieldValue::Present(v)) = (&rule.resolve_redirect_host, &value) {
                redirects.push((rule.name.clone(), v.clone(), host.clone()));
            }
            details.insert(rule.name.clone(), value);
        }

        // Redirects navigate away from the detail page, so they run last
        for (name, value, host) in redirects {
            let resolved = self.resolve_redirect(session, &value, &host).await;
            details.insert(name, FieldValue::Present(resolved));
        }

        Ok(details)
    }

    fn is_complete(&self, item: &RawItem) -> bool {
        self.config
            .fields
            .iter()
            .filter(|field| field.required)
            .all(|field| item.field(&field.name).is_present())
    }
}

/// Reads an attribute or, without one, the element's text
fn element_value(element: &Element, attribute: Option<&str>) -> Option<String> {
    let raw = match attribute {
        Some(name) => element.attribute(name)?,
        None => element.text(),
    };
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
