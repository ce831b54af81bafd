//! URL handling module
//!
//! This module turns raw `href` values found on a listing into canonical
//! identity keys, and resolves relative links against the page they came from.

mod normalize;

use crate::extract::Identity;
use crate::{UrlError, UrlResult};
use url::Url;

pub use normalize::canonicalize_url;

/// Resolves a possibly-relative link against the URL of the page it was found on
///
/// # Arguments
///
/// * `base` - URL of the current document
/// * `href` - Raw attribute value (absolute, root-relative or relative)
///
/// # Returns
///
/// * `Ok(Url)` - Absolute URL
/// * `Err(UrlError)` - The base or link could not be parsed
pub fn resolve_link(base: &str, href: &str) -> UrlResult<Url> {
    let base = Url::parse(base).map_err(|e| UrlError::Parse(format!("{}: {}", base, e)))?;
    base.join(href.trim())
        .map_err(|e| UrlError::Parse(format!("{}: {}", href, e)))
}

/// Builds the identity key of a listing item from its detail link
///
/// Identity is the canonical detail URL. Display names are not unique across
/// listings and are never used as keys.
///
/// # Examples
///
/// ```
/// use listing_harvester::url::canonical_identity;
///
/// let id = canonical_identity("https://example.com/search?q=x", "/firm/42/?utm_source=a", &[]).unwrap();
/// assert_eq!(id.as_str(), "https://example.com/firm/42");
/// ```
pub fn canonical_identity(
    base: &str,
    href: &str,
    extra_volatile: &[String],
) -> UrlResult<Identity> {
    let absolute = resolve_link(base, href)?;
    let canonical = canonicalize_url(absolute.as_str(), extra_volatile)?;
    Ok(Identity::new(canonical.to_string()))
}

/// Substitutes URL-encoded search terms into a `{query}` placeholder
pub fn expand_listing_url(template: &str, search_terms: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(search_terms.as_bytes()).collect();
    template.replace("{query}", &encoded)
}
