use crate::UrlError;
use url::Url;

/// Query parameters that never contribute to an item's identity
const VOLATILE_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "ref",
    "source",
];

/// Canonicalizes a detail URL into a stable identity key
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Accept only `http` and `https` schemes (the scheme itself is preserved)
/// 3. Lowercase the host and strip a leading `www.`
/// 4. Normalize the path:
///    - Remove dot segments (. and ..)
///    - Collapse repeated slashes
///    - Remove trailing slash (except for root /)
/// 5. Remove the fragment
/// 6. Remove volatile query parameters (tracking parameters plus `extra_volatile`)
/// 7. Sort remaining query parameters by key
/// 8. Remove an empty query string
///
/// # Arguments
///
/// * `url_str` - The URL string to canonicalize
/// * `extra_volatile` - Site-specific parameters to drop (e.g. redirect or session tokens)
///
/// # Returns
///
/// * `Ok(Url)` - Canonical URL
/// * `Err(UrlError)` - Failed to parse or canonicalize the URL
///
/// # Examples
///
/// ```
/// use listing_harvester::url::canonicalize_url;
///
/// let url = canonicalize_url("https://WWW.EXAMPLE.COM/firm/42/?utm_source=x#reviews", &[]).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/firm/42");
/// ```
pub fn canonicalize_url(url_str: &str, extra_volatile: &[String]) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url, extra_volatile);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Drops volatile parameters and sorts the rest by key
fn filter_and_sort_query_params(url: &Url, extra_volatile: &[String]) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_volatile_param(key, extra_volatile))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

fn is_volatile_param(key: &str, extra_volatile: &[String]) -> bool {
    VOLATILE_PARAMS.contains(&key)
        || key.starts_with("utm_")
        || extra_volatile.iter().any(|extra| extra == key)
}
