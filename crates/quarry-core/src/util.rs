use url::Url;

/// Checks whether `url` may be visited given a scraper's allowed domains.
///
/// An empty list allows every host. A host is allowed when it equals an
/// entry or is a subdomain of one (`m.example.com` under `example.com`).
pub fn is_allowed_domain(url: &str, allowed_domains: &[String]) -> bool {
    if allowed_domains.is_empty() {
        return true;
    }
    let Some(host) = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    else {
        return false;
    };

    allowed_domains.iter().any(|allowed| {
        let allowed = allowed.trim().trim_start_matches('.').to_ascii_lowercase();
        host == allowed || host.ends_with(&format!(".{allowed}"))
    })
}

/// Resolves `target` against `base` unless it is already absolute.
pub fn resolve_url(base: &str, target: &str) -> Option<String> {
    if let Ok(url) = Url::parse(target) {
        return Some(url.to_string());
    }
    Url::parse(base).ok()?.join(target).ok().map(|u| u.to_string())
}
