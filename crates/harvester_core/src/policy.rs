use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use url::Url;

/// Extra request shaping for one publisher domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherParams {
    /// Headers forwarded to the target through the proxy.
    pub headers: BTreeMap<String, String>,
    /// Cookies sent with the target request, name to value.
    pub cookies: BTreeMap<String, String>,
    /// CSS selector the rendering browser waits for before capturing.
    pub wait_for_selector: Option<String>,
    /// Obtain session cookies through a rendering pass before the real request.
    pub prefetch_cookies: bool,
}

/// Static per-domain routing tables, loaded once and shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainPolicy {
    pub browser_render_domains: BTreeSet<String>,
    pub bot_protection_domains: BTreeSet<String>,
    pub publishers: BTreeMap<String, PublisherParams>,
}

impl DomainPolicy {
    /// Tables shipped with the binary; a config file replaces them wholesale.
    pub fn builtin() -> Self {
        let browser_render_domains = [
            "sciencedirect.com",
            "onlinelibrary.wiley.com",
            "tandfonline.com",
            "journals.sagepub.com",
            "pubs.acs.org",
        ];
        let bot_protection_domains = [
            "hcvalidate.perfdrive.com",
            "validate.perfdrive.com",
            "challenges.cloudflare.com",
            "geo.captcha-delivery.com",
            "captcha.perimeterx.net",
        ];
        let mut publishers = BTreeMap::new();
        publishers.insert(
            "wiley.com".to_string(),
            PublisherParams {
                prefetch_cookies: true,
                ..PublisherParams::default()
            },
        );
        publishers.insert(
            "sciencedirect.com".to_string(),
            PublisherParams {
                wait_for_selector: Some("#abstracts".to_string()),
                ..PublisherParams::default()
            },
        );

        Self {
            browser_render_domains: browser_render_domains.iter().map(|d| d.to_string()).collect(),
            bot_protection_domains: bot_protection_domains.iter().map(|d| d.to_string()).collect(),
            publishers,
        }
    }

    pub fn requires_browser(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| matches_any(&host, &self.browser_render_domains))
    }

    pub fn is_bot_protection(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| matches_any(&host, &self.bot_protection_domains))
    }

    /// Publisher parameters for the most specific matching domain.
    pub fn publisher_params(&self, url: &str) -> Option<&PublisherParams> {
        let host = host_of(url)?;
        self.publishers
            .iter()
            .filter(|(domain, _)| host_matches(&host, domain))
            .max_by_key(|(domain, _)| domain.len())
            .map(|(_, params)| params)
    }
}

/// Lowercased host of an absolute URL.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| host.trim_end_matches('.').to_ascii_lowercase())
}

/// True when `host` is `domain` or one of its subdomains.
pub fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return false;
    }
    host == domain
        || host
            .strip_suffix(domain.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn matches_any(host: &str, domains: &BTreeSet<String>) -> bool {
    domains.iter().any(|domain| host_matches(host, domain))
}

#[cfg(test)]
mod tests {
    use super::host_matches;

    #[test]
    fn suffix_must_fall_on_label_boundary() {
        assert!(host_matches("wiley.com", "wiley.com"));
        assert!(host_matches("onlinelibrary.wiley.com", "wiley.com"));
        assert!(!host_matches("notwiley.com", "wiley.com"));
        assert!(!host_matches("wiley.com.evil.org", "wiley.com"));
    }

    #[test]
    fn leading_dot_and_case_are_ignored() {
        assert!(host_matches("pubs.acs.org", ".ACS.org"));
        assert!(!host_matches("acs.org", ""));
    }
}
