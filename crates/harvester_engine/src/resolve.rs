use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures_util::StreamExt;
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use harvester_core::{host_matches, DomainPolicy, RedirectChain};
use regex::Regex;
use scraper::{Html, Selector};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, FROM, LOCATION};
use reqwest::{StatusCode, Url};

use crate::decode::decode_text;
use crate::types::map_reqwest_error;
use crate::{FailureKind, FetchError};

/// Bodies at or below this size are checked for bare `location.href` scripts.
const TINY_BODY_BYTES: usize = 500;

#[derive(Debug, Clone)]
pub struct ResolveSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_http_redirects: usize,
    pub max_body_redirects: usize,
    /// Upper bound on bytes read from a hop while looking for in-body redirects.
    pub sniff_bytes: usize,
    pub user_agent: String,
    pub from: Option<String>,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            max_http_redirects: 15,
            max_body_redirects: 5,
            sniff_bytes: 256 * 1024,
            user_agent: concat!("harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            from: None,
        }
    }
}

#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// Follows redirects from `url` and returns the walked-back chain.
    async fn resolve(&self, url: &str) -> Result<RedirectChain, FetchError>;
}

/// Resolves hops directly, without the scraping proxy.
#[derive(Debug, Clone)]
pub struct ReqwestResolver {
    client: reqwest::Client,
    settings: ResolveSettings,
    policy: Arc<DomainPolicy>,
}

impl ReqwestResolver {
    pub fn new(settings: ResolveSettings, policy: Arc<DomainPolicy>) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(from) = settings.from.as_deref() {
            let value = HeaderValue::from_str(from)
                .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
            headers.insert(FROM, value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;

        Ok(Self {
            client,
            settings,
            policy,
        })
    }

    async fn next_hop(
        &self,
        current: &Url,
        response: reqwest::Response,
        counters: &mut HopCounters,
    ) -> Result<Option<Url>, FetchError> {
        let status = response.status();

        if status.is_redirection() {
            if counters.http >= self.settings.max_http_redirects {
                harvest_warn!("redirect limit reached at {current}, treating it as terminal");
                return Ok(None);
            }
            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
            else {
                return Ok(None);
            };
            counters.http += 1;
            let target = join_location(current, location);
            if let Some(target) = target.as_ref() {
                harvest_info!("30x redirect: {target}");
            }
            return Ok(target);
        }

        if status != StatusCode::OK || counters.body >= self.settings.max_body_redirects {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase());
        if content_type
            .as_deref()
            .is_some_and(|ct| !ct.contains("html") && !ct.contains("text"))
        {
            return Ok(None);
        }

        let Some(head) = self.read_head(response).await? else {
            return Ok(None);
        };
        let text = decode_text(&head.bytes, content_type.as_deref()).text;
        let small = head.complete && head.bytes.len() < TINY_BODY_BYTES;
        let target = body_redirect(current, &text, small);
        if target.is_some() {
            counters.body += 1;
        }
        Ok(target)
    }

    async fn read_head(&self, response: reqwest::Response) -> Result<Option<BodyHead>, FetchError> {
        let limit = self.settings.sniff_bytes;
        if limit == 0 {
            return Ok(None);
        }
        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let room = limit - bytes.len();
            if chunk.len() >= room {
                bytes.extend_from_slice(&chunk[..room]);
                return Ok(Some(BodyHead {
                    bytes,
                    complete: false,
                }));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(Some(BodyHead {
            bytes,
            complete: true,
        }))
    }
}

#[async_trait::async_trait]
impl Resolver for ReqwestResolver {
    async fn resolve(&self, url: &str) -> Result<RedirectChain, FetchError> {
        let mut current =
            Url::parse(url).map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let mut chain = RedirectChain::new(current.as_str());
        let mut counters = HopCounters::default();

        loop {
            harvest_info!("LIVE GET on {current}");
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(map_reqwest_error)?;
            harvest_debug!("{current} answered {}", response.status());

            let Some(next) = self.next_hop(&current, response, &mut counters).await? else {
                break;
            };
            if chain.contains(next.as_str()) {
                harvest_warn!("redirect loop back to {next}, stopping at {current}");
                break;
            }
            chain.push(next.as_str());
            if self.policy.is_bot_protection(next.as_str()) {
                harvest_info!("not following bot-protection hop {next}");
                break;
            }
            current = next;
        }

        let walked = chain.walk_back(&self.policy);
        harvest_info!(
            "resolved {url} to {} in {} hops",
            walked.terminal(),
            walked.len()
        );
        Ok(walked)
    }
}

#[derive(Debug, Default)]
struct HopCounters {
    http: usize,
    body: usize,
}

struct BodyHead {
    bytes: Vec<u8>,
    complete: bool,
}

fn join_location(base: &Url, location: &str) -> Option<Url> {
    let repaired = location
        .trim()
        .replace("http:///", "http://")
        .replace("https:///", "https://");
    match base.join(&repaired) {
        Ok(url) => Some(url),
        Err(err) => {
            harvest_warn!("unusable redirect target {location:?} from {base}: {err}");
            None
        }
    }
}

static SCRIPT_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<script>location\.href='(.*)'</script>").expect("script pattern compiles")
});
static OVID_AN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)OvidAN = '(.*?)';").expect("ovid accession pattern compiles")
});
static OVID_JOURNAL_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)var journalURL = "(.*?)";"#).expect("ovid journal pattern compiles")
});
static REFRESH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)url\s*=\s*["']?([^"']*)"#).expect("refresh url pattern compiles")
});
static PDF_ASSET_REPLACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"window\.location\.replace\('(https://pdf\.sciencedirectassets\.com[^']*)'\)")
        .expect("asset pattern compiles")
});

/// Finds a redirect expressed in the body of a 200 page.
pub(crate) fn body_redirect(base: &Url, html: &str, small: bool) -> Option<Url> {
    let doc = Html::parse_document(html);

    if is_chooser(&doc) {
        if let Some(link) = chooser_link(&doc) {
            harvest_info!("chooser redirect: {link}");
            return join_location(base, &link);
        }
    }

    if small {
        if let Some(target) = SCRIPT_LOCATION.captures(html).and_then(|c| c.get(1)) {
            harvest_info!("script redirect: {}", target.as_str());
            return join_location(base, target.as_str());
        }
    }

    if let Some(an) = OVID_AN.captures(html).and_then(|c| c.get(1)) {
        let target = format!(
            "http://content.wkhealth.com/linkback/openurl?an={}",
            an.as_str()
        );
        harvest_info!("ovid accession redirect: {target}");
        return join_location(base, &target);
    }

    if base
        .host_str()
        .is_some_and(|host| host_matches(host, "ovid.com"))
    {
        if let Some(journal) = OVID_JOURNAL_URL.captures(html).and_then(|c| c.get(1)) {
            harvest_info!("ovid journal redirect: {}", journal.as_str());
            return join_location(base, journal.as_str());
        }
    }

    if let Some(target) = meta_refresh_target(&doc) {
        if let Some(url) = join_location(base, &target) {
            let text = url.as_str();
            if !text.ends_with("Error/JavaScript.html") && !text.ends_with("/?reason=expired") {
                harvest_info!("meta refresh redirect: {url}");
                return Some(url);
            }
        }
    }

    PDF_ASSET_REPLACE
        .captures(html)
        .and_then(|c| c.get(1))
        .and_then(|target| join_location(base, target.as_str()))
}

fn is_chooser(doc: &Html) -> bool {
    let Ok(title_sel) = Selector::parse("title") else {
        return false;
    };
    doc.select(&title_sel)
        .next()
        .is_some_and(|title| title.text().collect::<String>().trim() == "Chooser")
}

fn chooser_link(doc: &Html) -> Option<String> {
    let link_sel = Selector::parse("div.resource-line a[href]").ok()?;
    doc.select(&link_sel)
        .next()
        .and_then(|link| link.value().attr("href"))
        .map(str::to_string)
}

/// Target of the first `<meta http-equiv="refresh">` carrying a `url=` part.
fn meta_refresh_target(doc: &Html) -> Option<String> {
    let meta_sel = Selector::parse("meta[http-equiv]").ok()?;
    doc.select(&meta_sel)
        .filter(|meta| {
            meta.value()
                .attr("http-equiv")
                .is_some_and(|equiv| equiv.trim().eq_ignore_ascii_case("refresh"))
        })
        .filter_map(|meta| meta.value().attr("content"))
        .find_map(|content| {
            REFRESH_URL
                .captures(content)
                .and_then(|c| c.get(1))
                .map(|target| target.as_str().trim().to_string())
        })
        .filter(|target| !target.is_empty())
}
