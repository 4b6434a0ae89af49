use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use futures_util::StreamExt;
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use harvester_core::{host_of, DomainPolicy, PublisherParams};
use serde::{Deserialize, Serialize};

use crate::types::map_reqwest_error;
use crate::{FailureKind, FetchError};

pub const DEFAULT_PROXY_ENDPOINT: &str = "https://api.zyte.com/v1/extract";
const DEFAULT_REFERER: &str = "https://www.google.com/";
/// Room for the JSON envelope around the body: status, url, headers, cookies.
const API_ENVELOPE_BYTES: u64 = 64 * 1024;

#[derive(Clone)]
pub struct ProxySettings {
    pub endpoint: String,
    pub api_key: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_bytes: u64,
    pub referer: Option<String>,
}

impl ProxySettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_PROXY_ENDPOINT.to_string(),
            api_key: api_key.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            max_bytes: 25 * 1000 * 1000,
            referer: Some(DEFAULT_REFERER.to_string()),
        }
    }
}

impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("max_bytes", &self.max_bytes)
            .field("referer", &self.referer)
            .finish()
    }
}

/// How the proxy retrieves the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Raw HTTP response body.
    Plain,
    /// Headless browser with JavaScript; the body is the rendered DOM.
    Browser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxiedResponse {
    pub status: u16,
    pub final_url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub mode: FetchMode,
}

impl ProxiedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Rendered DOM is always re-encoded as UTF-8 HTML.
    pub fn content_type(&self) -> Option<&str> {
        match self.mode {
            FetchMode::Browser => Some("text/html; charset=utf-8"),
            FetchMode::Plain => self.header("content-type"),
        }
    }
}

#[async_trait::async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str, policy: &DomainPolicy) -> Result<ProxiedResponse, FetchError>;
}

/// Fetches through a Zyte-style extract API.
#[derive(Debug, Clone)]
pub struct ZyteFetcher {
    client: reqwest::Client,
    settings: ProxySettings,
}

impl ZyteFetcher {
    pub fn new(settings: ProxySettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { client, settings })
    }

    async fn call(&self, request: &ExtractRequest<'_>) -> Result<ExtractResponse, FetchError> {
        let response = self
            .client
            .post(&self.settings.endpoint)
            .basic_auth(&self.settings.api_key, Some(""))
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let limit = self.api_byte_limit();
        let status = response.status();
        if !status.is_success() {
            let body = read_capped(response, limit)
                .await
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            let detail = serde_json::from_str::<ProblemDetail>(&body)
                .map(|problem| problem.describe())
                .unwrap_or(body);
            harvest_warn!("proxy refused {}: {status} {detail}", request.url);
            return Err(FetchError::new(
                FailureKind::Proxy {
                    status: status.as_u16(),
                },
                detail,
            ));
        }

        let raw = read_capped(response, limit).await?;
        serde_json::from_slice(&raw)
            .map_err(|err| FetchError::new(FailureKind::MalformedResponse, err.to_string()))
    }

    /// Upper bound on the raw API response: a base64 body of `max_bytes` plus its envelope.
    fn api_byte_limit(&self) -> u64 {
        self.settings
            .max_bytes
            .saturating_mul(4)
            .div_ceil(3)
            .saturating_add(API_ENVELOPE_BYTES)
    }

    async fn prefetch_cookies(&self, url: &str) -> Result<Vec<ProxyCookie>, FetchError> {
        harvest_info!("prefetching cookies for {url}");
        let request = ExtractRequest {
            url,
            browser_html: true,
            javascript: Some(true),
            experimental: Some(ExperimentalRequest {
                response_cookies: Some(true),
                request_cookies: Vec::new(),
            }),
            ..ExtractRequest::default()
        };
        let response = self.call(&request).await?;
        Ok(response
            .experimental
            .map(|experimental| experimental.response_cookies)
            .unwrap_or_default())
    }

    fn proxied_response(
        &self,
        url: &str,
        mode: FetchMode,
        response: ExtractResponse,
    ) -> Result<ProxiedResponse, FetchError> {
        let status = response.status_code.ok_or_else(|| {
            FetchError::new(FailureKind::MalformedResponse, "proxy response without statusCode")
        })?;
        if status >= 400 {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status),
                format!("target answered {status} for {url}"),
            ));
        }

        let body = if let Some(encoded) = response.http_response_body {
            general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|err| FetchError::new(FailureKind::MalformedResponse, err.to_string()))?
        } else if let Some(html) = response.browser_html {
            html.into_bytes()
        } else {
            return Err(FetchError::new(
                FailureKind::MalformedResponse,
                "proxy response without a body",
            ));
        };

        let actual = body.len() as u64;
        if actual > self.settings.max_bytes {
            return Err(too_large(self.settings.max_bytes, Some(actual)));
        }

        Ok(ProxiedResponse {
            status,
            final_url: response.url.unwrap_or_else(|| url.to_string()),
            headers: response
                .http_response_headers
                .into_iter()
                .map(|header| (header.name, header.value))
                .collect(),
            body,
            mode,
        })
    }
}

#[async_trait::async_trait]
impl ContentFetcher for ZyteFetcher {
    async fn fetch(&self, url: &str, policy: &DomainPolicy) -> Result<ProxiedResponse, FetchError> {
        let defaults = PublisherParams::default();
        let params = policy.publisher_params(url).unwrap_or(&defaults);
        let mode = select_mode(url, policy, params);

        let mut cookies = static_cookies(url, params);
        if params.prefetch_cookies {
            let fetched = self.prefetch_cookies(url).await?;
            harvest_debug!("prefetch returned {} cookies for {url}", fetched.len());
            cookies.extend(fetched);
        }

        let request = build_request(url, mode, params, cookies, self.settings.referer.as_deref());
        harvest_info!("calling proxy for {url} in {mode:?} mode");
        let response = self.call(&request).await?;
        let proxied = self.proxied_response(url, mode, response)?;
        harvest_info!(
            "proxy returned {} for {} ({} bytes)",
            proxied.status,
            proxied.final_url,
            proxied.body.len()
        );
        Ok(proxied)
    }
}

/// With cookie prefetch the rendering pass is the prefetch; the content request is plain.
pub(crate) fn select_mode(url: &str, policy: &DomainPolicy, params: &PublisherParams) -> FetchMode {
    if params.prefetch_cookies {
        FetchMode::Plain
    } else if policy.requires_browser(url) || params.wait_for_selector.is_some() {
        FetchMode::Browser
    } else {
        FetchMode::Plain
    }
}

fn static_cookies(url: &str, params: &PublisherParams) -> Vec<ProxyCookie> {
    let domain = host_of(url);
    params
        .cookies
        .iter()
        .map(|(name, value)| ProxyCookie {
            name: name.clone(),
            value: value.clone(),
            domain: domain.clone(),
        })
        .collect()
}

pub(crate) fn build_request<'a>(
    url: &'a str,
    mode: FetchMode,
    params: &PublisherParams,
    cookies: Vec<ProxyCookie>,
    default_referer: Option<&str>,
) -> ExtractRequest<'a> {
    let experimental = (!cookies.is_empty()).then(|| ExperimentalRequest {
        response_cookies: None,
        request_cookies: cookies,
    });
    let referer = params
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("referer"))
        .map(|(_, value)| value.clone())
        .or_else(|| default_referer.map(str::to_string));

    match mode {
        FetchMode::Browser => {
            for name in params.headers.keys() {
                if !name.eq_ignore_ascii_case("referer") {
                    harvest_debug!("header {name} is not forwarded in browser mode");
                }
            }
            ExtractRequest {
                url,
                http_response_headers: true,
                browser_html: true,
                javascript: Some(true),
                request_headers: referer.map(|referer| RequestHeaders { referer }),
                actions: params
                    .wait_for_selector
                    .iter()
                    .map(|selector| Action::wait_for_css(selector))
                    .collect(),
                experimental,
                ..ExtractRequest::default()
            }
        }
        FetchMode::Plain => {
            let mut custom_headers: Vec<NameValue> = params
                .headers
                .iter()
                .map(|(name, value)| NameValue {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect();
            let has_referer = custom_headers
                .iter()
                .any(|header| header.name.eq_ignore_ascii_case("referer"));
            if !has_referer {
                if let Some(referer) = referer {
                    custom_headers.push(NameValue {
                        name: "Referer".to_string(),
                        value: referer,
                    });
                }
            }
            ExtractRequest {
                url,
                http_response_body: true,
                http_response_headers: true,
                custom_http_request_headers: custom_headers,
                experimental,
                ..ExtractRequest::default()
            }
        }
    }
}

/// Reads a response body, failing as soon as it exceeds `limit` bytes.
async fn read_capped(response: reqwest::Response, limit: u64) -> Result<Vec<u8>, FetchError> {
    if let Some(content_len) = response.content_length() {
        if content_len > limit {
            return Err(too_large(limit, Some(content_len)));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_reqwest_error)?;
        let next_len = bytes.len() as u64 + chunk.len() as u64;
        if next_len > limit {
            return Err(too_large(limit, Some(next_len)));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn too_large(max_bytes: u64, actual: Option<u64>) -> FetchError {
    FetchError::new(
        FailureKind::TooLarge { max_bytes, actual },
        "response too large",
    )
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExtractRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "is_false")]
    http_response_body: bool,
    #[serde(skip_serializing_if = "is_false")]
    http_response_headers: bool,
    #[serde(skip_serializing_if = "is_false")]
    browser_html: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    javascript: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    custom_http_request_headers: Vec<NameValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_headers: Option<RequestHeaders>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    actions: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    experimental: Option<ExperimentalRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NameValue {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct RequestHeaders {
    referer: String,
}

#[derive(Debug, Serialize)]
struct Action {
    action: &'static str,
    selector: CssSelector,
}

impl Action {
    fn wait_for_css(selector: &str) -> Self {
        Self {
            action: "waitForSelector",
            selector: CssSelector {
                kind: "css",
                value: selector.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct CssSelector {
    #[serde(rename = "type")]
    kind: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExperimentalRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_cookies: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    request_cookies: Vec<ProxyCookie>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ProxyCookie {
    name: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    domain: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractResponse {
    url: Option<String>,
    status_code: Option<u16>,
    http_response_body: Option<String>,
    browser_html: Option<String>,
    #[serde(default)]
    http_response_headers: Vec<NameValue>,
    experimental: Option<ExperimentalResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExperimentalResponse {
    #[serde(default)]
    response_cookies: Vec<ProxyCookie>,
}

#[derive(Debug, Deserialize)]
struct ProblemDetail {
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
}

impl ProblemDetail {
    fn describe(&self) -> String {
        match (self.title.is_empty(), self.detail.is_empty()) {
            (false, false) => format!("{}: {}", self.title, self.detail),
            (false, true) => self.title.clone(),
            _ => self.detail.clone(),
        }
    }
}
