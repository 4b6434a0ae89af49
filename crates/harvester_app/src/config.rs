//! RON configuration for the `harvester` binary.
//!
//! Every field is optional; a missing field keeps its built-in default. The
//! proxy API key never lives in the file, it comes from [`API_KEY_VAR`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use harvest_logging::harvest_info;
use harvester_core::DomainPolicy;
use harvester_engine::{
    EngineConfig, ProxySettings, ReharvestPolicy, ResolveSettings, DEFAULT_PROXY_ENDPOINT,
};
use serde::{Deserialize, Serialize};

pub const API_KEY_VAR: &str = "ZYTE_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage_root: PathBuf,
    pub reharvest: ReharvestPolicy,
    pub resolve: ResolveConfig,
    pub proxy: ProxyConfig,
    pub policy: DomainPolicy,
    pub extra_soft_block_signatures: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./harvest"),
            reharvest: ReharvestPolicy::default(),
            resolve: ResolveConfig::default(),
            proxy: ProxyConfig::default(),
            policy: DomainPolicy::builtin(),
            extra_soft_block_signatures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_http_redirects: usize,
    pub max_body_redirects: usize,
    pub sniff_bytes: usize,
    /// Sent as the `From` header on direct hop requests.
    pub contact_email: Option<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        let defaults = ResolveSettings::default();
        Self {
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            request_timeout_secs: defaults.request_timeout.as_secs(),
            max_http_redirects: defaults.max_http_redirects,
            max_body_redirects: defaults.max_body_redirects,
            sniff_bytes: defaults.sniff_bytes,
            contact_email: defaults.from,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub endpoint: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_bytes: u64,
    pub referer: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let defaults = ProxySettings::new(String::new());
        Self {
            endpoint: DEFAULT_PROXY_ENDPOINT.to_string(),
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            request_timeout_secs: defaults.request_timeout.as_secs(),
            max_bytes: defaults.max_bytes,
            referer: defaults.referer,
        }
    }
}

impl AppConfig {
    /// Built-in defaults when no path is given; a given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        harvest_info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(ron::from_str(content)?)
    }

    pub fn into_engine_config(self, api_key: String) -> EngineConfig {
        let mut engine = EngineConfig::default_with_output(self.storage_root, api_key);

        engine.resolve = ResolveSettings {
            connect_timeout: Duration::from_secs(self.resolve.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.resolve.request_timeout_secs),
            max_http_redirects: self.resolve.max_http_redirects,
            max_body_redirects: self.resolve.max_body_redirects,
            sniff_bytes: self.resolve.sniff_bytes,
            from: self.resolve.contact_email,
            ..engine.resolve
        };

        engine.proxy.endpoint = self.proxy.endpoint;
        engine.proxy.connect_timeout = Duration::from_secs(self.proxy.connect_timeout_secs);
        engine.proxy.request_timeout = Duration::from_secs(self.proxy.request_timeout_secs);
        engine.proxy.max_bytes = self.proxy.max_bytes;
        engine.proxy.referer = self.proxy.referer;

        engine.policy = self.policy;
        engine.reharvest = self.reharvest;
        engine.extra_soft_block_signatures = self.extra_soft_block_signatures;
        engine
    }
}
