use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{normalize_doi, MimeKind, RedirectChain};

/// Outcome of retrieving one URL. The redirect chain always ends at `final_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    final_url: String,
    status: u16,
    body: Vec<u8>,
    content_type: Option<String>,
    redirect_chain: RedirectChain,
}

impl FetchResult {
    pub fn new(
        mut redirect_chain: RedirectChain,
        final_url: impl Into<String>,
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
    ) -> Self {
        let final_url = final_url.into();
        redirect_chain.extend_to(&final_url);
        Self {
            final_url,
            status,
            body,
            content_type,
            redirect_chain,
        }
    }

    pub fn final_url(&self) -> &str {
        &self.final_url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn redirect_chain(&self) -> &RedirectChain {
        &self.redirect_chain
    }

    pub fn byte_len(&self) -> u64 {
        self.body.len() as u64
    }
}

/// A harvest-by-URL call: the URL or DOI plus optional caller identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestRequest {
    pub url: String,
    pub native_id: Option<String>,
    pub native_id_namespace: Option<String>,
}

impl HarvestRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_native_id(
        mut self,
        namespace: impl Into<String>,
        native_id: impl Into<String>,
    ) -> Self {
        self.native_id_namespace = Some(namespace.into());
        self.native_id = Some(native_id.into());
        self
    }
}

/// Where the body of a harvest ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub storage_key: String,
    pub location: String,
}

/// Everything a harvest adds on top of the fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestOutcome {
    pub id: String,
    pub source_url: String,
    pub native_id: Option<String>,
    pub native_id_namespace: Option<String>,
    pub mime: MimeKind,
    pub is_soft_block: bool,
    pub stored: StoredObject,
    pub created_date: String,
    pub reused: bool,
}

/// Final product of one harvest call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestResult {
    fetch: FetchResult,
    outcome: HarvestOutcome,
}

impl HarvestResult {
    pub fn new(fetch: FetchResult, outcome: HarvestOutcome) -> Self {
        Self { fetch, outcome }
    }

    /// Rebuilds a result from an index record and the stored body.
    pub fn from_record(record: HarvestRecord, body: Vec<u8>) -> Self {
        let chain = RedirectChain::try_from(record.redirect_chain)
            .unwrap_or_else(|_| RedirectChain::new(record.url.clone()));
        let fetch = FetchResult::new(
            chain,
            record.resolved_url,
            record.status,
            record.content_type,
            body,
        );
        let outcome = HarvestOutcome {
            id: record.id,
            source_url: record.url,
            native_id: record.native_id,
            native_id_namespace: record.native_id_namespace,
            mime: record.mime,
            is_soft_block: record.is_soft_block,
            stored: StoredObject {
                storage_key: record.storage_key,
                location: record.location,
            },
            created_date: record.created_date,
            reused: true,
        };
        Self { fetch, outcome }
    }

    pub fn fetch(&self) -> &FetchResult {
        &self.fetch
    }

    pub fn id(&self) -> &str {
        &self.outcome.id
    }

    pub fn source_url(&self) -> &str {
        &self.outcome.source_url
    }

    pub fn is_soft_block(&self) -> bool {
        self.outcome.is_soft_block
    }

    pub fn mime(&self) -> MimeKind {
        self.outcome.mime
    }

    pub fn stored(&self) -> &StoredObject {
        &self.outcome.stored
    }

    pub fn storage_key(&self) -> &str {
        &self.outcome.stored.storage_key
    }

    pub fn created_date(&self) -> &str {
        &self.outcome.created_date
    }

    /// True when served from a previous harvest without touching the network.
    pub fn reused(&self) -> bool {
        self.outcome.reused
    }

    /// The metadata record written to the key-value index.
    pub fn record(&self) -> HarvestRecord {
        HarvestRecord {
            id: self.outcome.id.clone(),
            url: self.outcome.source_url.clone(),
            resolved_url: self.fetch.final_url.clone(),
            normalized_doi: normalize_doi(&self.outcome.source_url),
            native_id: self.outcome.native_id.clone(),
            native_id_namespace: self.outcome.native_id_namespace.clone(),
            status: self.fetch.status,
            content_type: self.fetch.content_type.clone(),
            mime: self.outcome.mime,
            is_soft_block: self.outcome.is_soft_block,
            storage_key: self.outcome.stored.storage_key.clone(),
            location: self.outcome.stored.location.clone(),
            redirect_chain: self.fetch.redirect_chain.hops().to_vec(),
            created_date: self.outcome.created_date.clone(),
        }
    }

    /// Flat field map for embedding in an API response. The body is omitted.
    pub fn to_response(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert("id".to_string(), Value::from(self.outcome.id.as_str()));
        map.insert("url".to_string(), Value::from(self.outcome.source_url.as_str()));
        map.insert("resolved_url".to_string(), Value::from(self.fetch.final_url.as_str()));
        map.insert("status".to_string(), Value::from(self.fetch.status));
        map.insert(
            "content_type".to_string(),
            self.fetch.content_type.as_deref().map_or(Value::Null, Value::from),
        );
        map.insert("mime".to_string(), Value::from(self.outcome.mime.as_str()));
        map.insert("is_soft_block".to_string(), Value::from(self.outcome.is_soft_block));
        map.insert(
            "storage_key".to_string(),
            Value::from(self.outcome.stored.storage_key.as_str()),
        );
        map.insert(
            "created_date".to_string(),
            Value::from(self.outcome.created_date.as_str()),
        );
        map.insert(
            "native_id".to_string(),
            self.outcome.native_id.as_deref().map_or(Value::Null, Value::from),
        );
        map.insert(
            "native_id_namespace".to_string(),
            self.outcome
                .native_id_namespace
                .as_deref()
                .map_or(Value::Null, Value::from),
        );
        map
    }
}

/// Index value: scalar fields plus the redirect chain as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestRecord {
    pub id: String,
    pub url: String,
    pub resolved_url: String,
    pub normalized_doi: Option<String>,
    pub native_id: Option<String>,
    pub native_id_namespace: Option<String>,
    pub status: u16,
    pub content_type: Option<String>,
    pub mime: MimeKind,
    pub is_soft_block: bool,
    pub storage_key: String,
    pub location: String,
    pub redirect_chain: Vec<String>,
    pub created_date: String,
}
