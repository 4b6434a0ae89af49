use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use harvest_logging::{harvest_info, harvest_warn};
use harvester_core::{
    harvest_id, source_url, storage_key, DomainPolicy, FetchResult, HarvestOutcome,
    HarvestRequest, HarvestResult, InputError, MimeKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::SoftBlockClassifier;
use crate::proxy::{ContentFetcher, ProxySettings, ZyteFetcher};
use crate::resolve::{ReqwestResolver, ResolveSettings, Resolver};
use crate::store::{FsMetadataIndex, FsObjectStore, MetadataIndex, ObjectStore, StorageError};
use crate::FetchError;

/// Produces the `created_date` stamp for new records.
pub type Clock = Arc<dyn Fn() -> String + Send + Sync>;

/// What to do when the index already holds a record for a URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReharvestPolicy {
    /// Fetch again and replace both the object and the record.
    #[default]
    Overwrite,
    /// Serve the stored copy without touching the network.
    ReuseExisting,
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid input: {0}")]
    Input(#[from] InputError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
    /// Only raised while building a harvester from configuration.
    #[error("invalid soft-block signature: {0}")]
    Signature(#[from] regex::Error),
}

#[derive(Clone)]
pub struct EngineConfig {
    pub resolve: ResolveSettings,
    pub proxy: ProxySettings,
    pub policy: DomainPolicy,
    pub storage_root: PathBuf,
    pub reharvest: ReharvestPolicy,
    pub extra_soft_block_signatures: Vec<String>,
    pub fetched_utc: Clock,
}

impl EngineConfig {
    pub fn default_with_output(storage_root: PathBuf, api_key: impl Into<String>) -> Self {
        Self {
            resolve: ResolveSettings::default(),
            proxy: ProxySettings::new(api_key),
            policy: DomainPolicy::builtin(),
            storage_root,
            reharvest: ReharvestPolicy::default(),
            extra_soft_block_signatures: Vec::new(),
            fetched_utc: utc_now(),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("resolve", &self.resolve)
            .field("proxy", &self.proxy)
            .field("policy", &self.policy)
            .field("storage_root", &self.storage_root)
            .field("reharvest", &self.reharvest)
            .field("extra_soft_block_signatures", &self.extra_soft_block_signatures)
            .finish_non_exhaustive()
    }
}

fn utc_now() -> Clock {
    Arc::new(|| chrono::Utc::now().to_rfc3339())
}

/// Resolve -> fetch -> classify -> store, strictly in sequence.
pub struct Harvester {
    resolver: Arc<dyn Resolver>,
    fetcher: Arc<dyn ContentFetcher>,
    objects: Arc<dyn ObjectStore>,
    index: Arc<dyn MetadataIndex>,
    policy: Arc<DomainPolicy>,
    classifier: SoftBlockClassifier,
    reharvest: ReharvestPolicy,
    fetched_utc: Clock,
}

impl Harvester {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        fetcher: Arc<dyn ContentFetcher>,
        objects: Arc<dyn ObjectStore>,
        index: Arc<dyn MetadataIndex>,
        policy: Arc<DomainPolicy>,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            objects,
            index,
            policy,
            classifier: SoftBlockClassifier::default(),
            reharvest: ReharvestPolicy::default(),
            fetched_utc: utc_now(),
        }
    }

    /// Wires the reqwest resolver, the proxy fetcher and filesystem storage
    /// under `storage_root/objects` and `storage_root/index`.
    pub fn from_config(config: EngineConfig) -> Result<Self, HarvestError> {
        let classifier =
            SoftBlockClassifier::with_extra_signatures(&config.extra_soft_block_signatures)?;
        let policy = Arc::new(config.policy);
        let resolver = ReqwestResolver::new(config.resolve, policy.clone())?;
        let fetcher = ZyteFetcher::new(config.proxy)?;
        let objects = FsObjectStore::new(config.storage_root.join("objects"));
        let index = FsMetadataIndex::new(config.storage_root.join("index"));

        Ok(Self::new(
            Arc::new(resolver),
            Arc::new(fetcher),
            Arc::new(objects),
            Arc::new(index),
            policy,
        )
        .with_classifier(classifier)
        .with_reharvest(config.reharvest)
        .with_clock(config.fetched_utc))
    }

    pub fn with_classifier(mut self, classifier: SoftBlockClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_reharvest(mut self, reharvest: ReharvestPolicy) -> Self {
        self.reharvest = reharvest;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.fetched_utc = clock;
        self
    }

    /// Resolve and fetch only; nothing is stored.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, HarvestError> {
        let source = source_url(url)?;
        Ok(self.fetch_source(&source).await?)
    }

    pub fn is_soft_block(&self, fetch: &FetchResult) -> bool {
        self.classifier.is_soft_block(fetch.body())
    }

    pub async fn harvest(&self, request: &HarvestRequest) -> Result<HarvestResult, HarvestError> {
        let source = source_url(&request.url)?;
        let id = harvest_id(&source);

        if self.reharvest == ReharvestPolicy::ReuseExisting {
            if let Some(existing) = self.existing(&id)? {
                harvest_info!("reusing stored harvest {id} for {source}");
                return Ok(existing);
            }
        }

        let fetch = self.fetch_source(&source).await?;
        let previous_key = self.index.get(&id)?.map(|record| record.storage_key);

        let mime = MimeKind::sniff(fetch.body(), fetch.content_type());
        let matched = self.classifier.matched_signatures(fetch.body());
        let is_soft_block = !matched.is_empty();
        if is_soft_block {
            harvest_warn!(
                "soft block at {} (signatures: {})",
                fetch.final_url(),
                matched.join(", ")
            );
        }

        let key = storage_key(&id, mime);
        let stored = self.objects.put(&key, fetch.body())?;
        harvest_info!("stored {} bytes for {source} at {}", fetch.byte_len(), stored.location);

        let result = HarvestResult::new(
            fetch,
            HarvestOutcome {
                id: id.clone(),
                source_url: source,
                native_id: request.native_id.clone(),
                native_id_namespace: request.native_id_namespace.clone(),
                mime,
                is_soft_block,
                stored,
                created_date: (self.fetched_utc)(),
                reused: false,
            },
        );
        self.index.put(&id, &result.record())?;

        if let Some(previous_key) = previous_key.filter(|previous| *previous != key) {
            if self.objects.delete(&previous_key)? {
                harvest_info!("removed replaced object {previous_key} for {}", result.source_url());
            }
        }
        Ok(result)
    }

    async fn fetch_source(&self, source: &str) -> Result<FetchResult, FetchError> {
        let chain = self.resolver.resolve(source).await?;
        let response = self.fetcher.fetch(chain.terminal(), &self.policy).await?;
        let content_type = response.content_type().map(str::to_string);
        Ok(FetchResult::new(
            chain,
            response.final_url,
            response.status,
            content_type,
            response.body,
        ))
    }

    fn existing(&self, id: &str) -> Result<Option<HarvestResult>, StorageError> {
        let Some(record) = self.index.get(id)? else {
            return Ok(None);
        };
        match self.objects.get(&record.storage_key)? {
            Some(body) => Ok(Some(HarvestResult::from_record(record, body))),
            None => {
                harvest_warn!("index record {id} points at missing object {}", record.storage_key);
                Ok(None)
            }
        }
    }
}
