use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use harvester_core::{
    harvest_id, DomainPolicy, HarvestRecord, HarvestRequest, MimeKind, RedirectChain,
    StoredObject,
};
use harvester_engine::{
    ContentFetcher, EngineConfig, FailureKind, FetchError, FetchMode, HarvestError, Harvester,
    MemoryMetadataIndex, MemoryObjectStore, MetadataIndex, ObjectStore, ProxiedResponse,
    ReharvestPolicy, Resolver, StorageError,
};
use pretty_assertions::assert_eq;

const ARTICLE: &str = "<html><head><title>On Graphs</title></head><body>Abstract</body></html>";
const CAPTCHA: &str =
    "<html><head><title>Security check</title></head><body>Please verify you are a human</body></html>";

/// Redirects every start URL through a fixed landing page.
struct FixedResolver {
    hops: Vec<&'static str>,
}

#[async_trait]
impl Resolver for FixedResolver {
    async fn resolve(&self, url: &str) -> Result<RedirectChain, FetchError> {
        let mut chain = RedirectChain::new(url);
        for hop in &self.hops {
            chain.push(*hop);
        }
        Ok(chain)
    }
}

struct FailingResolver;

#[async_trait]
impl Resolver for FailingResolver {
    async fn resolve(&self, _url: &str) -> Result<RedirectChain, FetchError> {
        Err(FetchError {
            kind: FailureKind::Network,
            message: "connection refused".to_string(),
        })
    }
}

struct StaticFetcher {
    body: &'static str,
    calls: AtomicUsize,
}

impl StaticFetcher {
    fn new(body: &'static str) -> Self {
        Self {
            body,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, _policy: &DomainPolicy) -> Result<ProxiedResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProxiedResponse {
            status: 200,
            final_url: url.to_string(),
            headers: vec![("Content-Type".to_string(), "text/html".to_string())],
            body: self.body.as_bytes().to_vec(),
            mode: FetchMode::Plain,
        })
    }
}

/// Serves the queued bodies in order, one per call.
struct SequenceFetcher {
    responses: Mutex<Vec<(&'static str, &'static [u8])>>,
}

#[async_trait]
impl ContentFetcher for SequenceFetcher {
    async fn fetch(&self, url: &str, _policy: &DomainPolicy) -> Result<ProxiedResponse, FetchError> {
        let (content_type, body) = self.responses.lock().unwrap().remove(0);
        Ok(ProxiedResponse {
            status: 200,
            final_url: url.to_string(),
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.to_vec(),
            mode: FetchMode::Plain,
        })
    }
}

struct RejectingIndex;

impl MetadataIndex for RejectingIndex {
    fn put(&self, id: &str, _record: &HarvestRecord) -> Result<(), StorageError> {
        Err(StorageError::InvalidKey(id.to_string()))
    }

    fn get(&self, _id: &str) -> Result<Option<HarvestRecord>, StorageError> {
        Ok(None)
    }
}

struct Fixture {
    fetcher: Arc<StaticFetcher>,
    objects: Arc<MemoryObjectStore>,
    index: Arc<MemoryMetadataIndex>,
    harvester: Harvester,
}

fn fixture(body: &'static str) -> Fixture {
    harvest_logging::initialize_for_tests();
    let fetcher = Arc::new(StaticFetcher::new(body));
    let objects = Arc::new(MemoryObjectStore::new());
    let index = Arc::new(MemoryMetadataIndex::new());
    let harvester = Harvester::new(
        Arc::new(FixedResolver {
            hops: vec!["https://publisher.example.org/article/42"],
        }),
        fetcher.clone(),
        objects.clone(),
        index.clone(),
        Arc::new(DomainPolicy::builtin()),
    )
    .with_clock(Arc::new(|| "2026-01-02T03:04:05+00:00".to_string()));
    Fixture {
        fetcher,
        objects,
        index,
        harvester,
    }
}

#[tokio::test]
async fn successful_harvest_writes_one_object_and_one_record() {
    let fx = fixture(ARTICLE);

    let result = fx
        .harvester
        .harvest(&HarvestRequest::new("10.1234/Graph.42"))
        .await
        .expect("harvest ok");

    assert_eq!(fx.objects.len(), 1);
    assert_eq!(fx.index.len(), 1);
    let record = fx.index.records().remove(0);
    assert_eq!(record.storage_key, result.storage_key());
    assert_eq!(fx.objects.keys(), vec![result.storage_key().to_string()]);

    assert_eq!(result.source_url(), "https://doi.org/10.1234/graph.42");
    assert_eq!(result.id(), harvest_id("https://doi.org/10.1234/graph.42"));
    assert_eq!(result.mime(), MimeKind::Html);
    assert!(!result.is_soft_block());
    assert!(!result.reused());
    assert_eq!(result.storage_key(), format!("html/{}.html", result.id()));

    assert_eq!(record.normalized_doi.as_deref(), Some("10.1234/graph.42"));
    assert_eq!(record.created_date, "2026-01-02T03:04:05+00:00");
    assert_eq!(
        record.redirect_chain,
        vec![
            "https://doi.org/10.1234/graph.42".to_string(),
            "https://publisher.example.org/article/42".to_string(),
        ]
    );
}

#[tokio::test]
async fn redirect_chain_ends_at_final_url() {
    let fx = fixture(ARTICLE);
    let result = fx
        .harvester
        .harvest(&HarvestRequest::new("https://doi.org/10.1/x"))
        .await
        .unwrap();

    let fetch = result.fetch();
    assert_eq!(fetch.redirect_chain().terminal(), fetch.final_url());
    assert_eq!(fetch.status(), 200);
    assert_eq!(fetch.content_type(), Some("text/html"));
}

#[tokio::test]
async fn transport_failure_writes_nothing() {
    harvest_logging::initialize_for_tests();
    let objects = Arc::new(MemoryObjectStore::new());
    let index = Arc::new(MemoryMetadataIndex::new());
    let fetcher = Arc::new(StaticFetcher::new(ARTICLE));
    let harvester = Harvester::new(
        Arc::new(FailingResolver),
        fetcher.clone(),
        objects.clone(),
        index.clone(),
        Arc::new(DomainPolicy::builtin()),
    );

    let err = harvester
        .harvest(&HarvestRequest::new("https://doi.org/10.1/x"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HarvestError::Fetch(FetchError {
            kind: FailureKind::Network,
            ..
        })
    ));
    assert_eq!(fetcher.calls(), 0);
    assert!(objects.is_empty());
    assert!(index.is_empty());
}

#[tokio::test]
async fn soft_block_is_flagged_and_still_stored() {
    let fx = fixture(CAPTCHA);
    let result = fx
        .harvester
        .harvest(&HarvestRequest::new("https://doi.org/10.1/blocked"))
        .await
        .unwrap();

    assert!(result.is_soft_block());
    assert!(fx.index.records()[0].is_soft_block);
    assert_eq!(fx.objects.len(), 1);
    assert_eq!(result.to_response()["is_soft_block"], serde_json::json!(true));
}

#[tokio::test]
async fn native_ids_are_carried_into_the_record() {
    let fx = fixture(ARTICLE);
    let request = HarvestRequest::new("https://doi.org/10.1/x").with_native_id("pmh", "oai:1");
    let result = fx.harvester.harvest(&request).await.unwrap();

    let record = fx.index.records().remove(0);
    assert_eq!(record.native_id.as_deref(), Some("oai:1"));
    assert_eq!(record.native_id_namespace.as_deref(), Some("pmh"));
    assert_eq!(result.to_response()["native_id"], serde_json::json!("oai:1"));
}

#[tokio::test]
async fn overwrite_policy_fetches_again() {
    let fx = fixture(ARTICLE);
    let request = HarvestRequest::new("https://doi.org/10.1/x");
    fx.harvester.harvest(&request).await.unwrap();
    fx.harvester.harvest(&request).await.unwrap();

    assert_eq!(fx.fetcher.calls(), 2);
    assert_eq!(fx.objects.len(), 1);
    assert_eq!(fx.index.len(), 1);
}

#[tokio::test]
async fn overwrite_removes_object_stored_under_a_previous_mime() {
    harvest_logging::initialize_for_tests();
    let objects = Arc::new(MemoryObjectStore::new());
    let index = Arc::new(MemoryMetadataIndex::new());
    let harvester = Harvester::new(
        Arc::new(FixedResolver { hops: Vec::new() }),
        Arc::new(SequenceFetcher {
            responses: Mutex::new(vec![
                ("text/html", ARTICLE.as_bytes()),
                ("application/pdf", &b"%PDF-1.7 full text"[..]),
            ]),
        }),
        objects.clone(),
        index.clone(),
        Arc::new(DomainPolicy::builtin()),
    );
    let request = HarvestRequest::new("https://doi.org/10.1/x");

    let landing = harvester.harvest(&request).await.unwrap();
    let pdf = harvester.harvest(&request).await.unwrap();

    assert_eq!(landing.mime(), MimeKind::Html);
    assert_eq!(pdf.mime(), MimeKind::Pdf);
    assert_eq!(objects.keys(), vec![pdf.storage_key().to_string()]);
    assert_eq!(index.len(), 1);
    assert_eq!(index.records()[0].storage_key, pdf.storage_key());
    assert_eq!(objects.get(landing.storage_key()).unwrap(), None);
}

#[tokio::test]
async fn reuse_policy_serves_stored_copy_without_network() {
    let fx = fixture(ARTICLE);
    let harvester = fx.harvester.with_reharvest(ReharvestPolicy::ReuseExisting);
    let request = HarvestRequest::new("https://doi.org/10.1/x");

    let first = harvester.harvest(&request).await.unwrap();
    let second = harvester.harvest(&request).await.unwrap();

    assert_eq!(fx.fetcher.calls(), 1);
    assert!(second.reused());
    assert_eq!(second.storage_key(), first.storage_key());
    assert_eq!(second.fetch().body(), ARTICLE.as_bytes());
    assert_eq!(second.record(), first.record());
}

#[tokio::test]
async fn index_failure_surfaces_after_object_write() {
    harvest_logging::initialize_for_tests();
    let objects = Arc::new(MemoryObjectStore::new());
    let harvester = Harvester::new(
        Arc::new(FixedResolver { hops: Vec::new() }),
        Arc::new(StaticFetcher::new(ARTICLE)),
        objects.clone(),
        Arc::new(RejectingIndex),
        Arc::new(DomainPolicy::builtin()),
    );

    let err = harvester
        .harvest(&HarvestRequest::new("https://doi.org/10.1/x"))
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::Storage(StorageError::InvalidKey(_))));
    // The object write is not rolled back.
    assert_eq!(objects.len(), 1);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_io() {
    let fx = fixture(ARTICLE);
    let err = fx
        .harvester
        .harvest(&HarvestRequest::new("ftp://example.org/x"))
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::Input(_)));
    assert_eq!(fx.fetcher.calls(), 0);
}

#[tokio::test]
async fn fetch_only_writes_nothing() {
    let fx = fixture(CAPTCHA);
    let fetch = fx.harvester.fetch("10.1/x").await.unwrap();

    assert!(fx.harvester.is_soft_block(&fetch));
    assert_eq!(fetch.final_url(), "https://publisher.example.org/article/42");
    assert!(fx.objects.is_empty());
    assert!(fx.index.is_empty());
}

#[test]
fn stored_object_location_is_reported() {
    let store = MemoryObjectStore::new();
    let stored = store.put("pdf/abc.pdf", b"%PDF-1.4").unwrap();
    assert_eq!(
        stored,
        StoredObject {
            storage_key: "pdf/abc.pdf".to_string(),
            location: "memory://pdf/abc.pdf".to_string(),
        }
    );
    assert_eq!(store.get("pdf/abc.pdf").unwrap().as_deref(), Some(&b"%PDF-1.4"[..]));
}

#[test]
fn invalid_extra_signature_is_a_configuration_error() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut config = EngineConfig::default_with_output(temp.path().to_path_buf(), "key");
    config.extra_soft_block_signatures = vec!["(unclosed".to_string()];

    assert!(matches!(
        Harvester::from_config(config),
        Err(HarvestError::Signature(_))
    ));
}
