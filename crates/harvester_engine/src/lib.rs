//! Harvester engine: resolve, fetch through the scraping proxy, classify, store.
mod classify;
mod decode;
mod harvest;
mod persist;
mod proxy;
mod resolve;
mod store;
mod types;

pub use classify::SoftBlockClassifier;
pub use decode::{decode_text, DecodedText};
pub use harvest::{Clock, EngineConfig, HarvestError, Harvester, ReharvestPolicy};
pub use persist::{ensure_storage_dir, AtomicFileWriter, PersistError};
pub use proxy::{
    ContentFetcher, FetchMode, ProxiedResponse, ProxySettings, ZyteFetcher,
    DEFAULT_PROXY_ENDPOINT,
};
pub use resolve::{ReqwestResolver, ResolveSettings, Resolver};
pub use store::{
    FsMetadataIndex, FsObjectStore, MemoryMetadataIndex, MemoryObjectStore, MetadataIndex,
    ObjectStore, StorageError,
};
pub use types::{FailureKind, FetchError};
