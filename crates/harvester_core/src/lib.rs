//! Harvester core: domain policy, redirect chains and the result model. No IO.
mod chain;
mod doi;
mod error;
mod key;
mod mime;
mod policy;
mod result;

pub use chain::RedirectChain;
pub use doi::{normalize_doi, source_url};
pub use error::InputError;
pub use key::{harvest_id, storage_key};
pub use mime::MimeKind;
pub use policy::{host_matches, host_of, DomainPolicy, PublisherParams};
pub use result::{
    FetchResult, HarvestOutcome, HarvestRecord, HarvestRequest, HarvestResult, StoredObject,
};
