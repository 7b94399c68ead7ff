//! Resource acquisition for folio: a write-once URL cache and the network fetcher.

mod cache;
mod error;
mod fetch;

pub use cache::{resolve_cache_store_path, CacheLocation, ResourceCache};
pub use error::StoreError;
pub use fetch::{FetchResponse, Fetcher, HttpFetcher, DEFAULT_HTTP_TIMEOUT};
