//! Resource registry for Predikit: downloads predictor artifacts and keeps
//! them in a per-user, content-addressed cache.

pub mod cache;
pub mod error;
pub mod fetch;

pub use cache::{sha256_file, CacheConfig, ResourceCache};
pub use error::CacheError;
pub use fetch::{FetchPolicy, HttpFetcher, ResourceFetcher};
