// src/core/storage/mod.rs

pub mod cache_data;
pub mod cache_result;
pub mod provider_cache;

pub use cache_data::{Attributes, CacheData, Relationships, merge_relationships};
pub use cache_result::{CacheResult, CacheResultMap};
pub use provider_cache::ProviderCache;
