// src/core/mod.rs

//! The central module containing the core logic and data structures of the cache engine.

pub mod agent;
pub mod clock;
pub mod errors;
pub mod keys;
pub mod metrics;
pub mod on_demand_updater;
pub mod state;
pub mod storage;
pub mod tasks;

pub use errors::CacheError;
pub use keys::{Namespace, ResourceKey};
