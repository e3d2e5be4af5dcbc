//! Service layer for the key-value cache.
//! - `storage`: the locked in-memory map and its JSON snapshot codec.
//! - `persistence`: bounded snapshot queue and the background writer.
//! - `cache_service`: validated get/set/delete/list entry point used by HTTP handlers.

pub mod errors;
pub mod storage;
pub mod persistence;
pub mod cache_service;
pub mod observability;

pub use cache_service::CacheService;
pub use errors::ServiceError;
