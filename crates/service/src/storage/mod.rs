//! Storage abstractions for the service layer
//!
//! `store` holds the authoritative in-memory map; `codec` turns snapshots of
//! it into the JSON file on disk and back.

pub mod codec;
pub mod store;

pub use codec::Snapshot;
pub use store::Store;
