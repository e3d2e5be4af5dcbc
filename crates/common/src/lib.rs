//! Shared building blocks for the cache workspace: logging setup,
//! environment helpers and the JSON body types the HTTP layer renders.

pub mod types;
pub mod utils;
pub mod env;
