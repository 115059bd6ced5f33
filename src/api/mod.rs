//! Inventory backend integration: HTTP client, domain model, resource keys
//! and the cached service facade.

pub mod client;
pub mod keys;
pub mod model;
pub mod service;
pub mod types;
