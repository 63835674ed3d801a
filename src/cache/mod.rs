//! File-per-key TTL cache backing every network-facing client.

pub mod encryption;
pub mod ttl_cache;

pub use encryption::{EncryptionCommand, ENCRYPTED_EXTENSION};
pub use ttl_cache::{CacheError, TtlCache};
