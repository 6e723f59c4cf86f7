//! Generic transactional ordered key-value store.
//!
//! This is the external collaborator the index/query subsystem in `nostr-db`
//! is built on top of: named buckets (`Tree`), single-writer/multi-reader
//! transactions, and byte-ordered cursors. It knows nothing about events,
//! filters, or the nostr protocol.

pub mod error;
pub mod lmdb;

pub use error::Error;
