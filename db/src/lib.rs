//! Nostr event index and query store (spec.md).

mod cursor;
mod db;
mod error;
mod event;
mod filter;
mod key;
mod query;
mod watchdog;

pub use cursor::Cursor;
pub use db::Db;
pub use error::Error;
pub use event::{Event, EventIndex};
pub use filter::{Filter, FilterIndex};
pub use query::QueryIter;

pub use nostr_kv as kv;
