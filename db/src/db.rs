//! Store schema (spec.md §3) and Writer (spec.md §4.3/§4.4).
//!
//! `kv` trees map directly to spec.md's top-level buckets. `kv` has no
//! native nested sub-buckets (LMDB named databases are flat), so a
//! `<bucket>[subkey]` sub-bucket from the spec is realized as one shared
//! tree keyed by `subkey || TSID`: `authors` and `kinds` use a fixed-length
//! subkey (pubkey, KIND) so no two subkeys can alias as byte prefixes of
//! one another; tag buckets use `encode_tag_value`'s length prefix for the
//! same reason. [`crate::cursor::BucketCursor`] is what scopes a cursor to
//! one subkey's range and strips it back off.
//!
//! One consequence: invariant 3 ("sub-buckets are deleted when empty") is
//! satisfied by construction rather than by an explicit delete-if-empty
//! step — there is no separate container object per subkey to drop, so
//! deleting an entry's row *is* the complete removal of its "sub-bucket".

use crate::error::Error;
use crate::event::{Event, EventIndex};
use crate::key;
use crate::watchdog::Watchdog;
use nostr_kv::lmdb::{Db as KvDb, Reader, Transaction, Tree};
use std::time::{Duration, Instant};

const INIT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_DBS: u32 = 64;

pub struct Db {
    kv: KvDb,
    pub(crate) t_events: Tree,
    pub(crate) t_timestamps: Tree,
    pub(crate) t_timestamp_ids: Tree,
    pub(crate) t_authors: Tree,
    pub(crate) t_kinds: Tree,
}

impl Db {
    /// Opens (creating if absent) the store at `path`, creating the
    /// top-level buckets on first open in the order `events`, `authors`,
    /// `kinds`, `timestamps`, `timestamp_ids` (spec.md §4.8). Tag buckets
    /// are created lazily by the writer.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Error> {
        let kv = Self::open_kv_with_retry(path)?;
        let t_events = kv.open_tree(Some("events"), 0)?;
        let t_authors = kv.open_tree(Some("authors"), 0)?;
        let t_kinds = kv.open_tree(Some("kinds"), 0)?;
        let t_timestamps = kv.open_tree(Some("timestamps"), 0)?;
        let t_timestamp_ids = kv.open_tree(Some("timestamp_ids"), 0)?;
        Ok(Self {
            kv,
            t_events,
            t_timestamps,
            t_timestamp_ids,
            t_authors,
            t_kinds,
        })
    }

    /// LMDB has no native "wait up to N seconds for the environment lock"
    /// knob the way bbolt does; this approximates original_source/init.go's
    /// `bolt.Options{Timeout: 1 * time.Second}` by retrying env-open on a
    /// transient failure until the deadline.
    fn open_kv_with_retry<P: AsRef<std::path::Path>>(path: P) -> Result<KvDb, Error> {
        let deadline = Instant::now() + INIT_LOCK_TIMEOUT;
        loop {
            match KvDb::open_with(&path, Some(MAX_DBS), Some(100), Some(1_000_000_000_000), 0) {
                Ok(db) => return Ok(db),
                Err(e) if Instant::now() < deadline => {
                    tracing::warn!("retrying store open after {e}");
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn reader(&self) -> Result<Reader, Error> {
        Ok(self.kv.reader()?)
    }

    /// The shared tree holding every `<tagKey>[value]` sub-bucket for one
    /// single-character tag key. Created lazily on first use.
    pub(crate) fn tag_tree(&self, tag_key: u8) -> Result<Tree, Error> {
        Ok(self.kv.open_tree(Some(&tag_tree_name(tag_key)), 0)?)
    }

    /// Like [`Db::tag_tree`] but never creates the tree — used by the query
    /// planner, where a tag key nobody ever saved must be treated as an
    /// empty selector rather than silently vivifying its bucket.
    pub(crate) fn tag_tree_if_exists(&self, tag_key: u8) -> Result<Option<Tree>, Error> {
        let name = tag_tree_name(tag_key);
        if self.kv.tree_exists(&name)? {
            Ok(Some(self.kv.open_tree(Some(&name), 0)?))
        } else {
            Ok(None)
        }
    }

    /// Idempotent: a `SaveEvent` of an already-present id is a no-op
    /// (spec.md §3 invariant 4, §4.3 step 1).
    pub fn save_event(&self, event: &Event) -> Result<(), Error> {
        let _watchdog = Watchdog::start("SaveEvent", hex::encode(&event.id));
        let index = EventIndex::encode(event)?;

        {
            let reader = self.kv.reader()?;
            if reader.get(&self.t_events, &index.id)?.is_some() {
                return Ok(());
            }
        }

        let blob = event.to_blob()?;
        let tag_trees = index
            .tags
            .iter()
            .map(|(k, _)| Ok::<_, Error>((*k, self.tag_tree(*k)?)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut writer = self.kv.writer()?;
        writer.put(&self.t_events, &index.id, &blob)?;
        writer.put(
            &self.t_timestamps,
            &index.id,
            key::encode_ts(index.created_at),
        )?;
        writer.put(&self.t_timestamp_ids, &index.tsid, b"")?;

        let author_key = concat(&index.pubkey, &index.tsid);
        writer.put(&self.t_authors, &author_key, b"")?;

        let kind_key = concat(&index.kind_bytes, &index.tsid);
        writer.put(&self.t_kinds, &kind_key, b"")?;

        for ((_, value), (_, tree)) in index.tags.iter().zip(tag_trees.iter()) {
            let value_key = concat(&key::encode_tag_value(value), &index.tsid);
            writer.put(tree, &value_key, b"")?;
        }

        writer.commit()?;
        Ok(())
    }

    /// Requires proof-of-authorship through `(pubkey, id)`: only acts if
    /// `authors[pubkey]` contains this event (spec.md §3 Lifecycle, §4.4).
    pub fn delete_event(&self, id: &[u8], pubkey: &[u8]) -> Result<(), Error> {
        let _watchdog = Watchdog::start("DeleteEvent", hex::encode(id));

        let created_at = {
            let reader = self.kv.reader()?;
            match reader.get(&self.t_timestamps, id)? {
                Some(ts) => u64::from_be_bytes(ts.try_into()?),
                None => return Err(Error::NoTimestamp),
            }
        };
        let tsid = key::encode_tsid(created_at, id);
        let claimed_author_key = concat(pubkey, &tsid);

        {
            let reader = self.kv.reader()?;
            if reader.get(&self.t_authors, &claimed_author_key)?.is_none() {
                // Claimed pubkey didn't author this event: authorization
                // miss, silent no-op (spec.md §4.4 step 3).
                return Ok(());
            }
        }

        let blob = {
            let reader = self.kv.reader()?;
            match reader.get(&self.t_events, id)? {
                Some(b) => b.to_vec(),
                None => return Ok(()),
            }
        };
        // The stored event's own pubkey governs index cleanup (spec.md
        // §4.4 step 4) — here it's the same key we just authorized
        // against, but we decode to reconstruct the indexed tags.
        let event = Event::from_blob(&blob)?;
        let index = EventIndex::encode(&event)?;

        let mut writer = self.kv.writer()?;
        writer.del(&self.t_events, id, None)?;
        writer.del(&self.t_timestamps, id, None)?;
        writer.del(&self.t_timestamp_ids, &tsid, None)?;
        writer.del(&self.t_authors, &concat(&index.pubkey, &tsid), None)?;
        writer.del(&self.t_kinds, &concat(&index.kind_bytes, &tsid), None)?;
        for (tag_key, value) in &index.tags {
            let tree = self.tag_tree(*tag_key)?;
            let value_key = concat(&key::encode_tag_value(value), &tsid);
            writer.del(&tree, &value_key, None)?;
        }
        writer.commit()?;
        Ok(())
    }
}

fn tag_tree_name(tag_key: u8) -> String {
    format!("tag_{tag_key:02x}")
}

fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}
