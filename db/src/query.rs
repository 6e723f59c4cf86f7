//! Query planner (spec.md §4.6): picks one of four strategies from a
//! validated filter and returns a lazily-advancing iterator over matching
//! events, newest first.
//!
//! Grounded on original_source/query.go's `switch` over which selectors
//! are present. Two departures from a literal port, both preserved
//! deliberately (see DESIGN.md): when `ids` is non-empty, the id-lookup
//! strategies take over unconditionally rather than joining with any other
//! selector present in the same filter, and a tag key nobody has ever
//! saved resolves to an [`crate::cursor::EmptyCursor`] rather than an error.

use crate::cursor::{and_cursor, or_cursor, BucketCursor, Cursor, EmptyCursor};
use crate::db::Db;
use crate::error::Error;
use crate::event::Event;
use crate::filter::{encode_filter, Filter, FilterIndex};
use crate::key::{self, ID_LEN};
use crate::watchdog::Watchdog;
use nostr_kv::lmdb::{Reader, Transaction};

impl Db {
    /// Runs `filter` against the store. `reader` is borrowed for the
    /// lifetime of the returned iterator, mirroring `kv`'s own
    /// `Transaction::iter`/`iter_from` borrowing idiom.
    ///
    /// An invalid filter is logged and yields an iterator with no items,
    /// rather than surfacing the validation error to the caller (spec.md
    /// §4.6, "surprising" but literal behavior — see DESIGN.md).
    pub fn query_events<'r>(
        &self,
        reader: &'r Reader<'r>,
        filter: &Filter,
    ) -> Result<QueryIter<'r>, Error> {
        let mut filter = filter.clone();
        let full_ids = match filter.validate() {
            Ok(full_ids) => full_ids,
            Err(e) => {
                tracing::warn!("rejecting invalid filter: {e}");
                return Ok(QueryIter::Buffered(Vec::new().into_iter()));
            }
        };
        let findex = encode_filter(&filter, full_ids)?;
        let watchdog = Watchdog::start("QueryEvents", format!("{:?}", filter));

        if !findex.ids.is_empty() {
            return if findex.full_ids {
                self.query_by_exact_ids(reader, &findex)
            } else {
                self.query_by_id_prefixes(reader, &findex)
            };
        }

        let has_selectors =
            !findex.authors.is_empty() || !findex.kinds.is_empty() || !findex.tags.is_empty();

        let cursor: Box<dyn Cursor + 'r> = if has_selectors {
            self.conjunctive_cursor(reader, &findex)?
        } else {
            Box::new(BucketCursor::new(reader, &self.t_timestamp_ids))
        };

        CursorQuery::new(cursor, reader, self.t_events.clone(), &findex, watchdog)
            .map(QueryIter::Cursor)
    }

    /// Strategy 2: direct `events` lookups, in the caller's requested order
    /// (spec.md §4.6 point 2 — ignores every other selector and all time
    /// bounds once `ids` is present and every id is a full 64-hex string).
    fn query_by_exact_ids<'r>(
        &self,
        reader: &'r Reader<'r>,
        findex: &FilterIndex,
    ) -> Result<QueryIter<'r>, Error> {
        let mut seen = std::collections::HashSet::new();
        let mut events = Vec::new();
        for id in &findex.ids {
            if events.len() >= findex.limit as usize {
                break;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(blob) = reader.get(&self.t_events, id)? {
                events.push(Event::from_blob(blob));
            }
        }
        Ok(QueryIter::Buffered(events.into_iter()))
    }

    /// Strategy 3: ascending byte-prefix scan over `events`' id keyspace,
    /// one prefix at a time, ignoring time bounds and every other selector
    /// (spec.md §4.6 point 3). Reachable only when some requested id is
    /// shorter than 64 hex characters.
    fn query_by_id_prefixes<'r>(
        &self,
        reader: &'r Reader<'r>,
        findex: &FilterIndex,
    ) -> Result<QueryIter<'r>, Error> {
        let mut events = Vec::new();
        let limit = findex.limit as usize;
        'outer: for prefix in &findex.ids {
            let mut iter = reader.iter_from(
                &self.t_events,
                std::ops::Bound::Included(prefix.clone()),
                false,
            );
            while let Some(item) = iter.next().transpose()? {
                let (id, blob) = item;
                if !id.starts_with(prefix.as_slice()) {
                    break;
                }
                events.push(Event::from_blob(blob));
                if events.len() >= limit {
                    break 'outer;
                }
            }
        }
        Ok(QueryIter::Buffered(events.into_iter()))
    }

    /// Strategy 4: `And` of one `Or`-per-selector-kind (spec.md §4.6 point
    /// 4). A tag key with no backing tree contributes an `EmptyCursor`,
    /// making the whole conjunction empty rather than erroring.
    fn conjunctive_cursor<'r>(
        &self,
        reader: &'r Reader<'r>,
        findex: &FilterIndex,
    ) -> Result<Box<dyn Cursor + 'r>, Error> {
        let mut groups: Vec<Box<dyn Cursor + 'r>> = Vec::new();

        if !findex.authors.is_empty() {
            let children = findex
                .authors
                .iter()
                .map(|pubkey| {
                    Box::new(BucketCursor::scoped(reader, &self.t_authors, pubkey.to_vec()))
                        as Box<dyn Cursor + 'r>
                })
                .collect();
            groups.push(or_cursor(children));
        }

        if !findex.kinds.is_empty() {
            let children = findex
                .kinds
                .iter()
                .map(|kind| {
                    Box::new(BucketCursor::scoped(reader, &self.t_kinds, kind.to_vec()))
                        as Box<dyn Cursor + 'r>
                })
                .collect();
            groups.push(or_cursor(children));
        }

        for (tag_key, values) in &findex.tags {
            let group: Box<dyn Cursor + 'r> = match self.tag_tree_if_exists(*tag_key)? {
                None => Box::new(EmptyCursor),
                Some(tree) => {
                    let children = values
                        .iter()
                        .map(|value| {
                            Box::new(BucketCursor::scoped(reader, &tree, value.clone()))
                                as Box<dyn Cursor + 'r>
                        })
                        .collect();
                    or_cursor(children)
                }
            };
            groups.push(group);
        }

        Ok(and_cursor(groups))
    }
}

/// A lazily-advancing, newest-first iterator over matching events.
pub enum QueryIter<'r> {
    Cursor(CursorQuery<'r>),
    Buffered(std::vec::IntoIter<Result<Event, Error>>),
}

impl<'r> Iterator for QueryIter<'r> {
    type Item = Result<Event, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            QueryIter::Cursor(q) => q.next(),
            QueryIter::Buffered(it) => it.next(),
        }
    }
}

/// Backs strategies 1 (no selectors) and 4 (conjunctive) — walks a
/// descending [`Cursor`] over TSID keys, resolving each to its event and
/// stopping at `since`/`limit`.
pub struct CursorQuery<'r> {
    cursor: Box<dyn Cursor + 'r>,
    reader: &'r Reader<'r>,
    t_events: nostr_kv::lmdb::Tree,
    current: Option<(Vec<u8>, Vec<u8>)>,
    since: u64,
    remaining: u32,
    _watchdog: Watchdog,
}

impl<'r> CursorQuery<'r> {
    fn new(
        mut cursor: Box<dyn Cursor + 'r>,
        reader: &'r Reader<'r>,
        t_events: nostr_kv::lmdb::Tree,
        findex: &FilterIndex,
        watchdog: Watchdog,
    ) -> Result<Self, Error> {
        let current = match findex.until {
            Some(until) => cursor.seek(&until)?,
            None => cursor.last()?,
        };
        Ok(Self {
            cursor,
            reader,
            t_events,
            current,
            since: u64::from_be_bytes(findex.since),
            remaining: findex.limit,
            _watchdog: watchdog,
        })
    }
}

impl<'r> Iterator for CursorQuery<'r> {
    type Item = Result<Event, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == 0 {
                return None;
            }
            let (tsid, _) = self.current.take()?;
            let (ts, id) = key::decode_tsid(&tsid);
            if ts < self.since {
                return None;
            }
            debug_assert_eq!(id.len(), ID_LEN);

            self.current = match self.cursor.prev() {
                Ok(next) => next,
                Err(e) => return Some(Err(e)),
            };

            match self.reader.get(&self.t_events, id) {
                Ok(Some(blob)) => {
                    self.remaining -= 1;
                    return Some(Event::from_blob(blob));
                }
                // Index entry with no backing blob: a store-level
                // inconsistency, not a match. Skip it and keep walking.
                Ok(None) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
