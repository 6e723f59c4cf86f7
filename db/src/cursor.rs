//! Cursor algebra (spec.md §4.5): `Or` (union / max-merge) and `And`
//! (intersection / min-align) composable descending cursors over byte keys.
//!
//! Grounded on original_source/query.go's `orCursor`/`andCursor`. Every
//! cursor here works in TSID space: leaf cursors strip off whatever bucket
//! prefix they were scoped to before returning a key, so an `Or`/`And` can
//! freely mix children drawn from different sub-buckets.

use crate::error::Error;
use crate::key::TSID_LEN;
use nostr_kv::lmdb::{Transaction, Tree};
use std::collections::HashSet;
use std::ops::Bound;

pub type Item = (Vec<u8>, Vec<u8>);

/// A positioned, descending traversal over a sorted keyspace.
///
/// `Seek` uses the descending convention: it lands on the greatest key `<=
/// s` (spec.md §4.5). All three methods return `Ok(None)` once exhausted.
pub trait Cursor {
    fn last(&mut self) -> Result<Option<Item>, Error>;
    fn prev(&mut self) -> Result<Option<Item>, Error>;
    fn seek(&mut self, s: &[u8]) -> Result<Option<Item>, Error>;
}

/// A leaf cursor over one bucket, optionally scoped to a byte prefix (the
/// `kv` crate has no native nested sub-buckets, so `authors`/`kinds`/tag
/// buckets are each one physical tree keyed by `prefix || TSID`; this is
/// what makes such a tree behave like a set of independent sub-buckets).
///
/// Returned keys have the prefix stripped, so callers always see plain
/// TSID-space bytes regardless of which bucket produced them.
pub struct BucketCursor<'txn> {
    iter: nostr_kv::lmdb::Iter<'txn>,
    prefix: Vec<u8>,
    done: bool,
}

impl<'txn> BucketCursor<'txn> {
    /// A cursor over an entire bucket with no sub-bucket scoping, e.g.
    /// `timestamp_ids`.
    pub fn new<T: Transaction>(txn: &'txn T, tree: &Tree) -> Self {
        Self::scoped(txn, tree, Vec::new())
    }

    /// A cursor scoped to one sub-bucket, e.g. one author's `pubkey ||
    /// TSID` range within the shared `authors` tree.
    pub fn scoped<T: Transaction>(txn: &'txn T, tree: &Tree, prefix: Vec<u8>) -> Self {
        Self {
            iter: txn.iter(tree),
            prefix,
            done: false,
        }
    }

    /// Pads a TSID-space seek fragment (0, 8 or 40 bytes) out to the full
    /// 40-byte TSID with trailing `0xFF`, so a short `Until` fragment finds
    /// the greatest key sharing that time prefix rather than skipping it
    /// (variable-length byte comparison would otherwise treat any key
    /// sharing the fragment as a prefix as strictly greater than it).
    fn physical_key(&self, suffix: &[u8]) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(suffix);
        key.extend(std::iter::repeat(0xFFu8).take(TSID_LEN.saturating_sub(suffix.len())));
        key
    }

    fn strip_prefix(&mut self, item: Option<(&[u8], &[u8])>) -> Option<Item> {
        match item {
            Some((k, v)) if k.starts_with(&self.prefix) => {
                Some((k[self.prefix.len()..].to_vec(), v.to_vec()))
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

impl<'txn> Cursor for BucketCursor<'txn> {
    fn last(&mut self) -> Result<Option<Item>, Error> {
        self.seek(&[])
    }

    fn seek(&mut self, s: &[u8]) -> Result<Option<Item>, Error> {
        self.done = false;
        let key = self.physical_key(s);
        self.iter.seek(Bound::Included(key), true);
        let item = self.iter.next().transpose()?;
        Ok(self.strip_prefix(item))
    }

    fn prev(&mut self) -> Result<Option<Item>, Error> {
        if self.done {
            return Ok(None);
        }
        let item = self.iter.next().transpose()?;
        Ok(self.strip_prefix(item))
    }
}

/// A cursor over nothing, used when a selector's bucket (e.g. a tag key
/// that was never saved) doesn't exist at all — contributing it as an `And`
/// child makes the whole conjunction correctly empty (spec.md §4.6 point 4).
pub struct EmptyCursor;

impl Cursor for EmptyCursor {
    fn last(&mut self) -> Result<Option<Item>, Error> {
        Ok(None)
    }
    fn prev(&mut self) -> Result<Option<Item>, Error> {
        Ok(None)
    }
    fn seek(&mut self, _s: &[u8]) -> Result<Option<Item>, Error> {
        Ok(None)
    }
}

/// Union / max-merge over a non-empty set of child cursors (spec.md §4.5).
pub struct OrCursor<'txn> {
    children: Vec<Box<dyn Cursor + 'txn>>,
    current: Vec<Option<Item>>,
    emitted: HashSet<Vec<u8>>,
}

/// Builds an `Or` cursor, or returns the sole child directly when there is
/// exactly one (spec.md §4.5: "trivially returns its sole child").
pub fn or_cursor<'txn>(mut children: Vec<Box<dyn Cursor + 'txn>>) -> Box<dyn Cursor + 'txn> {
    assert!(!children.is_empty(), "OrCursor requires at least one child");
    if children.len() == 1 {
        return children.pop().unwrap();
    }
    let n = children.len();
    Box::new(OrCursor {
        children,
        current: vec![None; n],
        emitted: HashSet::new(),
    })
}

impl<'txn> OrCursor<'txn> {
    fn max(&self) -> Option<Vec<u8>> {
        self.current
            .iter()
            .filter_map(|item| item.as_ref().map(|(k, _)| k.clone()))
            .max()
    }

    fn emit_max(&mut self) -> Option<Item> {
        let max_key = self.max()?;
        self.emitted.insert(max_key.clone());
        let value = self
            .current
            .iter()
            .find(|item| item.as_ref().is_some_and(|(k, _)| k == &max_key))
            .and_then(|item| item.as_ref().map(|(_, v)| v.clone()))?;
        Some((max_key, value))
    }
}

impl<'txn> Cursor for OrCursor<'txn> {
    fn last(&mut self) -> Result<Option<Item>, Error> {
        self.emitted.clear();
        for (i, child) in self.children.iter_mut().enumerate() {
            self.current[i] = child.last()?;
        }
        Ok(self.emit_max())
    }

    fn seek(&mut self, s: &[u8]) -> Result<Option<Item>, Error> {
        self.emitted.clear();
        for (i, child) in self.children.iter_mut().enumerate() {
            self.current[i] = child.seek(s)?;
        }
        Ok(self.emit_max())
    }

    fn prev(&mut self) -> Result<Option<Item>, Error> {
        for i in 0..self.children.len() {
            while let Some((key, _)) = &self.current[i] {
                if self.emitted.contains(key) {
                    self.current[i] = self.children[i].prev()?;
                } else {
                    break;
                }
            }
        }
        Ok(self.emit_max())
    }
}

/// Intersection / min-align over a non-empty set of child cursors
/// (spec.md §4.5).
pub struct AndCursor<'txn> {
    children: Vec<Box<dyn Cursor + 'txn>>,
    current: Vec<Option<Item>>,
}

/// Builds an `And` cursor, or returns the sole child directly when there is
/// exactly one.
pub fn and_cursor<'txn>(mut children: Vec<Box<dyn Cursor + 'txn>>) -> Box<dyn Cursor + 'txn> {
    assert!(!children.is_empty(), "AndCursor requires at least one child");
    if children.len() == 1 {
        return children.pop().unwrap();
    }
    let n = children.len();
    Box::new(AndCursor {
        children,
        current: vec![None; n],
    })
}

impl<'txn> AndCursor<'txn> {
    fn min_key(&self) -> Option<Vec<u8>> {
        // A child positioned at `None` sorts as +infinity: any exhausted
        // child means the intersection has nothing left below it, so the
        // overall min is only meaningful while every child holds a key.
        let mut min: Option<&Vec<u8>> = None;
        for item in &self.current {
            match item {
                None => return None,
                Some((k, _)) => {
                    let smaller = match min {
                        None => true,
                        Some(m) => k < m,
                    };
                    if smaller {
                        min = Some(k);
                    }
                }
            }
        }
        min.cloned()
    }
}

impl<'txn> Cursor for AndCursor<'txn> {
    fn last(&mut self) -> Result<Option<Item>, Error> {
        for (i, child) in self.children.iter_mut().enumerate() {
            self.current[i] = child.last()?;
        }
        self.prev()
    }

    fn seek(&mut self, s: &[u8]) -> Result<Option<Item>, Error> {
        for (i, child) in self.children.iter_mut().enumerate() {
            self.current[i] = child.seek(s)?;
        }
        self.prev()
    }

    fn prev(&mut self) -> Result<Option<Item>, Error> {
        loop {
            let Some(min) = self.min_key() else {
                return Ok(None);
            };
            let mut all_aligned = true;
            for i in 0..self.children.len() {
                let mut item = self.children[i].seek(&min)?;
                while let Some((k, _)) = &item {
                    if k > &min {
                        item = self.children[i].prev()?;
                    } else {
                        break;
                    }
                }
                let aligned = matches!(&item, Some((k, _)) if k == &min);
                all_aligned &= aligned;
                self.current[i] = item;
            }
            if all_aligned {
                let value = self.current[0].as_ref().map(|(_, v)| v.clone());
                for i in 0..self.children.len() {
                    self.current[i] = self.children[i].prev()?;
                }
                return Ok(value.map(|v| (min, v)));
            }
        }
    }
}
