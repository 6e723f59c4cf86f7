//! Index key primitives.
//!
//! `ID`, `TS`, `TSID` and `KIND` are the bit-exact byte encodings every
//! bucket in [`crate::db`] keys on. `TSID` is the load-bearing one: it is
//! the only key ever stored in a time-sorted bucket, and lexicographic
//! order on it is (time ascending, id ascending) by construction.

pub const ID_LEN: usize = 32;
pub const TS_LEN: usize = 8;
pub const TSID_LEN: usize = TS_LEN + ID_LEN;
pub const KIND_LEN: usize = 8;

/// Maximum length, in bytes, of an indexable tag value.
pub const MAX_TAG_VALUE_LEN: usize = 200;

/// Big-endian encoding of a unix timestamp.
pub fn encode_ts(created_at: u64) -> [u8; TS_LEN] {
    created_at.to_be_bytes()
}

/// `TS (8) || ID (32)`, the primary ordering key for every time-indexed bucket.
pub fn encode_tsid(created_at: u64, id: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TSID_LEN);
    buf.extend_from_slice(&encode_ts(created_at));
    buf.extend_from_slice(id);
    buf
}

/// Big-endian encoding of a kind, widened to 64 bits.
pub fn encode_kind(kind: u64) -> [u8; KIND_LEN] {
    kind.to_be_bytes()
}

/// Splits a `TSID` back into its `(created_at, id)` parts. Panics if `tsid`
/// is not exactly [`TSID_LEN`] bytes; callers only ever pass keys read back
/// out of a `timestamp_ids`-shaped bucket, which is a store-level invariant
/// violation otherwise.
pub fn decode_tsid(tsid: &[u8]) -> (u64, &[u8]) {
    let (ts, id) = tsid.split_at(TS_LEN);
    let ts = u64::from_be_bytes(ts.try_into().expect("TS is 8 bytes"));
    (ts, id)
}

/// A tag is indexable iff its key is exactly one character and its value is
/// no longer than [`MAX_TAG_VALUE_LEN`] bytes (original_source/util.go
/// `makeEventIndexBytes`). Non-indexable tags are skipped, not rejected.
pub fn indexable_tag(tag: &[String]) -> Option<(u8, &str)> {
    let key = tag.first()?;
    let value = tag.get(1)?;
    if key.len() != 1 || value.len() > MAX_TAG_VALUE_LEN {
        return None;
    }
    Some((key.as_bytes()[0], value.as_str()))
}

/// Length-prefixed encoding of a tag value, used as the key prefix inside a
/// tag-key bucket: `len(value) as u8 || value`. All values for one tag key
/// share a single underlying tree (see `db::Db::tag_tree`); the length
/// prefix is what keeps one value's keys from being a byte-prefix of
/// another's when they're scanned out of the same tree.
pub fn encode_tag_value(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    debug_assert!(bytes.len() <= MAX_TAG_VALUE_LEN);
    let mut buf = Vec::with_capacity(1 + bytes.len());
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
    buf
}
