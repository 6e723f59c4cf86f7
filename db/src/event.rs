//! Event encoding: the `EventIndex` built from a raw [`Event`] is what the
//! [`crate::key`] primitives and [`crate::db::Db`] operate on.

use crate::error::Error;
use crate::key::{self, indexable_tag, KIND_LEN, TSID_LEN};
use serde::{Deserialize, Serialize};

/// A signed event, exactly as received from a client. This crate does not
/// validate the signature or the id digest; that's a caller concern
/// (spec.md §1, "event validation, signature checking ... out of scope").
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Event {
    #[serde(with = "hex::serde")]
    pub id: Vec<u8>,

    #[serde(with = "hex::serde")]
    pub pubkey: Vec<u8>,

    pub created_at: u64,

    pub kind: u64,

    #[serde(default)]
    pub tags: Vec<Vec<String>>,

    #[serde(default)]
    pub content: String,

    #[serde(with = "hex::serde")]
    pub sig: Vec<u8>,
}

impl Event {
    /// Decodes a single self-describing JSON blob, the exact inverse of
    /// [`Event::to_blob`].
    pub fn from_blob(blob: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(blob)?)
    }

    /// Serializes to the opaque byte blob stored in the `events` bucket.
    pub fn to_blob(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// The byte-level index keys derived from an [`Event`] (spec.md §4.1).
#[derive(Debug, Clone)]
pub struct EventIndex {
    pub id: Vec<u8>,
    pub pubkey: Vec<u8>,
    pub created_at: u64,
    pub kind: u64,
    pub tsid: Vec<u8>,
    pub kind_bytes: [u8; KIND_LEN],
    /// Indexable `(tag key byte, tag value)` pairs, filtered per
    /// [`crate::key::indexable_tag`].
    pub tags: Vec<(u8, String)>,
}

impl EventIndex {
    pub fn encode(event: &Event) -> Result<Self, Error> {
        if event.id.len() != key::ID_LEN {
            return Err(Error::InvalidLength("id"));
        }
        if event.pubkey.len() != key::ID_LEN {
            return Err(Error::InvalidLength("pubkey"));
        }
        let tsid = key::encode_tsid(event.created_at, &event.id);
        debug_assert_eq!(tsid.len(), TSID_LEN);
        let tags = event
            .tags
            .iter()
            .filter_map(|tag| indexable_tag(tag))
            .map(|(k, v)| (k, v.to_owned()))
            .collect();
        Ok(Self {
            id: event.id.clone(),
            pubkey: event.pubkey.clone(),
            created_at: event.created_at,
            kind: event.kind,
            tsid,
            kind_bytes: key::encode_kind(event.kind),
            tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            id: vec![1u8; 32],
            pubkey: vec![2u8; 32],
            created_at: 100,
            kind: 1,
            tags: vec![
                vec!["p".into(), "abcd".into()],
                vec!["nonindexable".into(), "value".into()],
                vec!["e".into(), "x".repeat(500)],
            ],
            content: "hello".into(),
            sig: vec![3u8; 64],
        }
    }

    #[test]
    fn blob_roundtrip_is_lossless() {
        let event = sample_event();
        let blob = event.to_blob().unwrap();
        let decoded = Event::from_blob(&blob).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn encode_filters_non_indexable_tags() {
        let index = EventIndex::encode(&sample_event()).unwrap();
        assert_eq!(index.tags, vec![(b'p', "abcd".to_string())]);
    }

    #[test]
    fn kind_is_widened_to_64_bits() {
        let mut event = sample_event();
        event.kind = u64::from(u32::MAX) + 1;
        let index = EventIndex::encode(&event).unwrap();
        assert_eq!(index.kind, event.kind);
    }
}
