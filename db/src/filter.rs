//! Filter surface, validator (spec.md §4.2) and `encode_filter` (spec.md §4.1).

use crate::error::Error;
use crate::key::{self, KIND_LEN, TS_LEN};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 100;
const MAX_IDS: usize = 100;
const MAX_AUTHORS: usize = 100;
const MAX_KINDS: usize = 10;
const MAX_TAG_KEYS: usize = 100;
const MAX_TAG_VALUES: usize = 100;

/// Client-supplied event selector ([NIP-01](https://nips.be/1)).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "_Filter")]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u64>>,
    /// Single-character tag key (without the leading `#`) to value list.
    pub tags: HashMap<String, Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<u32>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
struct _Filter {
    #[serde(default)]
    ids: Option<Vec<String>>,
    #[serde(default)]
    authors: Option<Vec<String>>,
    #[serde(default)]
    kinds: Option<Vec<u64>>,
    #[serde(default)]
    since: Option<u64>,
    #[serde(default)]
    until: Option<u64>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    search: Option<String>,
    #[serde(flatten)]
    tags: HashMap<String, Value>,
}

impl TryFrom<_Filter> for Filter {
    type Error = Error;
    fn try_from(f: _Filter) -> Result<Self, Self::Error> {
        let mut tags = HashMap::new();
        for (key, value) in f.tags {
            if let Some(key) = key.strip_prefix('#') {
                let values = Vec::<String>::deserialize(value)?;
                tags.insert(key.to_string(), values);
            }
        }
        Ok(Filter {
            ids: f.ids,
            authors: f.authors,
            kinds: f.kinds,
            tags,
            since: f.since,
            until: f.until,
            limit: f.limit,
            search: f.search,
        })
    }
}

fn is_64_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

impl Filter {
    /// Validates the filter per spec.md §4.2, clamping `limit` in place.
    /// Returns `full_ids`: true iff every author (if any) is exactly 64 hex
    /// characters — computed from `authors`, not from `ids`, by design (see
    /// spec.md §9's documented "latent bug"; preserved literally here).
    pub fn validate(&mut self) -> Result<bool, Error> {
        if self.search.as_deref().is_some_and(|s| !s.is_empty()) {
            return Err(Error::Validation("search filter not supported".into()));
        }

        self.limit = Some(match self.limit {
            Some(l) if (1..=MAX_LIMIT).contains(&l) => l,
            _ => DEFAULT_LIMIT,
        });

        let mut full_ids = true;
        if let Some(ids) = &self.ids {
            if ids.is_empty() || ids.len() > MAX_IDS {
                return Err(Error::Validation(format!(
                    "ids must contain between 1 and {MAX_IDS} entries"
                )));
            }
            full_ids = self
                .authors
                .as_ref()
                .map_or(true, |authors| authors.iter().all(|a| is_64_hex(a)));
        }

        if let Some(authors) = &self.authors {
            if authors.is_empty() || authors.len() > MAX_AUTHORS {
                return Err(Error::Validation(format!(
                    "authors must contain between 1 and {MAX_AUTHORS} entries"
                )));
            }
            if !authors.iter().all(|a| is_64_hex(a)) {
                return Err(Error::Validation(
                    "authors prefix filter not supported".into(),
                ));
            }
        }

        if let Some(kinds) = &self.kinds {
            if kinds.is_empty() || kinds.len() > MAX_KINDS {
                return Err(Error::Validation(format!(
                    "kinds must contain between 1 and {MAX_KINDS} entries"
                )));
            }
        }

        if self.tags.len() > MAX_TAG_KEYS {
            return Err(Error::Validation(format!(
                "at most {MAX_TAG_KEYS} tag keys are supported"
            )));
        }
        for (key, values) in &self.tags {
            if key.len() != 1 {
                return Err(Error::Validation(format!(
                    "tag key `{key}` must be exactly one character"
                )));
            }
            if values.len() > MAX_TAG_VALUES {
                return Err(Error::Validation(format!(
                    "tag `{key}` has more than {MAX_TAG_VALUES} values"
                )));
            }
        }

        Ok(full_ids)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

/// Byte-level index keys derived from a validated [`Filter`] (spec.md §4.1).
#[derive(Debug, Clone, Default)]
pub struct FilterIndex {
    pub ids: Vec<Vec<u8>>,
    pub authors: Vec<[u8; key::ID_LEN]>,
    pub kinds: Vec<[u8; KIND_LEN]>,
    pub tags: HashMap<u8, Vec<Vec<u8>>>,
    pub since: [u8; TS_LEN],
    /// `None` when the filter has no upper bound; callers start at `Last()`.
    pub until: Option<[u8; TS_LEN]>,
    pub full_ids: bool,
    pub limit: u32,
}

/// Encodes a validated filter. `full_ids` is the value returned by
/// [`Filter::validate`].
pub fn encode_filter(filter: &Filter, full_ids: bool) -> Result<FilterIndex, Error> {
    let ids = filter
        .ids
        .as_ref()
        .map(|ids| ids.iter().map(|s| hex::decode(s)).collect::<Result<_, _>>())
        .transpose()?
        .unwrap_or_default();

    let authors = filter
        .authors
        .as_ref()
        .map(|authors| {
            authors
                .iter()
                .map(|s| -> Result<[u8; key::ID_LEN], Error> {
                    let bytes = hex::decode(s)?;
                    bytes
                        .try_into()
                        .map_err(|_| Error::InvalidLength("author"))
                })
                .collect::<Result<_, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    let kinds = filter
        .kinds
        .as_ref()
        .map(|kinds| kinds.iter().map(|k| key::encode_kind(*k)).collect())
        .unwrap_or_default();

    let mut tags: HashMap<u8, Vec<Vec<u8>>> = HashMap::new();
    for (key_str, values) in &filter.tags {
        let tag_key = key_str.as_bytes()[0];
        let encoded = values
            .iter()
            .map(|v| key::encode_tag_value(v))
            .collect::<Vec<_>>();
        tags.insert(tag_key, encoded);
    }

    let since = filter.since.unwrap_or(0).to_be_bytes();
    // `until - 1`, wrapping: when `until == 0` this yields `u64::MAX`, i.e.
    // all-0xFF bytes, matching original_source's "init to 0xFF then
    // overwrite" construction in a single step.
    let until = filter.until.map(|u| u.wrapping_sub(1).to_be_bytes());

    Ok(FilterIndex {
        ids,
        authors,
        kinds,
        tags,
        since,
        until,
        full_ids,
        limit: filter.limit(),
    })
}
