#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Kv(#[from] nostr_kv::Error),
    #[error(transparent)]
    ConvertU64(#[from] std::array::TryFromSliceError),
    #[error("Json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// A filter rejected by the validator (spec.md §4.2).
    #[error("Validation: {0}")]
    Validation(String),
    /// `DeleteEvent` on an id with no `timestamps` entry (spec.md §4.4 step 1).
    #[error("no timestamp")]
    NoTimestamp,
    /// A fixed-length field (id, pubkey) did not decode to its expected length.
    #[error("invalid length: {0}")]
    InvalidLength(&'static str),
    #[error("message: {0}")]
    Message(String),
}
