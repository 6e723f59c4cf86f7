#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Lmdb: {0}")]
    Lmdb(String),
    #[error("Message: {0}")]
    Message(String),
    #[error("Nul: {0}")]
    Nul(#[from] std::ffi::NulError),
}
