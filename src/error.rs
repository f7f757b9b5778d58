use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("entry #{0} not found")]
    NotFound(i64),

    #[error("entry #{0} is not a risk entry")]
    WrongType(i64),

    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
