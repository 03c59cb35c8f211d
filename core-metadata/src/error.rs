use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Malformed metadata document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MetadataError>;
