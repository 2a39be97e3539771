use thiserror::Error;

#[derive(Error, Debug)]
pub enum LangError {
    #[error("Malformed program interchange: {0}")]
    Json(#[from] serde_json::Error),
}
