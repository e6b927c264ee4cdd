use thiserror::Error;

pub type Result<T> = std::result::Result<T, StepError>;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("malformed step: {0}")]
    MalformedStep(String),

    #[error("malformed step selector: {0}")]
    MalformedSelector(String),

    #[error("malformed todo line: {0}")]
    MalformedTodo(String),

    #[error("manifest is not a JSON object")]
    ManifestNotObject,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
