use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("instance '{id}' is not running (status: {status})")]
    InstanceNotRunning { id: String, status: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("orchestration failed: {0}")]
    Orchestration(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
