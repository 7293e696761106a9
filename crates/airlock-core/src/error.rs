use thiserror::Error;

#[derive(Debug, Error)]
pub enum AirlockError {
    #[error("not initialized: run 'airlock init'")]
    NotInitialized,

    #[error("unknown state: {0} (no reference baseline)")]
    UnknownState(String),

    #[error("invalid state id '{0}': must be a two-letter uppercase code")]
    InvalidStateId(String),

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("batch already staged: {0}")]
    BatchExists(String),

    #[error("batch {batch_id} belongs to state {actual}, not {requested}")]
    StateMismatch {
        batch_id: String,
        requested: String,
        actual: String,
    },

    #[error("invalid batch transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid {kind}: '{value}'")]
    InvalidValue { kind: &'static str, value: String },

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AirlockError>;
