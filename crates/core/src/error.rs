use thiserror::Error;

pub type MeteringResult<T> = Result<T, MeteringError>;

#[derive(Error, Debug)]
pub enum MeteringError {
    #[error("Plan '{0}' is not defined")]
    InvalidPlan(String),

    #[error("Plan '{plan_id}' not found for tenant '{tenant_id}'")]
    PlanNotFound { tenant_id: String, plan_id: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Malformed webhook payload: {0}")]
    MalformedWebhookPayload(String),

    #[error("Notification transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MeteringError {
    /// True for failures of the backing store, which callers on the
    /// ingestion and monitoring paths are allowed to swallow.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}
