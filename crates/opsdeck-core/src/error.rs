use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("home directory not found: set HOME or OPSDECK_HOME")]
    HomeNotFound,

    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: &'static str, value: String },

    #[error("monitor already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("webhook delivery failed: {0}")]
    Webhook(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, OpsError>;
