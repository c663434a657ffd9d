pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("plan has no phases")]
    NoPhases,

    #[error("plan has no `run` phase")]
    MissingRunPhase,

    #[error("invalid phase `{name}`: {reason}")]
    InvalidPhase { name: String, reason: String },

    #[error("phase `{phase}`: `concurrency` must be >= 1 (got {got})")]
    InvalidConcurrency { phase: String, got: i64 },

    #[error("phase `{phase}`: exactly one of `iterations` or `duration_ms` must be set")]
    ModeMismatch { phase: String },

    #[error("phase `{phase}` has no role and the plan declares no `operation_order`")]
    MissingPhaseRole { phase: String },

    #[error("role `{0}` has no resolved operation")]
    MissingRole(String),

    #[error("guardrail violation: {0}")]
    Guardrail(String),

    #[error("unknown threshold kind `{0}`")]
    UnknownThreshold(String),

    #[error("invalid value for threshold `{name}`: {reason}")]
    InvalidThreshold { name: String, reason: String },

    #[error("invalid operation for role `{role}`: {reason}")]
    InvalidOperation { role: String, reason: String },
}

impl Error {
    /// Configuration errors are detected before any request is sent.
    #[must_use]
    pub fn is_config(&self) -> bool {
        !matches!(self, Self::Join(_))
    }
}
