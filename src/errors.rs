//! Error taxonomy for the planning and dispatch pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("{0}")]
    InvalidPlan(String),

    #[error("{0}")]
    PolicyViolation(String),

    #[error("{0}")]
    DispatchError(String),

    /// Legacy external planner could not be reached or returned unusable output.
    #[error("{0}")]
    OpenClawDown(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PlannerError>;

impl PlannerError {
    pub fn invalid_plan(message: impl Into<String>) -> Self {
        Self::InvalidPlan(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Machine-readable error code used by the tool façade and the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PolicyViolation(_) => "POLICY_VIOLATION",
            Self::OpenClawDown(_) => "OPENCLAW_DOWN",
            _ => "PLANNER_ERROR",
        }
    }

    /// Variant name surfaced as `error.type` in JSON I/O responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPlan(_) => "InvalidPlan",
            Self::PolicyViolation(_) => "PolicyViolation",
            Self::DispatchError(_) => "DispatchError",
            Self::OpenClawDown(_) => "OpenClawDown",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::Internal(_) => "PlannerError",
        }
    }

    /// Process exit code contract: 3 policy, 2 legacy planner down, 1 everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PolicyViolation(_) => 3,
            Self::OpenClawDown(_) => 2,
            _ => 1,
        }
    }
}
