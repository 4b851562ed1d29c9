//! Domain-level input errors (§7 "Input errors").

use thiserror::Error;

use crate::phone::InvalidPhoneNumber;

/// Errors that are local to validating a request, never mutate state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InputError {
    #[error(transparent)]
    InvalidPhoneNumber(#[from] InvalidPhoneNumber),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("scheduled time is in the past: {0}")]
    ScheduleInPast(chrono::DateTime<chrono::Utc>),

    #[error("invalid enum value for {field}: {value}")]
    InvalidEnum { field: &'static str, value: String },
}
