//! Error envelope and status-code mapping (§6, §7).
//!
//! `{error:{code, message, details?}}`, standard HTTP status codes plus the
//! domain codes named in §6.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use voice_orchestrator::OrchestratorError;
use voice_persistence::StoreError;
use voice_retry::RetryError;
use voice_scheduler::SchedulerError;
use voice_types::InputError;

pub mod codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CONFLICT: &str = "CONFLICT";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const INVALID_PHONE_NUMBER: &str = "INVALID_PHONE_NUMBER";
    pub const AGENT_NOT_FOUND: &str = "AGENT_NOT_FOUND";
    pub const CONCURRENT_LIMIT_REACHED: &str = "CONCURRENT_LIMIT_REACHED";
    pub const SCHEDULE_IN_PAST: &str = "SCHEDULE_IN_PAST";
    pub const CALL_ALREADY_COMPLETED: &str = "CALL_ALREADY_COMPLETED";
    pub const RETRY_NOT_SCHEDULED: &str = "RETRY_NOT_SCHEDULED";
    pub const RETRY_NOT_FOUND: &str = "RETRY_NOT_FOUND";
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn status(&self) -> StatusCode {
        match self.code {
            codes::INVALID_REQUEST
            | codes::INVALID_PHONE_NUMBER
            | codes::SCHEDULE_IN_PAST => StatusCode::BAD_REQUEST,
            codes::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
            codes::NOT_FOUND | codes::AGENT_NOT_FOUND | codes::RETRY_NOT_FOUND => {
                StatusCode::NOT_FOUND
            }
            codes::CONFLICT | codes::CALL_ALREADY_COMPLETED | codes::RETRY_NOT_SCHEDULED => {
                StatusCode::CONFLICT
            }
            codes::RATE_LIMITED | codes::CONCURRENT_LIMIT_REACHED => StatusCode::TOO_MANY_REQUESTS,
            codes::SERVICE_UNAVAILABLE | codes::CIRCUIT_OPEN => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a ApiError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorEnvelope { error: &self })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<InputError> for ApiError {
    fn from(err: InputError) -> Self {
        match err {
            InputError::InvalidPhoneNumber(_) => {
                ApiError::new(codes::INVALID_PHONE_NUMBER, err.to_string())
            }
            InputError::AgentNotFound(_) => ApiError::new(codes::AGENT_NOT_FOUND, err.to_string()),
            InputError::ScheduleInPast(_) => {
                ApiError::new(codes::SCHEDULE_IN_PAST, err.to_string())
            }
            InputError::InvalidEnum { .. } => ApiError::new(codes::INVALID_REQUEST, err.to_string()),
            _ => ApiError::new(codes::INVALID_REQUEST, err.to_string()),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Input(e) => e.into(),
            OrchestratorError::ConcurrentLimitReached => {
                ApiError::new(codes::CONCURRENT_LIMIT_REACHED, err.to_string())
            }
            OrchestratorError::InvalidCallState { .. } => {
                ApiError::new(codes::CALL_ALREADY_COMPLETED, err.to_string())
            }
            OrchestratorError::CallNotFound(_) => ApiError::new(codes::NOT_FOUND, err.to_string()),
            OrchestratorError::Store(_) => ApiError::new(codes::INTERNAL_ERROR, err.to_string()),
            OrchestratorError::Provider(ref provider_err) => {
                use voice_provider::ProviderError;
                match provider_err {
                    // The circuit breaker tripped before the request left the process.
                    ProviderError::ApiUnavailable => {
                        ApiError::new(codes::CIRCUIT_OPEN, err.to_string())
                    }
                    ProviderError::RateLimited => {
                        ApiError::new(codes::RATE_LIMITED, err.to_string())
                    }
                    ProviderError::Unauthorized => {
                        ApiError::new(codes::UNAUTHORIZED, err.to_string())
                    }
                    _ => ApiError::new(codes::SERVICE_UNAVAILABLE, err.to_string()),
                }
            }
            _ => ApiError::new(codes::INTERNAL_ERROR, err.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::JobNotFound(_) => ApiError::new(codes::NOT_FOUND, err.to_string()),
            SchedulerError::NotPending(_) => ApiError::new(codes::CONFLICT, err.to_string()),
            SchedulerError::Store(_) => ApiError::new(codes::INTERNAL_ERROR, err.to_string()),
            _ => ApiError::new(codes::INTERNAL_ERROR, err.to_string()),
        }
    }
}

impl From<RetryError> for ApiError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::CallNotFound(_) => ApiError::new(codes::NOT_FOUND, err.to_string()),
            RetryError::AttemptNotFound(_) => {
                ApiError::new(codes::RETRY_NOT_FOUND, err.to_string())
            }
            RetryError::Store(_) => ApiError::new(codes::INTERNAL_ERROR, err.to_string()),
            RetryError::Scheduler(_) => ApiError::new(codes::INTERNAL_ERROR, err.to_string()),
            _ => ApiError::new(codes::INTERNAL_ERROR, err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::new(codes::INTERNAL_ERROR, err.to_string())
    }
}
