//! Provider error classification (§4.3, §7 "Provider errors").

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// HTTP 401: fatal auth error, surfaced, never retried here.
    #[error("telephony provider authentication failed")]
    Unauthorized,

    /// HTTP 429.
    #[error("telephony provider rate limited the request")]
    RateLimited,

    /// 5xx or a transport-level timeout.
    #[error("telephony provider network error: {0}")]
    NetworkError(String),

    /// The circuit breaker is open; the request never left the process.
    #[error("telephony provider circuit breaker is open")]
    ApiUnavailable,

    /// Any other non-2xx response.
    #[error("telephony provider returned an error: {0}")]
    ProviderError(String),
}

impl ProviderError {
    /// Classify an HTTP status code per §4.3.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            ProviderError::Unauthorized
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProviderError::RateLimited
        } else if status.is_server_error() {
            ProviderError::NetworkError(format!("{status}: {body}"))
        } else {
            ProviderError::ProviderError(format!("{status}: {body}"))
        }
    }

    /// Whether this failure should count against the circuit breaker. Auth
    /// failures are a configuration problem, not upstream instability, so
    /// they are excluded.
    pub fn trips_circuit(&self) -> bool {
        !matches!(self, ProviderError::Unauthorized | ProviderError::ApiUnavailable)
    }
}
