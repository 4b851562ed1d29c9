//! HTTP client for outbound call control, behind the rate limiter and
//! circuit breaker (§4.3, §6 "Telephony provider").

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig};
use crate::error::ProviderError;
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};

#[derive(Debug, Clone, Serialize)]
pub struct MakeCallRequest {
    pub from: String,
    pub to: String,
    pub app_id: String,
    /// Our internal call id, round-tripped through provider webhooks.
    pub custom_field: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MakeCallResponse {
    #[serde(rename = "sid")]
    pub provider_call_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallDetails {
    pub status: String,
    pub duration: Option<u64>,
    pub direction: String,
}

/// Abstraction over the outbound-call-control surface, so the orchestrator
/// and session engine can depend on a trait object and tests can supply a
/// fake (DESIGN NOTES: "global singleton services" -> DI with lifecycle).
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    async fn make_call(&self, req: MakeCallRequest) -> Result<MakeCallResponse, ProviderError>;
    async fn hangup(&self, provider_call_id: &str) -> Result<(), ProviderError>;
    async fn get_details(&self, provider_call_id: &str) -> Result<CallDetails, ProviderError>;
    async fn get_recording_url(&self, provider_call_id: &str) -> Result<Option<String>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ProviderClientConfig {
    pub base_url: String,
    pub basic_auth_user: String,
    pub basic_auth_pass: String,
    pub request_timeout: Duration,
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ProviderClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.telephony.example.com".to_string(),
            basic_auth_user: String::new(),
            basic_auth_pass: String::new(),
            request_timeout: Duration::from_secs(10),
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// HTTP client to the telephony provider, wrapped by a rate limiter and a
/// circuit breaker (§4.3).
pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderClientConfig,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
}

impl ProviderClient {
    pub fn new(config: ProviderClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client builds with static configuration");
        Self {
            rate_limiter: RateLimiter::new(config.rate_limiter.clone()),
            circuit_breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            http,
            config,
        }
    }

    async fn guarded<T, F, Fut>(&self, op: F) -> Result<T, ProviderError>
    where
        F: FnOnce(reqwest::Client) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        match self.circuit_breaker.admit().await {
            Admission::FailFast => return Err(ProviderError::ApiUnavailable),
            Admission::Proceed => {}
        }

        let _permit = self.rate_limiter.acquire().await;
        let result = op(self.http.clone()).await;

        match &result {
            Ok(_) => self.circuit_breaker.on_success().await,
            Err(e) if e.trips_circuit() => self.circuit_breaker.on_failure().await,
            Err(_) => {}
        }
        result
    }

    fn basic_auth_header(&self) -> String {
        let token = base64_encode(&format!(
            "{}:{}",
            self.config.basic_auth_user, self.config.basic_auth_pass
        ));
        format!("Basic {token}")
    }
}

fn base64_encode(input: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(input)
}

#[async_trait]
impl TelephonyProvider for ProviderClient {
    #[instrument(skip(self, req), fields(to = %req.to))]
    async fn make_call(&self, req: MakeCallRequest) -> Result<MakeCallResponse, ProviderError> {
        let url = format!("{}/calls", self.config.base_url);
        let auth = self.basic_auth_header();
        self.guarded(move |http| async move {
            let resp = http
                .post(&url)
                .header("Authorization", auth)
                .json(&req)
                .send()
                .await
                .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
            handle_response(resp).await
        })
        .await
    }

    async fn hangup(&self, provider_call_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/calls/{provider_call_id}/hangup", self.config.base_url);
        let auth = self.basic_auth_header();
        self.guarded(move |http| async move {
            let resp = http
                .post(&url)
                .header("Authorization", auth)
                .send()
                .await
                .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
            handle_response::<serde_json::Value>(resp).await.map(|_| ())
        })
        .await
    }

    async fn get_details(&self, provider_call_id: &str) -> Result<CallDetails, ProviderError> {
        let url = format!("{}/calls/{provider_call_id}", self.config.base_url);
        let auth = self.basic_auth_header();
        self.guarded(move |http| async move {
            let resp = http
                .get(&url)
                .header("Authorization", auth)
                .send()
                .await
                .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
            handle_response(resp).await
        })
        .await
    }

    async fn get_recording_url(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<String>, ProviderError> {
        let url = format!(
            "{}/calls/{provider_call_id}/recording",
            self.config.base_url
        );
        let auth = self.basic_auth_header();
        self.guarded(move |http| async move {
            let resp = http
                .get(&url)
                .header("Authorization", auth)
                .send()
                .await
                .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            #[derive(Deserialize)]
            struct RecordingResponse {
                url: Option<String>,
            }
            let parsed: RecordingResponse = handle_response(resp).await?;
            Ok(parsed.url)
        })
        .await
    }
}

async fn handle_response<T: for<'de> Deserialize<'de>>(
    resp: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::ProviderError(format!("invalid response body: {e}")))
    } else {
        let body = resp.text().await.unwrap_or_default();
        info!(%status, "telephony provider returned a non-2xx response");
        Err(ProviderError::from_status(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ProviderClient {
        ProviderClient::new(ProviderClientConfig {
            base_url: server.uri(),
            basic_auth_user: "user".into(),
            basic_auth_pass: "pass".into(),
            request_timeout: Duration::from_secs(5),
            rate_limiter: RateLimiterConfig {
                reservoir: 1000,
                refill_per_sec: 1000,
                max_in_flight: 10,
                min_gap: Duration::ZERO,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                cooldown: Duration::from_secs(60),
            },
        })
    }

    #[tokio::test]
    async fn make_call_returns_provider_call_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calls"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"sid": "CA123", "status": "queued"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let resp = client
            .make_call(MakeCallRequest {
                from: "+15005550006".into(),
                to: "+14155552671".into(),
                app_id: "app-1".into(),
                custom_field: "call-1".into(),
            })
            .await
            .unwrap();
        assert_eq!(resp.provider_call_id, "CA123");
    }

    #[tokio::test]
    async fn classifies_401_and_does_not_trip_circuit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calls"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let client = client_for(&server);
        let err = client
            .make_call(MakeCallRequest {
                from: "+15005550006".into(),
                to: "+14155552671".into(),
                app_id: "app-1".into(),
                custom_field: "call-1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized));
        assert_eq!(client.circuit_breaker.state().await, crate::circuit_breaker::CircuitState::Closed);
    }

    #[tokio::test]
    async fn five_consecutive_5xx_open_the_circuit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calls"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let client = client_for(&server);
        for _ in 0..5 {
            let _ = client
                .make_call(MakeCallRequest {
                    from: "+15005550006".into(),
                    to: "+14155552671".into(),
                    app_id: "app-1".into(),
                    custom_field: "call-1".into(),
                })
                .await;
        }
        let err = client
            .make_call(MakeCallRequest {
                from: "+15005550006".into(),
                to: "+14155552671".into(),
                app_id: "app-1".into(),
                custom_field: "call-1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ApiUnavailable));
    }

    #[tokio::test]
    async fn get_recording_url_returns_none_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calls/CA123/recording"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let client = client_for(&server);
        let url = client.get_recording_url("CA123").await.unwrap();
        assert!(url.is_none());
    }
}
