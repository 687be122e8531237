//! Gateway trait and the reqwest-backed HTTP implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::models::{
    ApiEnvelope, CommitResponse, ExperimentDetails, PlotList, RecordDraft, ValidateResponse,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow rural connections while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// The remote endpoints the cache manager and submission pipeline depend on.
///
/// Implemented by [`HttpGateway`] in production and by in-memory stubs in
/// tests.
#[allow(async_fn_in_trait)]
pub trait DataGateway: Send + Sync {
    async fn get_experiment_details(
        &self,
        experiment_id: i64,
        experiment_type: &str,
    ) -> Result<ApiEnvelope<ExperimentDetails>>;

    async fn get_plot_list(
        &self,
        location_id: i64,
        experiment_type: &str,
    ) -> Result<ApiEnvelope<PlotList>>;

    async fn validate_traits(&self, draft: &RecordDraft) -> Result<ValidateResponse>;

    async fn create_traits(&self, draft: &RecordDraft) -> Result<CommitResponse>;

    async fn update_traits(&self, draft: &RecordDraft) -> Result<CommitResponse>;
}

/// Gateway client for the field-trial REST API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    token: Option<Arc<String>>,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Create a gateway with the given bearer token, sharing the connection
    /// pool.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(Arc::new(token.into())),
        }
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should
    /// retry), or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// Send a request with a rate-limit retry loop, parsing the JSON body.
    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(self.auth_headers()?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("Failed to send {} request to {}", method, url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.request::<T, ()>(Method::GET, url, None).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> Result<T> {
        self.request(Method::POST, url, Some(body)).await
    }

    async fn put<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> Result<T> {
        self.request(Method::PUT, url, Some(body)).await
    }
}

impl DataGateway for HttpGateway {
    /// Fetch experiment metadata for one experiment.
    async fn get_experiment_details(
        &self,
        experiment_id: i64,
        experiment_type: &str,
    ) -> Result<ApiEnvelope<ExperimentDetails>> {
        let url = format!(
            "{}/experiments/{}/details?experimentType={}",
            self.base_url, experiment_id, experiment_type
        );
        debug!(experiment_id, experiment_type, "Fetching experiment details");
        self.get(&url).await
    }

    /// Fetch the plot list for one location.
    async fn get_plot_list(
        &self,
        location_id: i64,
        experiment_type: &str,
    ) -> Result<ApiEnvelope<PlotList>> {
        let url = format!(
            "{}/locations/{}/plots?experimentType={}",
            self.base_url, location_id, experiment_type
        );
        debug!(location_id, experiment_type, "Fetching plot list");
        self.get(&url).await
    }

    /// Dry-run a record submission against the server's trait rules.
    async fn validate_traits(&self, draft: &RecordDraft) -> Result<ValidateResponse> {
        let url = format!("{}/traits/validate", self.base_url);
        self.post(&url, draft).await
    }

    /// Commit first-time observations.
    async fn create_traits(&self, draft: &RecordDraft) -> Result<CommitResponse> {
        let url = format!("{}/traits/record", self.base_url);
        self.post(&url, draft).await
    }

    /// Commit amendments to previously recorded observations.
    async fn update_traits(&self, draft: &RecordDraft) -> Result<CommitResponse> {
        let url = format!("{}/traits/record", self.base_url);
        self.put(&url, draft).await
    }
}
