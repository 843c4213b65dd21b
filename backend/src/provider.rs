//! Requestor side of the provider protocol.

use crate::models::{
    Contribution, EncryptedQueryRequest, EncryptedQueryResponse, PlainQueryResponse, ProviderEndpoint,
    ProviderResponse, QueryRequest,
};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("http status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no response before the round deadline")]
    Timeout,

    #[error("response does not match the query mode")]
    ModeMismatch,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn query(&self, provider: &ProviderEndpoint, request: &QueryRequest) -> Result<ProviderResponse, ProviderError>;
}

/// JSON-over-HTTP client for the provider endpoint.
#[derive(Clone, Default)]
pub struct HttpProviderClient {
    client: Client,
}

impl HttpProviderClient {
    pub fn new() -> Self {
        Self::default()
    }
}

fn transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if e.is_decode() {
        ProviderError::Malformed(e.to_string())
    } else {
        ProviderError::Transport(e.to_string())
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn query(&self, provider: &ProviderEndpoint, request: &QueryRequest) -> Result<ProviderResponse, ProviderError> {
        let base = provider.url.trim_end_matches('/');

        let response = match request {
            QueryRequest::Plain { condition } => self
                .client
                .get(format!("{base}/query"))
                .query(&[("condition", condition.as_str())])
                .send()
                .await
                .map_err(transport)?,
            QueryRequest::Encrypted { condition, public_key } => self
                .client
                .post(format!("{base}/he_query"))
                .json(&EncryptedQueryRequest {
                    condition: condition.clone(),
                    n: public_key.n().clone(),
                })
                .send()
                .await
                .map_err(transport)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        match request {
            QueryRequest::Plain { .. } => {
                let body: PlainQueryResponse = response.json().await.map_err(transport)?;
                Ok(ProviderResponse::Statistic(body.avg_age))
            }
            QueryRequest::Encrypted { .. } => {
                let body: EncryptedQueryResponse = response.json().await.map_err(transport)?;
                Ok(ProviderResponse::Encrypted {
                    sum: body.enc_sum,
                    count: body.enc_count,
                })
            }
        }
    }
}

/// Check a response against the request that produced it.
pub fn validate(request: &QueryRequest, response: ProviderResponse) -> Result<ProviderResponse, ProviderError> {
    match (request, response) {
        (QueryRequest::Plain { .. }, ProviderResponse::Statistic(v)) => {
            if v.is_finite() {
                Ok(ProviderResponse::Statistic(v))
            } else {
                Err(ProviderError::Malformed(format!("non-finite statistic {v}")))
            }
        }
        (QueryRequest::Encrypted { public_key, .. }, ProviderResponse::Encrypted { sum, count }) => {
            let sum = public_key
                .ciphertext(sum.into_inner())
                .map_err(|e| ProviderError::Malformed(format!("enc_sum: {e}")))?;
            let count = public_key
                .ciphertext(count.into_inner())
                .map_err(|e| ProviderError::Malformed(format!("enc_count: {e}")))?;
            Ok(ProviderResponse::Encrypted { sum, count })
        }
        _ => Err(ProviderError::ModeMismatch),
    }
}

/// Outcome of one query round.
#[derive(Debug, Default)]
pub struct Collection {
    pub contributions: Vec<Contribution>,
    /// `(provider, reason)`.
    pub unavailable: Vec<(String, String)>,
}

/// Query every provider concurrently and wait for all of them, bounded by `round_timeout`.
///
/// Results keep the configured provider order. A provider that fails, times out or answers
/// with something unusable is listed in `unavailable` and does not count towards quorum.
pub async fn collect(
    client: &dyn ProviderClient,
    providers: &[ProviderEndpoint],
    request: &QueryRequest,
    round_timeout: Duration,
) -> Collection {
    let deadline = Instant::now() + round_timeout;

    let outcomes = join_all(providers.iter().map(|provider| async move {
        let outcome = match timeout_at(deadline, client.query(provider, request)).await {
            Ok(Ok(response)) => validate(request, response),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::Timeout),
        };
        (provider, outcome)
    }))
    .await;

    let mut collection = Collection::default();
    for (provider, outcome) in outcomes {
        match outcome {
            Ok(response) => {
                debug!(provider = %provider.name, "provider responded");
                collection.contributions.push(Contribution {
                    provider: provider.clone(),
                    response,
                });
            }
            Err(e) => {
                warn!(provider = %provider.name, error = %e, "provider unavailable");
                collection.unavailable.push((provider.name.clone(), e.to_string()));
            }
        }
    }
    collection
}
