//! Provider-side HTTP endpoint.

use crate::dataset::Dataset;
use crate::errors::ApiError;
use crate::models::{EncryptedQueryRequest, EncryptedQueryResponse, PlainQueryParams, PlainQueryResponse};
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use paillier::PublicKey;
use rand::rngs::OsRng;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Clone)]
pub struct ProviderState {
    pub name: String,
    pub dataset: Arc<Dataset>,
}

impl ProviderState {
    pub fn new(name: impl Into<String>, dataset: Dataset) -> Self {
        Self {
            name: name.into(),
            dataset: Arc::new(dataset),
        }
    }
}

pub fn router(state: ProviderState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/query", get(plain_query))
        .route("/he_query", post(encrypted_query))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn plain_query(
    State(state): State<ProviderState>,
    Query(params): Query<PlainQueryParams>,
) -> Result<Json<PlainQueryResponse>, ApiError> {
    let avg_age = state
        .dataset
        .average_age(&params.condition)
        .ok_or_else(|| ApiError::NotFound(format!("no records for condition '{}'", params.condition)))?;

    info!(provider = %state.name, condition = %params.condition, "answered plain query");
    Ok(Json(PlainQueryResponse { avg_age }))
}

async fn encrypted_query(
    State(state): State<ProviderState>,
    Json(req): Json<EncryptedQueryRequest>,
) -> Result<Json<EncryptedQueryResponse>, ApiError> {
    let public_key = PublicKey::from_modulus(req.n).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let (sum, count) = state.dataset.sum_and_count(&req.condition);

    // An empty match is answered with encryptions of zero; the requestor sees only totals.
    let (enc_sum, enc_count) = tokio::task::spawn_blocking(move || {
        let mut rng = OsRng;
        let enc_sum = public_key.encrypt_u64(sum, &mut rng)?;
        let enc_count = public_key.encrypt_u64(count, &mut rng)?;
        Ok::<_, paillier::PaillierError>((enc_sum, enc_count))
    })
    .await
    .map_err(|_| ApiError::Internal)?
    .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    info!(provider = %state.name, condition = %req.condition, "answered encrypted query");
    Ok(Json(EncryptedQueryResponse { enc_sum, enc_count }))
}
