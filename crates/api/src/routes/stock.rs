//! Stock reservation endpoints.
//!
//! Handlers only check request shape and translate to repository calls;
//! every availability decision is made by the [`ReservationStore`].

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use reservation_store::{
    ProductId, Reservation, ReservationConfirmed, ReservationId, ReservationStore, ReserveStock,
    SessionId,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

const DEFAULT_PENDING_LIMIT: usize = 100;
const MAX_PENDING_LIMIT: usize = 1_000;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: Arc<dyn ReservationStore>,
    /// Lifetime applied when a reserve request carries no `ttlMinutes`.
    pub default_ttl_minutes: i64,
    /// Name of the backend, reported by the health check.
    pub backend: &'static str,
}

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub product_id: Option<i32>,
    pub quantity: Option<i64>,
    pub session_id: Option<String>,
    pub ttl_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub session_id: Option<String>,
    pub product_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuantityRequest {
    pub session_id: Option<String>,
    pub product_id: Option<i32>,
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub limit: Option<usize>,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub id: i64,
    pub product_id: i32,
    pub session_id: String,
    pub quantity: i32,
    pub status: &'static str,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_stock: Option<i32>,
}

impl ReservationResponse {
    fn new(reservation: Reservation, available_stock: Option<i32>) -> Self {
        Self {
            id: reservation.id.as_i64(),
            product_id: reservation.product_id.as_i32(),
            quantity: reservation.quantity,
            status: reservation.status.as_str(),
            expires_at: reservation.expires_at(),
            session_id: reservation.session_id.to_string(),
            available_stock,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReservedResponse {
    pub reservation: ReservationResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasedResponse {
    pub released_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResponse {
    pub reservation_id: i64,
    pub product_id: i32,
    pub session_id: String,
    pub quantity: i32,
    pub confirmed_at: DateTime<Utc>,
}

impl From<ReservationConfirmed> for ConfirmationResponse {
    fn from(event: ReservationConfirmed) -> Self {
        Self {
            reservation_id: event.reservation_id.as_i64(),
            product_id: event.product_id.as_i32(),
            session_id: event.session_id.to_string(),
            quantity: event.quantity,
            confirmed_at: event.confirmed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedResponse {
    pub confirmed_count: usize,
    pub confirmations: Vec<ConfirmationResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableResponse {
    pub product_id: i32,
    pub available_stock: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiredResponse {
    pub expired_count: u64,
}

#[derive(Debug, Serialize)]
pub struct SettledResponse {
    pub settled: bool,
}

/// A quantity update either released the reservation or resized it.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QuantityUpdateResponse {
    Released(ReleasedResponse),
    Updated(ReservedResponse),
}

// -- Handlers --

/// POST /stock/reserve: claim stock for a cart session.
#[tracing::instrument(skip(state, body))]
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ReserveRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReservedResponse>), ApiError> {
    let Json(req) = body?;

    let product_id = required(req.product_id, "productId")?;
    let session_id = session(req.session_id)?;
    let quantity = quantity(required(req.quantity, "quantity")?)?;
    if quantity == 0 {
        return Err(ApiError::BadRequest("quantity must be positive".to_string()));
    }
    let ttl_minutes = req.ttl_minutes.unwrap_or(state.default_ttl_minutes);

    let request = ReserveStock::new(ProductId::new(product_id), session_id, quantity)
        .with_ttl_minutes(ttl_minutes);
    let outcome = state.store.reserve(request).await?;

    let response = ReservedResponse {
        reservation: ReservationResponse::new(outcome.reservation, Some(outcome.available_stock)),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /stock/release: give back a session's reservations.
#[tracing::instrument(skip(state, body))]
pub async fn release(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ReleaseRequest>, JsonRejection>,
) -> Result<Json<ReleasedResponse>, ApiError> {
    let Json(req) = body?;
    let session_id = session(req.session_id)?;

    let released_count = state
        .store
        .release(&session_id, req.product_id.map(ProductId::new))
        .await?;

    Ok(Json(ReleasedResponse { released_count }))
}

/// POST /stock/confirm: convert a session's reservations at checkout.
#[tracing::instrument(skip(state, body))]
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Result<Json<ConfirmedResponse>, ApiError> {
    let Json(req) = body?;
    let session_id = session(req.session_id)?;

    let events = state.store.confirm(&session_id).await?;

    Ok(Json(ConfirmedResponse {
        confirmed_count: events.len(),
        confirmations: events.into_iter().map(Into::into).collect(),
    }))
}

/// GET /stock/available/{product_id}: display availability for a product.
#[tracing::instrument(skip(state))]
pub async fn available(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<AvailableResponse>, ApiError> {
    let Path(product_id) = path?;
    let available_stock = state.store.available_stock(ProductId::new(product_id)).await?;
    Ok(Json(AvailableResponse {
        product_id,
        available_stock,
    }))
}

/// PUT /stock/reservation: set a reservation's quantity; zero releases it.
#[tracing::instrument(skip(state, body))]
pub async fn update_quantity(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UpdateQuantityRequest>, JsonRejection>,
) -> Result<Json<QuantityUpdateResponse>, ApiError> {
    let Json(req) = body?;

    let session_id = session(req.session_id)?;
    let product_id = ProductId::new(required(req.product_id, "productId")?);
    let quantity = quantity(required(req.quantity, "quantity")?)?;

    if quantity == 0 {
        let released_count = state.store.release(&session_id, Some(product_id)).await?;
        return Ok(Json(QuantityUpdateResponse::Released(ReleasedResponse {
            released_count,
        })));
    }

    let outcome = state
        .store
        .update_quantity(&session_id, product_id, quantity)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "No active reservation for session {session_id} and product {product_id}"
            ))
        })?;

    Ok(Json(QuantityUpdateResponse::Updated(ReservedResponse {
        reservation: ReservationResponse::new(outcome.reservation, Some(outcome.available_stock)),
    })))
}

/// GET /stock/reservations/{session_id}: a session's reservation history.
#[tracing::instrument(skip(state))]
pub async fn session_reservations(
    State(state): State<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Vec<ReservationResponse>>, ApiError> {
    let Path(session_id) = path?;
    let session_id = session(Some(session_id))?;
    let reservations = state.store.session_reservations(&session_id).await?;

    Ok(Json(
        reservations
            .into_iter()
            .map(|r| ReservationResponse::new(r, None))
            .collect(),
    ))
}

/// POST /stock/expire: run one expiry sweep now.
#[tracing::instrument(skip(state))]
pub async fn expire(State(state): State<Arc<AppState>>) -> Result<Json<ExpiredResponse>, ApiError> {
    let expired_count = state.store.expire_stale().await?;
    Ok(Json(ExpiredResponse { expired_count }))
}

/// GET /stock/confirmations/pending: confirmations awaiting a stock decrement.
#[tracing::instrument(skip(state))]
pub async fn pending_confirmations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<ConfirmationResponse>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PENDING_LIMIT)
        .min(MAX_PENDING_LIMIT);
    let pending = state.store.pending_confirmations(limit).await?;
    Ok(Json(pending.into_iter().map(Into::into).collect()))
}

/// POST /stock/confirmations/{reservation_id}/settle: acknowledge the stock decrement.
#[tracing::instrument(skip(state))]
pub async fn settle_confirmation(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<SettledResponse>, ApiError> {
    let Path(reservation_id) = path?;
    let settled = state
        .store
        .settle_confirmation(ReservationId::new(reservation_id))
        .await?;
    Ok(Json(SettledResponse { settled }))
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))
}

fn session(value: Option<String>) -> Result<SessionId, ApiError> {
    let session_id = SessionId::new(required(value, "sessionId")?);
    if session_id.is_blank() {
        return Err(ApiError::BadRequest("sessionId must not be empty".to_string()));
    }
    Ok(session_id)
}

/// Accepts zero and positive quantities that fit the ledger's integer type.
fn quantity(value: i64) -> Result<i32, ApiError> {
    if value < 0 {
        return Err(ApiError::BadRequest(format!(
            "quantity must not be negative, got {value}"
        )));
    }
    i32::try_from(value).map_err(|_| ApiError::BadRequest(format!("quantity {value} is too large")))
}
