//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reservation_store::StockError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Reservation engine error.
    Stock(StockError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::Map::new();

        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Stock(err) => {
                if let StockError::InsufficientStock { available, .. } = &err {
                    body.insert("availableStock".to_string(), (*available).into());
                }
                stock_error_to_response(err)
            }
        };

        metrics::counter!("stock_api_errors_total", "status" => status.as_str().to_string())
            .increment(1);

        body.insert("error".to_string(), message.into());
        (status, axum::Json(serde_json::Value::Object(body))).into_response()
    }
}

fn stock_error_to_response(err: StockError) -> (StatusCode, String) {
    match &err {
        StockError::ProductNotFound(_) | StockError::ReservationNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        _ if err.is_rejection() => (StatusCode::BAD_REQUEST, err.to_string()),
        _ => {
            tracing::error!(error = %err, "reservation store failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            )
        }
    }
}

impl From<StockError> for ApiError {
    fn from(err: StockError) -> Self {
        ApiError::Stock(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reservation_store::{ProductId, ReservationId};

    #[test]
    fn maps_stock_errors_to_status_codes() {
        let cases = [
            (
                StockError::ProductNotFound(ProductId::new(1)),
                StatusCode::NOT_FOUND,
            ),
            (
                StockError::ProductUnavailable(ProductId::new(1)),
                StatusCode::BAD_REQUEST,
            ),
            (
                StockError::InsufficientStock {
                    product_id: ProductId::new(1),
                    requested: 2,
                    available: 1,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                StockError::Validation("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                StockError::InvalidTransition {
                    from: "reserved",
                    to: "released",
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                StockError::ReservationNotFound(ReservationId::new(7)),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn error_body_is_json() {
        let response = ApiError::from(StockError::InsufficientStock {
            product_id: ProductId::new(1),
            requested: 2,
            available: 1,
        })
        .into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["availableStock"], 1);
        assert!(body["error"].as_str().is_some());
    }
}
