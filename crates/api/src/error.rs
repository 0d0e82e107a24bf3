//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reservation::ReservationError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Cart operation error.
    Reservation(ReservationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            ApiError::Reservation(err) => {
                let (status, message) = reservation_error_to_response(&err);
                let mut body = serde_json::json!({ "error": message });
                // A no-op leaves the cart untouched; echo it so the client can resync.
                if let ReservationError::NoOp { cart, .. } = &err {
                    body["cart"] = serde_json::json!(cart);
                    body["expires_at"] = serde_json::json!(cart.expires_at());
                }
                (status, body)
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn reservation_error_to_response(err: &ReservationError) -> (StatusCode, String) {
    let status = match err {
        ReservationError::ProductNotFound { .. }
        | ReservationError::VariantNotFound { .. }
        | ReservationError::ItemNotFound { .. }
        | ReservationError::CartNotFound { .. } => StatusCode::NOT_FOUND,
        ReservationError::InsufficientStock { .. }
        | ReservationError::NoOp { .. }
        | ReservationError::InvalidQuantity { .. }
        | ReservationError::InvalidCoupon { .. } => StatusCode::BAD_REQUEST,
        ReservationError::WriteConflict { .. } => StatusCode::CONFLICT,
        ReservationError::TransientStoreFailure(_) => {
            tracing::warn!(error = %err, "store unavailable");
            StatusCode::SERVICE_UNAVAILABLE
        }
        ReservationError::Cart(_) => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        ApiError::Reservation(err)
    }
}
