//! Cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use cart_store::Store;
use chrono::{DateTime, Utc};
use domain::{Cart, ProductId, Sku};
use reservation::{
    CartOutcome, InMemoryCouponBook, InMemorySessionRegistry, MergeCoordinator, MergeOutcome,
    ReservationEngine,
};
use serde::{Deserialize, Serialize};

use super::identity::{Caller, GUEST_ID_HEADER, USER_ID_HEADER};
use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub engine: ReservationEngine<S, InMemoryCouponBook, InMemorySessionRegistry>,
    pub merger: MergeCoordinator<S, InMemoryCouponBook, InMemorySessionRegistry>,
    pub coupons: InMemoryCouponBook,
    pub sessions: InMemorySessionRegistry,
}

// -- Request types --

#[derive(Deserialize)]
pub struct SetItemRequest {
    pub product_id: String,
    pub sku: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub cart: Option<Cart>,
    pub expires_at: Option<DateTime<Utc>>,
}

// -- Handlers --

/// GET /cart: the caller's cart, or `null` if they have none.
#[tracing::instrument(skip_all, fields(identity = %caller.identity))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.engine.get_cart(&caller.identity).await?;
    Ok(Json(CartResponse {
        expires_at: cart.as_ref().and_then(Cart::expires_at),
        cart,
    }))
}

/// POST /cart/items: set a line's quantity, reserving or releasing stock.
#[tracing::instrument(skip_all, fields(identity = %caller.identity))]
pub async fn set_item<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<SetItemRequest>,
) -> Result<Json<CartOutcome>, ApiError> {
    let outcome = state
        .engine
        .set_item_quantity(
            &caller.identity,
            &ProductId::new(req.product_id),
            &Sku::new(req.sku),
            req.quantity,
        )
        .await?;
    Ok(Json(outcome))
}

/// DELETE /cart/items/{sku}: remove a line and return its stock.
#[tracing::instrument(skip_all, fields(identity = %caller.identity, sku = %sku))]
pub async fn remove_item<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(sku): Path<String>,
) -> Result<Json<CartOutcome>, ApiError> {
    let outcome = state
        .engine
        .remove_item(&caller.identity, &Sku::new(sku))
        .await?;
    Ok(Json(outcome))
}

/// POST /cart/coupon: apply a coupon to the cart.
#[tracing::instrument(skip_all, fields(identity = %caller.identity))]
pub async fn apply_coupon<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<ApplyCouponRequest>,
) -> Result<Json<CartOutcome>, ApiError> {
    let outcome = state
        .engine
        .apply_coupon(&caller.identity, &req.code)
        .await?;
    Ok(Json(outcome))
}

/// PATCH /cart/merge: fold the guest cart into the signed-in user's.
///
/// Needs both headers.
#[tracing::instrument(skip_all, fields(identity = %caller.identity))]
pub async fn merge<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<MergeOutcome>, ApiError> {
    let (Some(user_id), Some(guest_id)) = (caller.user_id(), caller.guest_id.as_ref()) else {
        return Err(ApiError::BadRequest(format!(
            "Merge needs both {USER_ID_HEADER} and {GUEST_ID_HEADER} headers"
        )));
    };
    let outcome = state.merger.merge(guest_id, user_id).await?;
    Ok(Json(outcome))
}

/// DELETE /cart: empty the cart after checkout.
///
/// The reserved units are not handed back: they leave with the order.
#[tracing::instrument(skip_all, fields(identity = %caller.identity))]
pub async fn clear<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<StatusCode, ApiError> {
    state.engine.clear_cart(&caller.identity).await?;
    Ok(StatusCode::NO_CONTENT)
}
