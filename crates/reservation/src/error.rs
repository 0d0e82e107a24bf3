//! Reservation error types.

use cart_store::StoreError;
use domain::{Cart, CartError, Identity, ProductId, Sku};
use thiserror::Error;

/// Errors surfaced by the engine, the merge coordinator and the sweeper.
///
/// Every error is raised before commit, so the transaction it aborted left
/// neither stock nor carts changed.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The product does not exist in the catalog.
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// The product exists but has no inventory row for the SKU.
    #[error("Product {product_id} has no variant {sku}")]
    VariantNotFound { product_id: ProductId, sku: Sku },

    /// Not enough available units to cover the requested increase.
    #[error("Insufficient stock for {sku}: requested {requested} more")]
    InsufficientStock {
        product_id: ProductId,
        sku: Sku,
        requested: u32,
    },

    /// The cart holds no line with the SKU.
    #[error("Item not found in cart: {sku}")]
    ItemNotFound { sku: Sku },

    /// The requested quantity is already in the cart. Carries the
    /// untouched cart so callers can resync without another read.
    #[error("Item {sku} is already in the cart with quantity {quantity}")]
    NoOp {
        sku: Sku,
        quantity: u32,
        cart: Box<Cart>,
    },

    /// Cart quantities must be at least one.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// The identity has no cart.
    #[error("No cart found for {identity}")]
    CartNotFound { identity: Identity },

    /// The coupon evaluator rejected the code.
    #[error("Invalid coupon {code}: {reason}")]
    InvalidCoupon { code: String, reason: String },

    /// A concurrent transaction touched the same cart. Retry the operation.
    #[error("Write conflict on {resource}: {reason}")]
    WriteConflict {
        resource: String,
        reason: &'static str,
    },

    /// The store failed for reasons unrelated to the request. Retry later.
    #[error("Store unavailable: {0}")]
    TransientStoreFailure(#[source] StoreError),

    /// A cart invariant was violated.
    #[error("Cart error: {0}")]
    Cart(CartError),
}

impl ReservationError {
    /// True for failures the caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReservationError::WriteConflict { .. } | ReservationError::TransientStoreFailure(_)
        )
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                product_id,
                sku,
                requested,
            } => ReservationError::InsufficientStock {
                product_id,
                sku,
                requested,
            },
            StoreError::WriteConflict { resource, reason } => {
                ReservationError::WriteConflict { resource, reason }
            }
            other => ReservationError::TransientStoreFailure(other),
        }
    }
}

impl From<CartError> for ReservationError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::InvalidQuantity { quantity } => {
                ReservationError::InvalidQuantity { quantity }
            }
            CartError::ItemNotFound { sku } => ReservationError::ItemNotFound { sku },
            other => ReservationError::Cart(other),
        }
    }
}

/// Convenience type alias for reservation results.
pub type Result<T> = std::result::Result<T, ReservationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_meaning() {
        let err: ReservationError = StoreError::InsufficientStock {
            product_id: ProductId::new("p1"),
            sku: Sku::new("A"),
            requested: 2,
        }
        .into();
        assert!(matches!(
            err,
            ReservationError::InsufficientStock { requested: 2, .. }
        ));
        assert!(!err.is_retryable());

        let err: ReservationError = StoreError::WriteConflict {
            resource: "cart".to_string(),
            reason: "stale",
        }
        .into();
        assert!(err.is_retryable());

        let malformed = serde_json::from_str::<u32>("x").unwrap_err();
        let err: ReservationError = StoreError::Serialization(malformed).into();
        assert!(matches!(err, ReservationError::TransientStoreFailure(_)));
    }

    #[test]
    fn cart_errors_map_to_request_errors() {
        let err: ReservationError = CartError::ItemNotFound { sku: Sku::new("A") }.into();
        assert!(matches!(err, ReservationError::ItemNotFound { .. }));

        let err: ReservationError = CartError::InvalidQuantity { quantity: 0 }.into();
        assert!(matches!(err, ReservationError::InvalidQuantity { quantity: 0 }));
    }
}
