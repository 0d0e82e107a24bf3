use common::CartId;
use domain::{ProductId, Sku};
use thiserror::Error;

/// Errors that can occur when interacting with the cart store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No stock row satisfied `quantity >= requested` for the SKU.
    /// Nothing was mutated.
    #[error("Insufficient stock for product {product_id} sku {sku}: requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        sku: Sku,
        requested: u32,
    },

    /// A concurrent transaction touched the same document, or the document
    /// changed since it was read. The whole transaction must be retried.
    #[error("Write conflict on {resource}: {reason}")]
    WriteConflict {
        resource: String,
        reason: &'static str,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn cart_conflict(cart_id: CartId, reason: &'static str) -> Self {
        StoreError::WriteConflict {
            resource: format!("cart {cart_id}"),
            reason,
        }
    }

    pub(crate) fn identity_conflict(identity: &domain::Identity, reason: &'static str) -> Self {
        StoreError::WriteConflict {
            resource: format!("cart of {identity}"),
            reason,
        }
    }

    /// True for failures the caller may retry with a fresh transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::WriteConflict { .. } | StoreError::Database(_)
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
