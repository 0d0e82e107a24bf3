//! Cart aggregate and related types.

mod aggregate;
mod identity;
mod value_objects;

pub use aggregate::Cart;
pub use identity::{GuestId, Identity, UserId};
pub use value_objects::{CartItem, Money, ProductId, Sku};

use thiserror::Error;

/// Errors raised by the cart aggregate's own invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartError {
    /// Cart lines must hold at least one unit.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Price snapshots can't be negative.
    #[error("Invalid price: {price} (must not be negative)")]
    InvalidPrice { price: i64 },

    /// No line with the SKU exists in the cart.
    #[error("Item not found in cart: {sku}")]
    ItemNotFound { sku: Sku },

    /// The operation requires a guest cart.
    #[error("Cart {identity} is not a guest cart")]
    NotGuestCart { identity: Identity },

    /// The operation requires a user cart.
    #[error("Cart {identity} is not a user cart")]
    NotUserCart { identity: Identity },
}
