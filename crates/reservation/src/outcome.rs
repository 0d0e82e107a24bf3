//! Results returned by cart mutations.

use chrono::{DateTime, Utc};
use domain::{Cart, Money};
use serde::Serialize;

/// Something the caller should know about that did not fail the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartWarning {
    /// The applied coupon no longer fits the cart and was dropped.
    CouponRemoved { code: String, reason: String },
}

impl std::fmt::Display for CartWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CartWarning::CouponRemoved { code, reason } => {
                write!(f, "coupon {code} was removed: {reason}")
            }
        }
    }
}

/// The committed cart after a mutation, with its expiry and any warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartOutcome {
    pub cart: Cart,
    pub expires_at: Option<DateTime<Utc>>,
    pub warnings: Vec<CartWarning>,
}

impl CartOutcome {
    pub fn new(cart: Cart, warnings: Vec<CartWarning>) -> Self {
        Self {
            expires_at: cart.expires_at(),
            cart,
            warnings,
        }
    }

    /// Amount payable after the applied coupon's discount.
    pub fn amount_due(&self) -> Money {
        let discount = self
            .cart
            .applied_coupon()
            .map_or(Money::zero(), |coupon| coupon.discount);
        self.cart.total_price() - discount
    }
}
