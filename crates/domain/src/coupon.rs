//! Coupon bookkeeping stored on a cart.
//!
//! Discount rules live outside the cart; the cart only records what the
//! evaluator last quoted for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cart::Money;

/// A coupon applied to a cart, with the discount last computed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon {
    pub code: String,
    pub discount: Money,
    pub applied_at: DateTime<Utc>,
}

impl AppliedCoupon {
    /// Records a coupon quote applied at `applied_at`.
    pub fn new(code: impl Into<String>, discount: Money, applied_at: DateTime<Utc>) -> Self {
        Self {
            code: code.into(),
            discount,
            applied_at,
        }
    }
}

/// Result of evaluating a coupon against a cart total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponQuote {
    pub discount: Money,
    pub final_amount: Money,
}

impl CouponQuote {
    /// Builds a quote for `amount`, never discounting below zero.
    pub fn for_amount(amount: Money, discount: Money) -> Self {
        let discount = discount.min(amount).max(Money::zero());
        Self {
            discount,
            final_amount: amount - discount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_caps_discount_at_amount() {
        let quote = CouponQuote::for_amount(Money::from_cents(500), Money::from_cents(800));
        assert_eq!(quote.discount, Money::from_cents(500));
        assert_eq!(quote.final_amount, Money::zero());
    }

    #[test]
    fn quote_subtracts_discount() {
        let quote = CouponQuote::for_amount(Money::from_cents(5000), Money::from_cents(750));
        assert_eq!(quote.final_amount, Money::from_cents(4250));
    }
}
