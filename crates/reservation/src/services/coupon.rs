//! Coupon evaluator trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{CouponQuote, Money};
use thiserror::Error;

/// Why a coupon code was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("coupon {code} does not exist")]
    Unknown { code: String },

    #[error("coupon {code} is not valid at this time")]
    NotValid { code: String },

    #[error("coupon {code} has reached its usage limit")]
    Exhausted { code: String },

    #[error("minimum order for coupon {code} is {minimum}")]
    BelowMinimum { code: String, minimum: Money },
}

/// Prices a coupon code against a cart total.
///
/// The engine never implements discount rules itself; it stores whatever the
/// evaluator quotes and asks again after every cart change.
#[async_trait]
pub trait CouponEvaluator: Send + Sync {
    /// Quotes `code` for an order of `amount`.
    async fn evaluate(&self, code: &str, amount: Money) -> Result<CouponQuote, CouponRejection>;
}

/// How a coupon discounts an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountKind {
    /// Whole percent of the order amount.
    Percentage(u32),
    /// Flat amount off.
    Fixed(Money),
}

/// A coupon definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    pub code: String,
    pub kind: DiscountKind,
    pub minimum_amount: Money,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub max_uses: Option<u32>,
    pub current_uses: u32,
    pub active: bool,
}

impl Coupon {
    fn new(code: &str, kind: DiscountKind) -> Self {
        Self {
            code: normalize(code),
            kind,
            minimum_amount: Money::zero(),
            starts_at: None,
            ends_at: None,
            max_uses: None,
            current_uses: 0,
            active: true,
        }
    }

    /// A coupon taking `percent` percent off.
    pub fn percentage(code: &str, percent: u32) -> Self {
        Self::new(code, DiscountKind::Percentage(percent))
    }

    /// A coupon taking a flat `amount` off.
    pub fn fixed(code: &str, amount: Money) -> Self {
        Self::new(code, DiscountKind::Fixed(amount))
    }

    pub fn with_minimum(mut self, minimum: Money) -> Self {
        self.minimum_amount = minimum;
        self
    }

    pub fn valid_between(mut self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        self.starts_at = Some(starts_at);
        self.ends_at = Some(ends_at);
        self
    }

    pub fn with_max_uses(mut self, max_uses: u32, current_uses: u32) -> Self {
        self.max_uses = Some(max_uses);
        self.current_uses = current_uses;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// Quotes this coupon for `amount` at `now`.
    pub fn quote(&self, amount: Money, now: DateTime<Utc>) -> Result<CouponQuote, CouponRejection> {
        let in_window = self.starts_at.is_none_or(|start| now >= start)
            && self.ends_at.is_none_or(|end| now <= end);
        if !self.active || !in_window {
            return Err(CouponRejection::NotValid {
                code: self.code.clone(),
            });
        }
        if self.max_uses.is_some_and(|max| self.current_uses >= max) {
            return Err(CouponRejection::Exhausted {
                code: self.code.clone(),
            });
        }
        if amount < self.minimum_amount {
            return Err(CouponRejection::BelowMinimum {
                code: self.code.clone(),
                minimum: self.minimum_amount,
            });
        }

        let discount = match self.kind {
            DiscountKind::Percentage(percent) => amount.percent(percent),
            DiscountKind::Fixed(value) => value,
        };
        Ok(CouponQuote::for_amount(amount, discount))
    }
}

/// Codes are matched case-insensitively, stored upper-case.
pub fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

/// In-memory coupon book for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCouponBook {
    coupons: Arc<RwLock<HashMap<String, Coupon>>>,
}

impl InMemoryCouponBook {
    /// Creates an empty coupon book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a coupon.
    pub fn insert(&self, coupon: Coupon) {
        self.coupons
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(coupon.code.clone(), coupon);
    }

    /// Quotes `code` for `amount` at `now`.
    pub fn evaluate_at(
        &self,
        code: &str,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<CouponQuote, CouponRejection> {
        let code = normalize(code);
        let coupons = self.coupons.read().unwrap_or_else(PoisonError::into_inner);
        coupons
            .get(&code)
            .ok_or(CouponRejection::Unknown { code: code.clone() })?
            .quote(amount, now)
    }
}

#[async_trait]
impl CouponEvaluator for InMemoryCouponBook {
    async fn evaluate(&self, code: &str, amount: Money) -> Result<CouponQuote, CouponRejection> {
        self.evaluate_at(code, amount, Utc::now())
    }
}
