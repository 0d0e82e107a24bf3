//! Collaborator traits the engine consumes, with in-memory implementations.

pub mod coupon;
pub mod session;

pub use coupon::{Coupon, CouponEvaluator, CouponRejection, DiscountKind, InMemoryCouponBook};
pub use session::{InMemorySessionRegistry, SessionHook, SessionPointer};
