//! Cart reservation: keeps carts and the stock ledger in lockstep.
//!
//! - [`ReservationEngine`] sets and removes cart lines, reserving and
//!   releasing stock in the same transaction as the cart write
//! - [`MergeCoordinator`] folds a guest cart into the user's cart at login
//! - [`ExpirySweeper`] hands back the stock of abandoned guest carts
//!
//! Coupon pricing and session bookkeeping are consumed through the
//! [`CouponEvaluator`] and [`SessionHook`] traits.

pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod outcome;
pub mod services;
pub mod sweeper;

pub use config::EngineConfig;
pub use engine::ReservationEngine;
pub use error::{ReservationError, Result};
pub use merge::{MergeCoordinator, MergeKind, MergeOutcome};
pub use outcome::{CartOutcome, CartWarning};
pub use services::{
    Coupon, CouponEvaluator, CouponRejection, DiscountKind, InMemoryCouponBook,
    InMemorySessionRegistry, SessionHook, SessionPointer,
};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperHandle};
