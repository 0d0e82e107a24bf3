//! Domain layer for the cart reservation service.
//!
//! This crate holds the pure data model, free of any storage concern:
//! - [`Cart`] aggregate with its item list, price snapshot and coupon
//! - [`Identity`] of a cart owner (registered user or guest session)
//! - [`Product`] catalog snapshot with per-SKU [`StockEntry`] rows
//! - coupon bookkeeping ([`AppliedCoupon`], [`CouponQuote`])

pub mod cart;
pub mod catalog;
pub mod coupon;

pub use cart::{
    Cart, CartError, CartItem, GuestId, Identity, Money, ProductId, Sku, UserId,
};
pub use catalog::{Product, ProductImage, StockEntry};
pub use coupon::{AppliedCoupon, CouponQuote};
