//! Shared types used across the cart reservation crates.

pub mod types;

pub use types::{CartId, Version};
