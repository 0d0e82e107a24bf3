//! Transaction boundary for the cart reservation service.
//!
//! A [`Store`] opens [`Transaction`]s that span three concerns:
//! - the [`StockLedger`], available units per SKU
//! - the read-only [`Catalog`]
//! - the [`CartStore`], one cart document per identity
//!
//! Two backends are provided: [`InMemoryStore`] for tests and local runs and
//! [`PostgresStore`] for production.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use store::{CartStore, Catalog, StockLedger, Store, Transaction};
