use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Cart, Identity, Product, ProductId, Sku};

use crate::Result;

/// Per-SKU available quantity, mutated only through atomic conditional
/// updates.
///
/// Implemented by a transaction: every call participates in the same
/// all-or-nothing unit as the cart writes made through [`CartStore`].
#[async_trait]
pub trait StockLedger: Send {
    /// Takes `quantity` units of `sku` out of available stock.
    ///
    /// The check and the decrement are a single atomic step: if no stock row
    /// for `(product_id, sku)` holds at least `quantity` units the call fails
    /// with `InsufficientStock` and mutates nothing.
    async fn reserve(&mut self, product_id: &ProductId, sku: &Sku, quantity: u32) -> Result<()>;

    /// Returns `quantity` units of `sku` to available stock.
    ///
    /// Unconditional. The ledger does not detect over-release.
    async fn release(&mut self, product_id: &ProductId, sku: &Sku, quantity: u32) -> Result<()>;

    /// Reads the available quantity of a SKU, `None` if there is no such row.
    async fn available(&mut self, product_id: &ProductId, sku: &Sku) -> Result<Option<u32>>;
}

/// Read access to the product catalog.
#[async_trait]
pub trait Catalog: Send {
    /// Loads a product with its inventory rows.
    async fn find_product(&mut self, product_id: &ProductId) -> Result<Option<Product>>;
}

/// Cart documents, at most one per identity.
#[async_trait]
pub trait CartStore: Send {
    /// Loads the cart owned by `identity`.
    async fn find_by_identity(&mut self, identity: &Identity) -> Result<Option<Cart>>;

    /// Inserts a new cart and sets its version to [`common::Version::first`].
    ///
    /// Fails with `WriteConflict` if the identity already owns a cart.
    async fn create(&mut self, cart: &mut Cart) -> Result<()>;

    /// Replaces a stored cart, bumping its version.
    ///
    /// Fails with `WriteConflict` if the stored version differs from the
    /// version the cart was loaded at, or if the cart no longer exists.
    async fn save(&mut self, cart: &mut Cart) -> Result<()>;

    /// Deletes a cart, provided it is still at the version it was loaded at.
    async fn delete(&mut self, cart: &Cart) -> Result<()>;

    /// Deletes the cart owned by `identity`. Returns false if there was none.
    async fn delete_by_identity(&mut self, identity: &Identity) -> Result<bool>;

    /// Lists guest carts whose expiry lies strictly before `now`.
    async fn find_expired_guest_carts(&mut self, now: DateTime<Utc>) -> Result<Vec<Cart>>;
}

/// A unit of work spanning the stock ledger, the catalog and the cart store.
///
/// Nothing done through a transaction is visible as committed until
/// [`Transaction::commit`] succeeds. Dropping a transaction without
/// committing rolls it back.
#[async_trait]
pub trait Transaction: StockLedger + Catalog + CartStore + Send {
    /// Makes every mutation of this transaction durable.
    async fn commit(self) -> Result<()>;

    /// Discards every mutation of this transaction.
    async fn rollback(self) -> Result<()>;
}

/// Entry point to a transactional backend.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Store: Send + Sync {
    type Tx: Transaction + 'static;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}
