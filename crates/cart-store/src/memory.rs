use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, Version};
use domain::{Cart, Identity, Product, ProductId, Sku, StockEntry};

use crate::{
    Result, StoreError,
    store::{CartStore, Catalog, StockLedger, Store, Transaction},
};

/// Write locks held by open transactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Cart(CartId),
    Owner(Identity),
}

#[derive(Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    carts: HashMap<CartId, Cart>,
    /// Unique index: one cart per identity.
    owners: HashMap<Identity, CartId>,
    locks: HashMap<LockKey, u64>,
    next_tx: u64,
    reserve_calls: u64,
    release_calls: u64,
}

impl MemoryState {
    fn stock_mut(&mut self, product_id: &ProductId, sku: &Sku) -> Option<&mut StockEntry> {
        self.products
            .get_mut(product_id)?
            .inventory
            .iter_mut()
            .find(|entry| &entry.sku == sku)
    }

    fn stock(&self, product_id: &ProductId, sku: &Sku) -> Option<&StockEntry> {
        self.products.get(product_id)?.stock_entry(sku)
    }

    /// Takes `key` for `tx`. Fails if another transaction holds it.
    fn acquire(&mut self, key: LockKey, tx: u64) -> bool {
        match self.locks.get(&key) {
            Some(owner) if *owner != tx => false,
            _ => {
                self.locks.insert(key, tx);
                true
            }
        }
    }

    fn release_locks(&mut self, tx: u64) {
        self.locks.retain(|_, owner| *owner != tx);
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory transactional store for tests and local runs.
///
/// Provides the same isolation guarantees the engine relies on from the
/// PostgreSQL implementation:
/// - reservations are applied immediately under a mutex, so two transactions
///   can never both take the last unit; rollback hands them back
/// - releases are deferred to commit, so no other transaction can consume
///   units that a rollback would take away again
/// - cart writes are staged, guarded by per-document write locks and a
///   version check, and only become visible on commit
/// - a unique index keeps one cart per identity
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `products`.
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        for product in products {
            store.insert_product(product);
        }
        store
    }

    /// Inserts or replaces a catalog product.
    pub fn insert_product(&self, product: Product) {
        lock_state(&self.state)
            .products
            .insert(product.id.clone(), product);
    }

    /// Returns the committed available quantity of a SKU.
    pub fn stock_level(&self, product_id: &ProductId, sku: &Sku) -> Option<u32> {
        lock_state(&self.state)
            .stock(product_id, sku)
            .map(|entry| entry.quantity)
    }

    /// Returns the number of committed carts.
    pub fn cart_count(&self) -> usize {
        lock_state(&self.state).carts.len()
    }

    /// Returns the committed cart of `identity`.
    pub fn committed_cart(&self, identity: &Identity) -> Option<Cart> {
        let state = lock_state(&self.state);
        state
            .owners
            .get(identity)
            .and_then(|id| state.carts.get(id))
            .cloned()
    }

    /// Returns how many reserve and release calls the ledger has served.
    pub fn ledger_calls(&self) -> u64 {
        let state = lock_state(&self.state);
        state.reserve_calls + state.release_calls
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        let mut state = lock_state(&self.state);
        state.next_tx += 1;

        Ok(InMemoryTransaction {
            id: state.next_tx,
            state: Arc::clone(&self.state),
            reserved: Vec::new(),
            released: Vec::new(),
            writes: HashMap::new(),
            finished: false,
        })
    }
}

enum PendingWrite {
    Upsert(Cart),
    Delete(Identity),
}

/// Transaction over an [`InMemoryStore`].
pub struct InMemoryTransaction {
    id: u64,
    state: Arc<Mutex<MemoryState>>,
    /// Applied reservations, handed back on rollback.
    reserved: Vec<(ProductId, Sku, u32)>,
    /// Releases, applied on commit.
    released: Vec<(ProductId, Sku, u32)>,
    writes: HashMap<CartId, PendingWrite>,
    finished: bool,
}

impl InMemoryTransaction {
    /// Version and owner of a cart as seen by this transaction.
    fn current(&self, state: &MemoryState, id: CartId) -> Option<(Version, Identity)> {
        match self.writes.get(&id) {
            Some(PendingWrite::Upsert(cart)) => Some((cart.version(), cart.identity().clone())),
            Some(PendingWrite::Delete(_)) => None,
            None => state
                .carts
                .get(&id)
                .map(|cart| (cart.version(), cart.identity().clone())),
        }
    }

    /// True if `identity` owns a cart other than `except`, as seen by this
    /// transaction.
    fn owner_taken(&self, state: &MemoryState, identity: &Identity, except: CartId) -> bool {
        let pending = self.writes.iter().any(|(id, write)| {
            *id != except
                && matches!(write, PendingWrite::Upsert(cart) if cart.identity() == identity)
        });
        // A staged write on the committed owner means it was deleted or moved.
        let committed = state
            .owners
            .get(identity)
            .is_some_and(|owner| *owner != except && !self.writes.contains_key(owner));
        pending || committed
    }

    fn rollback_in_place(&mut self) {
        let mut state = lock_state(&self.state);
        for (product_id, sku, quantity) in self.reserved.drain(..) {
            if let Some(entry) = state.stock_mut(&product_id, &sku) {
                entry.quantity = entry.quantity.saturating_add(quantity);
            }
        }
        self.released.clear();
        self.writes.clear();
        state.release_locks(self.id);
        self.finished = true;
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback_in_place();
        }
    }
}

#[async_trait]
impl StockLedger for InMemoryTransaction {
    async fn reserve(&mut self, product_id: &ProductId, sku: &Sku, quantity: u32) -> Result<()> {
        let mut state = lock_state(&self.state);
        state.reserve_calls += 1;

        match state.stock_mut(product_id, sku) {
            Some(entry) if entry.quantity >= quantity => {
                entry.quantity -= quantity;
                self.reserved
                    .push((product_id.clone(), sku.clone(), quantity));
                Ok(())
            }
            _ => Err(StoreError::InsufficientStock {
                product_id: product_id.clone(),
                sku: sku.clone(),
                requested: quantity,
            }),
        }
    }

    async fn release(&mut self, product_id: &ProductId, sku: &Sku, quantity: u32) -> Result<()> {
        let mut state = lock_state(&self.state);
        state.release_calls += 1;
        self.released
            .push((product_id.clone(), sku.clone(), quantity));
        Ok(())
    }

    async fn available(&mut self, product_id: &ProductId, sku: &Sku) -> Result<Option<u32>> {
        let state = lock_state(&self.state);
        let pending: u32 = self
            .released
            .iter()
            .filter(|(p, s, _)| p == product_id && s == sku)
            .map(|(_, _, quantity)| *quantity)
            .sum();

        Ok(state
            .stock(product_id, sku)
            .map(|entry| entry.quantity.saturating_add(pending)))
    }
}

#[async_trait]
impl Catalog for InMemoryTransaction {
    async fn find_product(&mut self, product_id: &ProductId) -> Result<Option<Product>> {
        Ok(lock_state(&self.state).products.get(product_id).cloned())
    }
}

#[async_trait]
impl CartStore for InMemoryTransaction {
    async fn find_by_identity(&mut self, identity: &Identity) -> Result<Option<Cart>> {
        let pending = self.writes.values().find_map(|write| match write {
            PendingWrite::Upsert(cart) if cart.identity() == identity => Some(cart.clone()),
            _ => None,
        });
        if pending.is_some() {
            return Ok(pending);
        }

        let state = lock_state(&self.state);
        let Some(id) = state.owners.get(identity) else {
            return Ok(None);
        };

        // A staged write on the committed cart means it was deleted or moved
        // to another identity in this transaction.
        if self.writes.contains_key(id) {
            return Ok(None);
        }
        Ok(state.carts.get(id).cloned())
    }

    async fn create(&mut self, cart: &mut Cart) -> Result<()> {
        let id = cart.id();
        let identity = cart.identity().clone();
        let mut state = lock_state(&self.state);

        if state.carts.contains_key(&id) || self.writes.contains_key(&id) {
            return Err(StoreError::cart_conflict(id, "cart already exists"));
        }
        if self.owner_taken(&state, &identity, id) {
            return Err(StoreError::identity_conflict(
                &identity,
                "identity already owns a cart",
            ));
        }
        if !state.acquire(LockKey::Owner(identity.clone()), self.id)
            || !state.acquire(LockKey::Cart(id), self.id)
        {
            return Err(StoreError::identity_conflict(
                &identity,
                "another transaction is creating a cart for this identity",
            ));
        }

        cart.set_version(Version::first());
        self.writes.insert(id, PendingWrite::Upsert(cart.clone()));
        Ok(())
    }

    async fn save(&mut self, cart: &mut Cart) -> Result<()> {
        let id = cart.id();
        let mut state = lock_state(&self.state);

        let Some((current_version, current_identity)) = self.current(&state, id) else {
            return Err(StoreError::cart_conflict(id, "cart no longer exists"));
        };
        if current_version != cart.version() {
            return Err(StoreError::cart_conflict(
                id,
                "cart was modified by another transaction",
            ));
        }
        if !state.acquire(LockKey::Cart(id), self.id) {
            return Err(StoreError::cart_conflict(
                id,
                "cart is being modified by another transaction",
            ));
        }
        if &current_identity != cart.identity() {
            let identity = cart.identity().clone();
            if self.owner_taken(&state, &identity, id)
                || !state.acquire(LockKey::Owner(identity.clone()), self.id)
            {
                return Err(StoreError::identity_conflict(
                    &identity,
                    "identity already owns a cart",
                ));
            }
        }

        cart.set_version(current_version.next());
        self.writes.insert(id, PendingWrite::Upsert(cart.clone()));
        Ok(())
    }

    async fn delete(&mut self, cart: &Cart) -> Result<()> {
        let id = cart.id();
        let mut state = lock_state(&self.state);

        let Some((current_version, current_identity)) = self.current(&state, id) else {
            return Err(StoreError::cart_conflict(id, "cart no longer exists"));
        };
        if current_version != cart.version() {
            return Err(StoreError::cart_conflict(
                id,
                "cart was modified by another transaction",
            ));
        }
        if !state.acquire(LockKey::Cart(id), self.id) {
            return Err(StoreError::cart_conflict(
                id,
                "cart is being modified by another transaction",
            ));
        }

        self.writes
            .insert(id, PendingWrite::Delete(current_identity));
        Ok(())
    }

    async fn delete_by_identity(&mut self, identity: &Identity) -> Result<bool> {
        let Some(cart) = self.find_by_identity(identity).await? else {
            return Ok(false);
        };
        self.delete(&cart).await?;
        Ok(true)
    }

    async fn find_expired_guest_carts(&mut self, now: DateTime<Utc>) -> Result<Vec<Cart>> {
        let state = lock_state(&self.state);

        let committed = state
            .carts
            .values()
            .filter(|cart| !self.writes.contains_key(&cart.id()));
        let staged = self.writes.values().filter_map(|write| match write {
            PendingWrite::Upsert(cart) => Some(cart),
            PendingWrite::Delete(_) => None,
        });

        let mut expired: Vec<Cart> = committed
            .chain(staged)
            .filter(|cart| cart.is_expired_at(now))
            .cloned()
            .collect();
        expired.sort_by_key(Cart::expires_at);
        Ok(expired)
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(mut self) -> Result<()> {
        let mut state = lock_state(&self.state);

        for (product_id, sku, quantity) in self.released.drain(..) {
            if let Some(entry) = state.stock_mut(&product_id, &sku) {
                entry.quantity = entry.quantity.saturating_add(quantity);
            }
        }

        for (id, write) in self.writes.drain() {
            match write {
                PendingWrite::Upsert(cart) => {
                    let previous_owner = state.carts.get(&id).map(|c| c.identity().clone());
                    if let Some(previous) = previous_owner
                        && state.owners.get(&previous) == Some(&id)
                    {
                        state.owners.remove(&previous);
                    }
                    state.owners.insert(cart.identity().clone(), id);
                    state.carts.insert(id, cart);
                }
                PendingWrite::Delete(identity) => {
                    state.carts.remove(&id);
                    if state.owners.get(&identity) == Some(&id) {
                        state.owners.remove(&identity);
                    }
                }
            }
        }

        self.reserved.clear();
        state.release_locks(self.id);
        drop(state);
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.rollback_in_place();
        Ok(())
    }
}
