//! Cart reservation engine.

use std::time::Instant;

use cart_store::{CartStore, Catalog, StockLedger, Store, Transaction};
use chrono::{DateTime, Utc};
use domain::{AppliedCoupon, Cart, CartItem, Identity, ProductId, Sku};

use crate::config::EngineConfig;
use crate::error::{ReservationError, Result};
use crate::outcome::{CartOutcome, CartWarning};
use crate::services::coupon::{CouponEvaluator, normalize};
use crate::services::session::{SessionHook, SessionPointer};
use crate::sweeper::ExpirySweeper;

/// Keeps cart quantities and the stock ledger in lockstep.
///
/// Every mutation runs in one store transaction: the ledger call and the cart
/// write commit together or not at all. A cart line holding `n` units always
/// corresponds to `n` units taken out of available stock.
pub struct ReservationEngine<S, C, H>
where
    S: Store,
    C: CouponEvaluator,
    H: SessionHook,
{
    store: S,
    coupons: C,
    sessions: H,
    sweeper: ExpirySweeper<S>,
    config: EngineConfig,
}

impl<S, C, H> ReservationEngine<S, C, H>
where
    S: Store + Clone + 'static,
    C: CouponEvaluator,
    H: SessionHook,
{
    /// Creates a new reservation engine.
    pub fn new(store: S, coupons: C, sessions: H, config: EngineConfig) -> Self {
        let sweeper = ExpirySweeper::new(store.clone());
        Self {
            store,
            coupons,
            sessions,
            sweeper,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sets the quantity of a cart line, reserving or releasing the
    /// difference.
    ///
    /// The cart is created on first use. Raising the quantity takes the
    /// difference out of stock and fails with `InsufficientStock` if the
    /// ledger cannot cover it; lowering it hands the difference back.
    /// Asking for the quantity already in the cart is rejected as `NoOp`.
    #[tracing::instrument(skip_all, fields(identity = %identity, product_id = %product_id, sku = %sku, desired = desired))]
    pub async fn set_item_quantity(
        &self,
        identity: &Identity,
        product_id: &ProductId,
        sku: &Sku,
        desired: u32,
    ) -> Result<CartOutcome> {
        let started = Instant::now();
        let result = self
            .apply_quantity(identity, product_id, sku, desired)
            .await;
        record_mutation("set_item_quantity", started, &result);
        result
    }

    async fn apply_quantity(
        &self,
        identity: &Identity,
        product_id: &ProductId,
        sku: &Sku,
        desired: u32,
    ) -> Result<CartOutcome> {
        if desired == 0 {
            return Err(ReservationError::InvalidQuantity { quantity: desired });
        }

        let now = Utc::now();
        if self.config.sweep_on_write {
            self.sweep_before_write(now).await;
        }

        let mut tx = self.store.begin().await?;

        let product = tx
            .find_product(product_id)
            .await?
            .ok_or_else(|| ReservationError::ProductNotFound {
                product_id: product_id.clone(),
            })?;
        let variant = product
            .stock_entry(sku)
            .ok_or_else(|| ReservationError::VariantNotFound {
                product_id: product_id.clone(),
                sku: sku.clone(),
            })?;

        let (mut cart, is_new) = match tx.find_by_identity(identity).await? {
            Some(cart) => (cart, false),
            None => (
                Cart::new(identity.clone(), now, self.config.guest_session_max_age),
                true,
            ),
        };

        let current = cart.quantity_of(product_id, sku);
        match desired.cmp(&current) {
            std::cmp::Ordering::Greater => {
                let delta = desired - current;
                tracing::debug!(delta, "reserving stock");
                tx.reserve(product_id, sku, delta).await?;
            }
            std::cmp::Ordering::Less => {
                let delta = current - desired;
                tracing::debug!(delta, "releasing stock");
                tx.release(product_id, sku, delta).await?;
            }
            std::cmp::Ordering::Equal => {
                return Err(ReservationError::NoOp {
                    sku: sku.clone(),
                    quantity: current,
                    cart: Box::new(cart),
                });
            }
        }

        let item = CartItem::new(
            product.id.clone(),
            product.name.clone(),
            sku.clone(),
            desired,
            product.unit_price(),
        )
        .with_variant(variant.color.clone(), variant.size.clone())
        .with_image(product.primary_image().map(str::to_owned));
        cart.upsert_item(item, now)?;

        let warnings = reprice_coupon(&self.coupons, &mut cart).await;
        cart.refresh_expiry(now, self.config.guest_session_max_age);

        if is_new {
            tx.create(&mut cart).await?;
        } else {
            tx.save(&mut cart).await?;
        }
        tx.commit().await?;

        self.refresh_session(&cart, now).await;
        Ok(CartOutcome::new(cart, warnings))
    }

    /// Removes the line holding `sku` and hands its units back to stock.
    #[tracing::instrument(skip_all, fields(identity = %identity, sku = %sku))]
    pub async fn remove_item(&self, identity: &Identity, sku: &Sku) -> Result<CartOutcome> {
        let started = Instant::now();
        let result = self.apply_removal(identity, sku).await;
        record_mutation("remove_item", started, &result);
        result
    }

    async fn apply_removal(&self, identity: &Identity, sku: &Sku) -> Result<CartOutcome> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let mut cart = tx
            .find_by_identity(identity)
            .await?
            .ok_or_else(|| ReservationError::ItemNotFound { sku: sku.clone() })?;
        let removed = cart.remove_item(sku, now)?;
        tx.release(&removed.product_id, &removed.sku, removed.quantity)
            .await?;

        let warnings = reprice_coupon(&self.coupons, &mut cart).await;
        cart.refresh_expiry(now, self.config.guest_session_max_age);
        tx.save(&mut cart).await?;
        tx.commit().await?;

        tracing::debug!(released = removed.quantity, "item removed");
        self.refresh_session(&cart, now).await;
        Ok(CartOutcome::new(cart, warnings))
    }

    /// Loads the identity's cart without changing anything.
    #[tracing::instrument(skip_all, fields(identity = %identity))]
    pub async fn get_cart(&self, identity: &Identity) -> Result<Option<Cart>> {
        let mut tx = self.store.begin().await?;
        let cart = tx.find_by_identity(identity).await?;
        tx.rollback().await?;
        Ok(cart)
    }

    /// Applies a coupon code to the identity's cart.
    ///
    /// The code is priced against the current total; a rejection leaves the
    /// cart untouched.
    #[tracing::instrument(skip_all, fields(identity = %identity, code = %code))]
    pub async fn apply_coupon(&self, identity: &Identity, code: &str) -> Result<CartOutcome> {
        let started = Instant::now();
        let result = self.apply_coupon_code(identity, code).await;
        record_mutation("apply_coupon", started, &result);
        result
    }

    async fn apply_coupon_code(&self, identity: &Identity, code: &str) -> Result<CartOutcome> {
        let now = Utc::now();
        let code = normalize(code);
        let mut tx = self.store.begin().await?;

        let mut cart = tx.find_by_identity(identity).await?.ok_or_else(|| {
            ReservationError::CartNotFound {
                identity: identity.clone(),
            }
        })?;

        let quote = self
            .coupons
            .evaluate(&code, cart.total_price())
            .await
            .map_err(|rejection| ReservationError::InvalidCoupon {
                code: code.clone(),
                reason: rejection.to_string(),
            })?;

        cart.apply_coupon(AppliedCoupon::new(code, quote.discount, now), now);
        cart.refresh_expiry(now, self.config.guest_session_max_age);
        tx.save(&mut cart).await?;
        tx.commit().await?;

        self.refresh_session(&cart, now).await;
        Ok(CartOutcome::new(cart, Vec::new()))
    }

    /// Deletes the identity's cart after checkout.
    ///
    /// Stock is not released: the reserved units now belong to the order.
    #[tracing::instrument(skip_all, fields(identity = %identity))]
    pub async fn clear_cart(&self, identity: &Identity) -> Result<()> {
        let started = Instant::now();
        let result = self.apply_clear(identity).await;
        record_mutation("clear_cart", started, &result);
        result
    }

    async fn apply_clear(&self, identity: &Identity) -> Result<()> {
        let mut tx = self.store.begin().await?;
        if !tx.delete_by_identity(identity).await? {
            return Err(ReservationError::CartNotFound {
                identity: identity.clone(),
            });
        }
        tx.commit().await?;

        self.sessions.clear(identity).await;
        Ok(())
    }

    async fn sweep_before_write(&self, now: DateTime<Utc>) {
        if let Err(e) = self.sweeper.sweep_at(now).await {
            tracing::warn!(error = %e, "opportunistic sweep failed");
        }
    }

    async fn refresh_session(&self, cart: &Cart, now: DateTime<Utc>) {
        let pointer = session_pointer(cart, now, &self.config);
        self.sessions.refresh(cart.identity(), pointer).await;
    }
}

/// Re-prices the applied coupon against the cart's current total.
///
/// A coupon that no longer applies is dropped and reported as a warning
/// rather than failing the mutation.
pub(crate) async fn reprice_coupon<C: CouponEvaluator>(
    coupons: &C,
    cart: &mut Cart,
) -> Vec<CartWarning> {
    let Some(code) = cart.applied_coupon().map(|coupon| coupon.code.clone()) else {
        return Vec::new();
    };

    match coupons.evaluate(&code, cart.total_price()).await {
        Ok(quote) => {
            cart.update_coupon_discount(quote.discount);
            Vec::new()
        }
        Err(rejection) => {
            tracing::info!(code = %code, reason = %rejection, "coupon no longer applies");
            cart.clear_coupon();
            vec![CartWarning::CouponRemoved {
                code,
                reason: rejection.to_string(),
            }]
        }
    }
}

pub(crate) fn session_pointer(
    cart: &Cart,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> SessionPointer {
    let session_expires_at = match cart.identity() {
        Identity::Guest(_) => cart
            .expires_at()
            .unwrap_or(now + config.guest_session_max_age),
        Identity::User(_) => now + config.user_session_max_age,
    };

    SessionPointer {
        cart_id: cart.id(),
        item_count: cart.item_count(),
        session_expires_at,
    }
}

fn record_mutation<T>(operation: &'static str, started: Instant, result: &Result<T>) {
    metrics::histogram!("cart_operation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(_) => {
            metrics::counter!("cart_mutations_total", "operation" => operation).increment(1);
        }
        Err(ReservationError::InsufficientStock { .. }) => {
            metrics::counter!("cart_insufficient_stock_total").increment(1);
        }
        Err(ReservationError::WriteConflict { .. }) => {
            metrics::counter!("cart_write_conflicts_total").increment(1);
        }
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cart_store::InMemoryStore;
    use chrono::Duration;
    use domain::{GuestId, Money, Product, StockEntry, UserId};

    use crate::services::{Coupon, InMemoryCouponBook, InMemorySessionRegistry};

    type TestEngine = ReservationEngine<InMemoryStore, InMemoryCouponBook, InMemorySessionRegistry>;

    fn hoodie() -> Product {
        Product::new("hoodie", "Hoodie", Money::from_cents(5000))
            .with_sales_price(Money::from_cents(4000))
            .with_image("https://cdn.example/hoodie-back.jpg", false)
            .with_image("https://cdn.example/hoodie.jpg", true)
            .with_stock(StockEntry::new("H-GRY-M", "grey", "M", 5))
    }

    fn setup() -> (TestEngine, InMemoryStore, InMemoryCouponBook, InMemorySessionRegistry) {
        let store = InMemoryStore::with_products([hoodie()]);
        let coupons = InMemoryCouponBook::new();
        let sessions = InMemorySessionRegistry::new();
        let engine = ReservationEngine::new(
            store.clone(),
            coupons.clone(),
            sessions.clone(),
            EngineConfig::default(),
        );
        (engine, store, coupons, sessions)
    }

    fn guest() -> Identity {
        Identity::Guest(GuestId::new("guest-1"))
    }

    fn pid() -> ProductId {
        ProductId::new("hoodie")
    }

    fn sku() -> Sku {
        Sku::new("H-GRY-M")
    }

    #[tokio::test]
    async fn test_new_line_snapshots_catalog_data() {
        let (engine, _, _, _) = setup();

        let outcome = engine
            .set_item_quantity(&guest(), &pid(), &sku(), 2)
            .await
            .unwrap();

        let line = &outcome.cart.items()[0];
        assert_eq!(line.name, "Hoodie");
        assert_eq!(line.color, "grey");
        assert_eq!(line.size, "M");
        assert_eq!(line.price_at_time_added, Money::from_cents(4000));
        assert_eq!(line.image.as_deref(), Some("https://cdn.example/hoodie.jpg"));
        assert_eq!(outcome.cart.total_price(), Money::from_cents(8000));
    }

    #[tokio::test]
    async fn test_guest_expiry_slides_forward() {
        let (engine, _, _, sessions) = setup();

        let first = engine
            .set_item_quantity(&guest(), &pid(), &sku(), 1)
            .await
            .unwrap();
        let second = engine
            .set_item_quantity(&guest(), &pid(), &sku(), 2)
            .await
            .unwrap();

        let first_expiry = first.expires_at.unwrap();
        let second_expiry = second.expires_at.unwrap();
        assert!(second_expiry >= first_expiry);
        assert!(second_expiry > Utc::now() + Duration::hours(23));

        let pointer = sessions.pointer(&guest()).unwrap();
        assert_eq!(pointer.cart_id, second.cart.id());
        assert_eq!(pointer.session_expires_at, second_expiry);
    }

    #[tokio::test]
    async fn test_user_cart_has_no_expiry() {
        let (engine, _, _, sessions) = setup();
        let user = Identity::User(UserId::new());

        let outcome = engine
            .set_item_quantity(&user, &pid(), &sku(), 1)
            .await
            .unwrap();

        assert_eq!(outcome.expires_at, None);
        assert!(sessions.pointer(&user).is_some());
    }

    #[tokio::test]
    async fn test_zero_quantity_is_rejected() {
        let (engine, store, _, _) = setup();

        let err = engine
            .set_item_quantity(&guest(), &pid(), &sku(), 0)
            .await
            .unwrap_err();

        assert!(matches!(err, ReservationError::InvalidQuantity { quantity: 0 }));
        assert_eq!(store.ledger_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_variant() {
        let (engine, store, _, _) = setup();

        let err = engine
            .set_item_quantity(&guest(), &pid(), &Sku::new("H-RED-XL"), 1)
            .await
            .unwrap_err();

        assert!(matches!(err, ReservationError::VariantNotFound { .. }));
        assert_eq!(store.cart_count(), 0);
    }

    #[tokio::test]
    async fn test_coupon_dropped_when_total_falls_below_minimum() {
        let (engine, _, coupons, _) = setup();
        coupons.insert(Coupon::percentage("BIG10", 10).with_minimum(Money::from_cents(10000)));

        engine
            .set_item_quantity(&guest(), &pid(), &sku(), 3)
            .await
            .unwrap();
        let applied = engine.apply_coupon(&guest(), "big10").await.unwrap();
        assert_eq!(
            applied.cart.applied_coupon().map(|c| c.discount),
            Some(Money::from_cents(1200))
        );
        assert_eq!(applied.amount_due(), Money::from_cents(10800));

        let lowered = engine
            .set_item_quantity(&guest(), &pid(), &sku(), 2)
            .await
            .unwrap();

        assert!(lowered.cart.applied_coupon().is_none());
        assert_eq!(lowered.warnings.len(), 1);
        assert!(matches!(
            &lowered.warnings[0],
            CartWarning::CouponRemoved { code, .. } if code == "BIG10"
        ));
    }

    #[tokio::test]
    async fn test_coupon_discount_follows_total() {
        let (engine, _, coupons, _) = setup();
        coupons.insert(Coupon::percentage("TEN", 10));

        engine
            .set_item_quantity(&guest(), &pid(), &sku(), 1)
            .await
            .unwrap();
        engine.apply_coupon(&guest(), "TEN").await.unwrap();
        let outcome = engine
            .set_item_quantity(&guest(), &pid(), &sku(), 4)
            .await
            .unwrap();

        assert!(outcome.warnings.is_empty());
        assert_eq!(
            outcome.cart.applied_coupon().map(|c| c.discount),
            Some(Money::from_cents(1600))
        );
    }

    #[tokio::test]
    async fn test_apply_coupon_requires_cart_and_valid_code() {
        let (engine, _, _, _) = setup();

        let err = engine.apply_coupon(&guest(), "TEN").await.unwrap_err();
        assert!(matches!(err, ReservationError::CartNotFound { .. }));

        engine
            .set_item_quantity(&guest(), &pid(), &sku(), 1)
            .await
            .unwrap();
        let err = engine.apply_coupon(&guest(), "TEN").await.unwrap_err();
        assert!(matches!(err, ReservationError::InvalidCoupon { .. }));
    }

    #[tokio::test]
    async fn test_clear_cart_keeps_stock_reserved() {
        let (engine, store, _, sessions) = setup();

        engine
            .set_item_quantity(&guest(), &pid(), &sku(), 2)
            .await
            .unwrap();
        engine.clear_cart(&guest()).await.unwrap();

        assert_eq!(store.cart_count(), 0);
        assert_eq!(store.stock_level(&pid(), &sku()), Some(3));
        assert!(sessions.pointer(&guest()).is_none());

        let err = engine.clear_cart(&guest()).await.unwrap_err();
        assert!(matches!(err, ReservationError::CartNotFound { .. }));
    }

    #[test]
    fn test_user_session_pointer_uses_user_max_age() {
        let now = Utc::now();
        let config = EngineConfig::default();
        let cart = Cart::for_user(UserId::new(), now);

        let pointer = session_pointer(&cart, now, &config);
        assert_eq!(pointer.session_expires_at, now + config.user_session_max_age);
        assert_eq!(pointer.item_count, 0);
    }
}
