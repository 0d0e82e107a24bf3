//! Expiry sweeper: hands the stock of abandoned guest carts back.

use std::time::Duration;

use cart_store::{CartStore, StockLedger, Store, StoreError, Transaction};
use chrono::{DateTime, Utc};
use domain::Cart;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired carts found by the scan.
    pub examined: u64,
    /// Carts whose stock was released and which were deleted.
    pub released_carts: u64,
    /// Units handed back to the ledger.
    pub released_units: u64,
    /// Carts that could not be swept this pass.
    pub failed: u64,
}

/// Releases and deletes expired guest carts.
///
/// Each cart is handled in its own transaction: its releases and its delete
/// commit together, so a crash mid-sweep never leaks reserved stock. A cart
/// that fails is logged and left for the next pass.
#[derive(Clone)]
pub struct ExpirySweeper<S> {
    store: S,
}

impl<S> ExpirySweeper<S>
where
    S: Store + Clone + 'static,
{
    /// Creates a new sweeper.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Sweeps carts that expired before `now`.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = {
            let mut tx = self.store.begin().await?;
            let expired = tx.find_expired_guest_carts(now).await?;
            tx.rollback().await?;
            expired
        };

        let mut report = SweepReport::default();
        for cart in &expired {
            report.examined += 1;
            match self.release_cart(cart, now).await {
                Ok(Some(units)) => {
                    report.released_carts += 1;
                    report.released_units += units;
                }
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        cart_id = %cart.id(),
                        identity = %cart.identity(),
                        error = %e,
                        "failed to sweep expired cart"
                    );
                }
            }
        }

        metrics::counter!("sweeper_carts_released_total").increment(report.released_carts);
        metrics::counter!("sweeper_units_released_total").increment(report.released_units);
        metrics::counter!("sweeper_failures_total").increment(report.failed);

        if report.released_carts > 0 {
            tracing::info!(
                released_carts = report.released_carts,
                released_units = report.released_units,
                failed = report.failed,
                "expired guest carts swept"
            );
        }
        Ok(report)
    }

    /// Sweeps carts that have expired by now.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Releases one cart's stock and deletes it.
    ///
    /// Returns `None` if the cart was touched since the scan and is no
    /// longer expired, or was already removed.
    async fn release_cart(
        &self,
        candidate: &Cart,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<u64>, StoreError> {
        let mut tx = self.store.begin().await?;

        let Some(cart) = tx.find_by_identity(candidate.identity()).await? else {
            return Ok(None);
        };
        if cart.id() != candidate.id() || !cart.is_expired_at(now) {
            return Ok(None);
        }

        let mut units = 0u64;
        for item in cart.items() {
            tx.release(&item.product_id, &item.sku, item.quantity)
                .await?;
            units += u64::from(item.quantity);
        }
        tx.delete(&cart).await?;
        tx.commit().await?;

        Ok(Some(units))
    }

    /// Runs a sweep every `interval` until the handle is stopped.
    ///
    /// The first sweep runs immediately.
    pub fn start(self, interval: Duration) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = interval.as_secs(), "expiry sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            tracing::warn!(error = %e, "expiry sweep failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("expiry sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it to finish.
    ///
    /// A sweep already in progress completes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "expiry sweeper task ended abnormally");
        }
    }

    /// True once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cart_store::InMemoryStore;
    use chrono::Duration as ChronoDuration;
    use domain::{CartItem, GuestId, Money, Product, ProductId, Sku, StockEntry, UserId};

    fn store() -> InMemoryStore {
        InMemoryStore::with_products([Product::new("cap", "Cap", Money::from_cents(1500))
            .with_stock(StockEntry::new("B", "black", "OS", 7))])
    }

    /// Seeds a cart holding `quantity` units of B, with the stock taken.
    async fn seed(store: &InMemoryStore, mut cart: Cart, quantity: u32) -> Cart {
        let now = Utc::now();
        cart.upsert_item(
            CartItem::new("cap", "Cap", "B", quantity, Money::from_cents(1500)),
            now,
        )
        .unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.reserve(&ProductId::new("cap"), &Sku::new("B"), quantity)
            .await
            .unwrap();
        tx.create(&mut cart).await.unwrap();
        tx.commit().await.unwrap();
        cart
    }

    fn level(store: &InMemoryStore) -> Option<u32> {
        store.stock_level(&ProductId::new("cap"), &Sku::new("B"))
    }

    #[tokio::test]
    async fn test_expired_guest_cart_is_released_and_deleted() {
        let store = store();
        let now = Utc::now();
        seed(
            &store,
            Cart::for_guest(GuestId::new("g"), now, ChronoDuration::minutes(5)),
            3,
        )
        .await;
        assert_eq!(level(&store), Some(4));

        let sweeper = ExpirySweeper::new(store.clone());
        let report = sweeper
            .sweep_at(now + ChronoDuration::minutes(10))
            .await
            .unwrap();

        assert_eq!(
            report,
            SweepReport {
                examined: 1,
                released_carts: 1,
                released_units: 3,
                failed: 0
            }
        );
        assert_eq!(level(&store), Some(7));
        assert_eq!(store.cart_count(), 0);
    }

    #[tokio::test]
    async fn test_second_sweep_is_a_noop() {
        let store = store();
        let now = Utc::now();
        seed(
            &store,
            Cart::for_guest(GuestId::new("g"), now, ChronoDuration::minutes(5)),
            2,
        )
        .await;

        let sweeper = ExpirySweeper::new(store.clone());
        let later = now + ChronoDuration::hours(1);
        sweeper.sweep_at(later).await.unwrap();
        let report = sweeper.sweep_at(later).await.unwrap();

        assert_eq!(report, SweepReport::default());
        assert_eq!(level(&store), Some(7));
    }

    #[tokio::test]
    async fn test_live_and_user_carts_are_kept() {
        let store = store();
        let now = Utc::now();
        seed(
            &store,
            Cart::for_guest(GuestId::new("g"), now, ChronoDuration::hours(2)),
            1,
        )
        .await;
        seed(&store, Cart::for_user(UserId::new(), now), 1).await;

        let report = ExpirySweeper::new(store.clone())
            .sweep_at(now + ChronoDuration::hours(1))
            .await
            .unwrap();

        assert_eq!(report.examined, 0);
        assert_eq!(store.cart_count(), 2);
        assert_eq!(level(&store), Some(5));
    }

    #[tokio::test]
    async fn test_locked_cart_is_skipped_and_counted() {
        let store = store();
        let now = Utc::now();
        let cart = seed(
            &store,
            Cart::for_guest(GuestId::new("g"), now, ChronoDuration::minutes(1)),
            2,
        )
        .await;

        // Another transaction holds the cart's write lock.
        let mut holder = store.begin().await.unwrap();
        let mut held = holder
            .find_by_identity(cart.identity())
            .await
            .unwrap()
            .unwrap();
        holder.save(&mut held).await.unwrap();

        let report = ExpirySweeper::new(store.clone())
            .sweep_at(now + ChronoDuration::minutes(5))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.released_carts, 0);
        assert_eq!(level(&store), Some(5));

        drop(holder);
        let report = ExpirySweeper::new(store.clone())
            .sweep_at(now + ChronoDuration::minutes(5))
            .await
            .unwrap();
        assert_eq!(report.released_carts, 1);
        assert_eq!(level(&store), Some(7));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let store = store();
        let handle = ExpirySweeper::new(store).start(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        handle.stop().await;
    }
}
