//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p cart-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use cart_store::{
    CartStore, Catalog, PostgresStore, StockLedger, Store, StoreError, Transaction,
};
use chrono::{Duration, Utc};
use common::Version;
use domain::{Cart, CartItem, GuestId, Identity, Money, Product, ProductId, Sku, StockEntry, UserId};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_cart_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh pool, cleared tables, one seeded product.
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE carts, inventory, products")
        .execute(&pool)
        .await
        .unwrap();

    let store = PostgresStore::new(pool);
    store.upsert_product(&tee()).await.unwrap();
    store
}

fn tee() -> Product {
    Product::new("tee", "Basic tee", Money::from_cents(2000))
        .with_sales_price(Money::from_cents(1500))
        .with_image("https://cdn.example/tee.jpg", true)
        .with_stock(StockEntry::new("TEE-RED-M", "red", "M", 3))
        .with_stock(StockEntry::new("TEE-BLUE-L", "blue", "L", 1))
}

fn pid() -> ProductId {
    ProductId::new("tee")
}

fn red() -> Sku {
    Sku::new("TEE-RED-M")
}

fn guest_cart(guest: &str, ttl: Duration) -> Cart {
    let now = Utc::now();
    let mut cart = Cart::for_guest(GuestId::new(guest), now, ttl);
    cart.upsert_item(
        CartItem::new("tee", "Basic tee", "TEE-RED-M", 2, Money::from_cents(1500))
            .with_variant("red", "M"),
        now,
    )
    .unwrap();
    cart
}

async fn stock(store: &PostgresStore, sku: &Sku) -> Option<u32> {
    let mut tx = store.begin().await.unwrap();
    let level = tx.available(&pid(), sku).await.unwrap();
    tx.rollback().await.unwrap();
    level
}

#[tokio::test]
#[serial]
async fn find_product_loads_inventory_and_images() {
    let store = get_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let product = tx.find_product(&pid()).await.unwrap().unwrap();
    assert_eq!(product, {
        let mut expected = tee();
        expected.inventory.sort_by(|a, b| a.sku.as_str().cmp(b.sku.as_str()));
        expected
    });
    assert_eq!(product.unit_price(), Money::from_cents(1500));

    assert!(tx.find_product(&ProductId::new("nope")).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn reserve_is_conditional() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    tx.reserve(&pid(), &red(), 2).await.unwrap();
    let err = tx.reserve(&pid(), &red(), 2).await.unwrap_err();
    assert!(matches!(err, StoreError::InsufficientStock { requested: 2, .. }));
    tx.commit().await.unwrap();

    assert_eq!(stock(&store, &red()).await, Some(1));
}

#[tokio::test]
#[serial]
async fn rollback_restores_stock() {
    let store = get_test_store().await;

    {
        let mut tx = store.begin().await.unwrap();
        tx.reserve(&pid(), &red(), 3).await.unwrap();
    }
    assert_eq!(stock(&store, &red()).await, Some(3));

    let mut tx = store.begin().await.unwrap();
    tx.reserve(&pid(), &red(), 1).await.unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(stock(&store, &red()).await, Some(3));
}

#[tokio::test]
#[serial]
async fn concurrent_reservations_never_oversell() {
    let store = get_test_store().await;
    let blue = Sku::new("TEE-BLUE-L");

    let attempts = (0..8).map(|_| {
        let store = store.clone();
        let blue = blue.clone();
        tokio::spawn(async move {
            let mut tx = store.begin().await.unwrap();
            match tx.reserve(&pid(), &blue, 1).await {
                Ok(()) => {
                    tx.commit().await.unwrap();
                    true
                }
                Err(StoreError::InsufficientStock { .. }) => false,
                Err(other) => panic!("unexpected error: {other}"),
            }
        })
    });

    let results = futures_util::future::join_all(attempts).await;
    let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

    assert_eq!(winners, 1);
    assert_eq!(stock(&store, &blue).await, Some(0));
}

#[tokio::test]
#[serial]
async fn cart_round_trips_with_version() {
    let store = get_test_store().await;
    let mut cart = guest_cart("g1", Duration::hours(1));
    let identity = cart.identity().clone();

    let mut tx = store.begin().await.unwrap();
    tx.create(&mut cart).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(cart.version(), Version::first());

    let mut tx = store.begin().await.unwrap();
    let loaded = tx.find_by_identity(&identity).await.unwrap().unwrap();
    assert_eq!(loaded, cart);
}

#[tokio::test]
#[serial]
async fn duplicate_identity_is_a_write_conflict() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    tx.create(&mut guest_cart("g1", Duration::hours(1)))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .create(&mut guest_cart("g1", Duration::hours(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::WriteConflict { .. }));
}

#[tokio::test]
#[serial]
async fn stale_save_is_rejected() {
    let store = get_test_store().await;
    let mut cart = guest_cart("g1", Duration::hours(1));
    let identity = cart.identity().clone();

    let mut tx = store.begin().await.unwrap();
    tx.create(&mut cart).await.unwrap();
    tx.commit().await.unwrap();

    let mut first_tx = store.begin().await.unwrap();
    let mut first = first_tx.find_by_identity(&identity).await.unwrap().unwrap();
    let mut second_tx = store.begin().await.unwrap();
    let mut second = second_tx.find_by_identity(&identity).await.unwrap().unwrap();

    first_tx.save(&mut first).await.unwrap();
    first_tx.commit().await.unwrap();
    assert_eq!(first.version(), Version::new(2));

    let err = second_tx.save(&mut second).await.unwrap_err();
    assert!(matches!(err, StoreError::WriteConflict { .. }));
    assert_eq!(second.version(), Version::first());
}

#[tokio::test]
#[serial]
async fn promotion_moves_ownership_columns() {
    let store = get_test_store().await;
    let mut cart = guest_cart("g1", Duration::hours(1));
    let guest = cart.identity().clone();
    let user = UserId::new();

    let mut tx = store.begin().await.unwrap();
    tx.create(&mut cart).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let mut cart = tx.find_by_identity(&guest).await.unwrap().unwrap();
    cart.promote_to(user, Utc::now()).unwrap();
    tx.save(&mut cart).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert!(tx.find_by_identity(&guest).await.unwrap().is_none());
    let promoted = tx
        .find_by_identity(&Identity::User(user))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promoted.expires_at(), None);
    assert_eq!(promoted.item_count(), 1);
}

#[tokio::test]
#[serial]
async fn expired_guest_carts_and_delete() {
    let store = get_test_store().await;
    let mut expired = guest_cart("old", Duration::seconds(-60));
    let mut fresh = guest_cart("new", Duration::hours(1));
    let mut user = Cart::for_user(UserId::new(), Utc::now());

    let mut tx = store.begin().await.unwrap();
    tx.create(&mut expired).await.unwrap();
    tx.create(&mut fresh).await.unwrap();
    tx.create(&mut user).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let found = tx.find_expired_guest_carts(Utc::now()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), expired.id());

    tx.delete(&found[0]).await.unwrap();
    assert!(tx.delete_by_identity(fresh.identity()).await.unwrap());
    assert!(!tx.delete_by_identity(fresh.identity()).await.unwrap());
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert!(tx.find_by_identity(user.identity()).await.unwrap().is_some());
    assert!(tx.find_by_identity(expired.identity()).await.unwrap().is_none());
}
