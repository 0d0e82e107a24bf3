//! Reservation engine against PostgreSQL.
//!
//! These tests use a shared PostgreSQL container.
//! Run with:
//!
//! ```bash
//! cargo test -p reservation --test postgres_reservation -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use cart_store::{PostgresStore, StockLedger, Store, Transaction};
use domain::{GuestId, Identity, Money, Product, ProductId, Sku, StockEntry, UserId};
use reservation::{
    EngineConfig, InMemoryCouponBook, InMemorySessionRegistry, ReservationEngine,
    ReservationError,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

type PgEngine = ReservationEngine<PostgresStore, InMemoryCouponBook, InMemorySessionRegistry>;

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

/// Fresh pool, cleared tables, the hoodie seeded.
async fn setup() -> (Arc<PgEngine>, PostgresStore) {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(12)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE carts, inventory, products")
        .execute(&pool)
        .await
        .unwrap();

    let store = PostgresStore::new(pool);
    store
        .upsert_product(
            &Product::new("hoodie", "Hoodie", Money::from_cents(5000))
                .with_stock(StockEntry::new("H-M", "grey", "M", 10))
                .with_stock(StockEntry::new("H-LAST", "grey", "XL", 1)),
        )
        .await
        .unwrap();

    let engine = ReservationEngine::new(
        store.clone(),
        InMemoryCouponBook::new(),
        InMemorySessionRegistry::new(),
        EngineConfig::default(),
    );
    (Arc::new(engine), store)
}

fn hoodie() -> ProductId {
    ProductId::new("hoodie")
}

async fn stock(store: &PostgresStore, sku: &str) -> u32 {
    let mut tx = store.begin().await.unwrap();
    let level = tx.available(&hoodie(), &Sku::new(sku)).await.unwrap();
    tx.rollback().await.unwrap();
    level.unwrap()
}

async fn cart_rows(store: &PostgresStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM carts")
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_last_unit_goes_to_exactly_one_shopper() {
    let (engine, store) = setup().await;

    let attempts: Vec<_> = (0..8)
        .map(|n| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .set_item_quantity(
                        &Identity::Guest(GuestId::new(format!("shopper-{n}"))),
                        &hoodie(),
                        &Sku::new("H-LAST"),
                        1,
                    )
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => winners += 1,
            Err(ReservationError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(stock(&store, "H-LAST").await, 0);
    assert_eq!(cart_rows(&store).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_stale_save_rolls_back_the_reservation() {
    let (engine, store) = setup().await;
    let user = Identity::User(UserId::new());

    engine
        .set_item_quantity(&user, &hoodie(), &Sku::new("H-M"), 2)
        .await
        .unwrap();
    assert_eq!(stock(&store, "H-M").await, 8);

    // Another writer bumps the cart and holds its row lock.
    let mut rival = store.pool().begin().await.unwrap();
    sqlx::query("UPDATE carts SET version = version + 1")
        .execute(&mut *rival)
        .await
        .unwrap();

    let raise = {
        let engine = engine.clone();
        let user = user.clone();
        tokio::spawn(async move {
            engine
                .set_item_quantity(&user, &hoodie(), &Sku::new("H-M"), 5)
                .await
        })
    };

    // Let the engine read the old version and block on the row lock.
    tokio::time::sleep(Duration::from_millis(300)).await;
    rival.commit().await.unwrap();

    let err = raise.await.unwrap().unwrap_err();
    assert!(matches!(err, ReservationError::WriteConflict { .. }));
    assert!(err.is_retryable());

    // The three units reserved before the failed save went back.
    assert_eq!(stock(&store, "H-M").await, 8);
    let cart = engine.get_cart(&user).await.unwrap().unwrap();
    assert_eq!(cart.quantity_of(&hoodie(), &Sku::new("H-M")), 2);
}
