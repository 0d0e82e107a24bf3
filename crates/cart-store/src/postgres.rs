use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Version;
use domain::{Cart, Identity, Money, Product, ProductId, ProductImage, Sku, StockEntry};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{CartStore, Catalog, StockLedger, Store, Transaction},
};

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

/// Maps lock-level failures to `WriteConflict`, everything else to `Database`.
fn classify(err: sqlx::Error, resource: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        let reason = match db_err.code().as_deref() {
            Some(SERIALIZATION_FAILURE) => Some("serialization failure"),
            Some(DEADLOCK_DETECTED) => Some("deadlock detected"),
            Some(UNIQUE_VIOLATION) => Some("identity already owns a cart"),
            _ => None,
        };
        if let Some(reason) = reason {
            let resource = resource();
            tracing::debug!(%resource, reason, "database error classified as write conflict");
            return StoreError::WriteConflict { resource, reason };
        }
    }
    StoreError::Database(err)
}

fn owner_columns(identity: &Identity) -> (Option<Uuid>, Option<&str>) {
    match identity {
        Identity::User(user_id) => (Some(user_id.as_uuid()), None),
        Identity::Guest(guest_id) => (None, Some(guest_id.as_str())),
    }
}

fn quantity_to_u32(quantity: i64) -> u32 {
    u32::try_from(quantity.max(0)).unwrap_or(u32::MAX)
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("cart store migrations applied");
        Ok(())
    }

    /// Inserts or replaces a product and its inventory rows.
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, sales_price_cents, images)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                sales_price_cents = EXCLUDED.sales_price_cents,
                images = EXCLUDED.images
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(product.sales_price.map(|price| price.cents()))
        .bind(serde_json::to_value(&product.images)?)
        .execute(&mut *tx)
        .await?;

        for entry in &product.inventory {
            sqlx::query(
                r#"
                INSERT INTO inventory (product_id, sku, color, size, quantity)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (product_id, sku) DO UPDATE
                SET color = EXCLUDED.color,
                    size = EXCLUDED.size,
                    quantity = EXCLUDED.quantity
                "#,
            )
            .bind(product.id.as_str())
            .bind(entry.sku.as_str())
            .bind(&entry.color)
            .bind(&entry.size)
            .bind(i64::from(entry.quantity))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let tx = self.pool.begin().await?;
        Ok(PostgresTransaction { tx })
    }
}

/// Transaction over a [`PostgresStore`].
///
/// Dropping it without committing rolls back on the connection.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    fn row_to_cart(row: PgRow) -> Result<Cart> {
        let document: serde_json::Value = row.try_get("document")?;
        let mut cart: Cart = serde_json::from_value(document)?;
        // The column is authoritative.
        cart.set_version(Version::new(row.try_get("version")?));
        Ok(cart)
    }
}

#[async_trait]
impl StockLedger for PostgresTransaction {
    async fn reserve(&mut self, product_id: &ProductId, sku: &Sku, quantity: u32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE inventory
            SET quantity = quantity - $3
            WHERE product_id = $1 AND sku = $2 AND quantity >= $3
            "#,
        )
        .bind(product_id.as_str())
        .bind(sku.as_str())
        .bind(i64::from(quantity))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify(e, || format!("stock {product_id}/{sku}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InsufficientStock {
                product_id: product_id.clone(),
                sku: sku.clone(),
                requested: quantity,
            });
        }
        Ok(())
    }

    async fn release(&mut self, product_id: &ProductId, sku: &Sku, quantity: u32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE inventory
            SET quantity = quantity + $3
            WHERE product_id = $1 AND sku = $2
            "#,
        )
        .bind(product_id.as_str())
        .bind(sku.as_str())
        .bind(i64::from(quantity))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify(e, || format!("stock {product_id}/{sku}")))?;

        Ok(())
    }

    async fn available(&mut self, product_id: &ProductId, sku: &Sku) -> Result<Option<u32>> {
        let quantity: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM inventory WHERE product_id = $1 AND sku = $2",
        )
        .bind(product_id.as_str())
        .bind(sku.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(quantity.map(quantity_to_u32))
    }
}

#[async_trait]
impl Catalog for PostgresTransaction {
    async fn find_product(&mut self, product_id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, price_cents, sales_price_cents, images FROM products WHERE id = $1",
        )
        .bind(product_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let images: Vec<ProductImage> =
            serde_json::from_value(row.try_get::<serde_json::Value, _>("images")?)?;
        let sales_price: Option<i64> = row.try_get("sales_price_cents")?;

        let inventory = sqlx::query(
            r#"
            SELECT sku, color, size, quantity
            FROM inventory
            WHERE product_id = $1
            ORDER BY sku ASC
            "#,
        )
        .bind(product_id.as_str())
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(|row| -> Result<StockEntry> {
            Ok(StockEntry::new(
                row.try_get::<String, _>("sku")?,
                row.try_get::<String, _>("color")?,
                row.try_get::<String, _>("size")?,
                quantity_to_u32(row.try_get("quantity")?),
            ))
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(Some(Product {
            id: ProductId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            sales_price: sales_price.map(Money::from_cents),
            images,
            inventory,
        }))
    }
}

#[async_trait]
impl CartStore for PostgresTransaction {
    async fn find_by_identity(&mut self, identity: &Identity) -> Result<Option<Cart>> {
        let row = match identity {
            Identity::User(user_id) => {
                sqlx::query("SELECT version, document FROM carts WHERE user_id = $1")
                    .bind(user_id.as_uuid())
                    .fetch_optional(&mut *self.tx)
                    .await?
            }
            Identity::Guest(guest_id) => {
                sqlx::query("SELECT version, document FROM carts WHERE guest_id = $1")
                    .bind(guest_id.as_str())
                    .fetch_optional(&mut *self.tx)
                    .await?
            }
        };

        row.map(Self::row_to_cart).transpose()
    }

    async fn create(&mut self, cart: &mut Cart) -> Result<()> {
        cart.set_version(Version::first());
        let (user_id, guest_id) = owner_columns(cart.identity());
        let document = serde_json::to_value(&*cart)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO carts (id, user_id, guest_id, version, expires_at, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(cart.id().as_uuid())
        .bind(user_id)
        .bind(guest_id)
        .bind(cart.version().as_i64())
        .bind(cart.expires_at())
        .bind(document)
        .bind(cart.created_at())
        .bind(cart.updated_at())
        .execute(&mut *self.tx)
        .await;

        if let Err(e) = inserted {
            cart.set_version(Version::initial());
            return Err(classify(e, || format!("cart of {}", cart.identity())));
        }
        Ok(())
    }

    async fn save(&mut self, cart: &mut Cart) -> Result<()> {
        let expected = cart.version();
        cart.set_version(expected.next());
        let (user_id, guest_id) = owner_columns(cart.identity());

        let result = match serde_json::to_value(&*cart) {
            Ok(document) => sqlx::query(
                r#"
                UPDATE carts
                SET user_id = $2, guest_id = $3, version = $4, expires_at = $5,
                    document = $6, updated_at = $7
                WHERE id = $1 AND version = $8
                "#,
            )
            .bind(cart.id().as_uuid())
            .bind(user_id)
            .bind(guest_id)
            .bind(cart.version().as_i64())
            .bind(cart.expires_at())
            .bind(document)
            .bind(cart.updated_at())
            .bind(expected.as_i64())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(e, || format!("cart {}", cart.id()))),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(()),
            Ok(_) => {
                cart.set_version(expected);
                Err(StoreError::cart_conflict(
                    cart.id(),
                    "cart was modified by another transaction",
                ))
            }
            Err(e) => {
                cart.set_version(expected);
                Err(e)
            }
        }
    }

    async fn delete(&mut self, cart: &Cart) -> Result<()> {
        let result = sqlx::query("DELETE FROM carts WHERE id = $1 AND version = $2")
            .bind(cart.id().as_uuid())
            .bind(cart.version().as_i64())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(e, || format!("cart {}", cart.id())))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::cart_conflict(
                cart.id(),
                "cart was modified by another transaction",
            ));
        }
        Ok(())
    }

    async fn delete_by_identity(&mut self, identity: &Identity) -> Result<bool> {
        let (user_id, guest_id) = owner_columns(identity);
        let result = sqlx::query(
            "DELETE FROM carts WHERE user_id = $1 OR guest_id = $2",
        )
        .bind(user_id)
        .bind(guest_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify(e, || format!("cart of {identity}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_expired_guest_carts(&mut self, now: DateTime<Utc>) -> Result<Vec<Cart>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document
            FROM carts
            WHERE guest_id IS NOT NULL AND expires_at < $1
            ORDER BY expires_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(Self::row_to_cart).collect()
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| classify(e, || "transaction".to_string()))
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
