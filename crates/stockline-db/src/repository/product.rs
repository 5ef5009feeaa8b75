//! # Product Repository
//!
//! Products and their cached `stock_quantity`.
//!
//! ## Who Writes What
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Column            │ Written by                                         │
//! │  ──────────────────┼─────────────────────────────────────────────────── │
//! │  stock_quantity    │ StockLedger::record ONLY (same statement as the    │
//! │  version           │ balance check, same tx as the movement row)        │
//! │  cost_cents        │ update_cost (weighted average on receive)          │
//! │  is_composite      │ set_components (kept in step with its rows)        │
//! │  everything else   │ create / insert                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A product is always created with zero stock; opening stock is an
//! `adjustment` movement so the ledger replays from zero.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use stockline_core::validation::validate_required;
use stockline_core::{CoreError, Product, ProductComponent, DEFAULT_LOW_STOCK_THRESHOLD};

// =============================================================================
// Insert Model
// =============================================================================

/// Fields for a new product.
///
/// ## Example
/// ```rust,ignore
/// let new = NewProduct::new(tenant, &branch.id, "COKE-330", "Coca-Cola 330ml")
///     .price(150)
///     .cost(90)
///     .category("Drinks");
/// ```
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub tenant_id: String,
    pub branch_id: String,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price_cents: i64,
    pub cost_cents: i64,
    pub low_stock_threshold: i64,
}

impl NewProduct {
    pub fn new(
        tenant_id: impl Into<String>,
        branch_id: impl Into<String>,
        sku: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        NewProduct {
            tenant_id: tenant_id.into(),
            branch_id: branch_id.into(),
            sku: sku.into(),
            name: name.into(),
            description: None,
            category: None,
            price_cents: 0,
            cost_cents: 0,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
        }
    }

    pub fn price(mut self, cents: i64) -> Self {
        self.price_cents = cents;
        self
    }

    pub fn cost(mut self, cents: i64) -> Self {
        self.cost_cents = cents;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn low_stock_threshold(mut self, threshold: i64) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    /// Copy of a product from another branch, for transfer receipt.
    ///
    /// Name, description, category and price are carried over; stock starts
    /// at zero and the cost is the incoming unit cost.
    pub fn copy_for_branch(source: &Product, branch_id: impl Into<String>, cost_cents: i64) -> Self {
        NewProduct {
            tenant_id: source.tenant_id.clone(),
            branch_id: branch_id.into(),
            sku: source.sku.clone(),
            name: source.name.clone(),
            description: source.description.clone(),
            category: source.category.clone(),
            price_cents: source.price_cents,
            cost_cents,
            low_stock_threshold: source.low_stock_threshold,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Creates a product with zero stock.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - SKU already used in this branch
    /// * `DbError::ForeignKeyViolation` - Unknown branch
    pub async fn create(&self, product: NewProduct) -> DbResult<Product> {
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut conn, &product).await
    }

    /// Gets a product of this tenant by id.
    ///
    /// ## Returns
    /// * `Ok(Some(Product))` - Product found
    /// * `Ok(None)` - Unknown id, or a product of another tenant
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, tenant_id, id).await
    }

    pub async fn find_by_sku(&self, tenant_id: &str, branch_id: &str, sku: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        Self::load_by_sku(&mut conn, tenant_id, branch_id, sku).await
    }

    /// Active products at or below their low-stock threshold.
    pub async fn low_stock(&self, tenant_id: &str, branch_id: &str) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT * FROM products
            WHERE tenant_id = ?1 AND branch_id = ?2 AND is_active = 1
              AND stock_quantity <= low_stock_threshold
            ORDER BY stock_quantity, name
            "#,
        )
        .bind(tenant_id)
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Components of a composite product, empty for a plain one.
    pub async fn components(&self, tenant_id: &str, parent_id: &str) -> DbResult<Vec<ProductComponent>> {
        let components = sqlx::query_as::<_, ProductComponent>(
            "SELECT * FROM product_components WHERE tenant_id = ?1 AND parent_id = ?2 ORDER BY component_id",
        )
        .bind(tenant_id)
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(components)
    }

    /// True when some composite product lists this one as a component.
    pub async fn is_component(&self, tenant_id: &str, product_id: &str) -> DbResult<bool> {
        let used: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM product_components WHERE tenant_id = ?1 AND component_id = ?2)",
        )
        .bind(tenant_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(used)
    }

    // =========================================================================
    // Transaction-scoped
    // =========================================================================

    pub async fn load(conn: &mut SqliteConnection, tenant_id: &str, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?1 AND tenant_id = ?2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(product)
    }

    /// Matches on SKU within one tenant and branch.
    pub async fn load_by_sku(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        branch_id: &str,
        sku: &str,
    ) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE tenant_id = ?1 AND branch_id = ?2 AND sku = ?3",
        )
        .bind(tenant_id)
        .bind(branch_id)
        .bind(sku)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(product)
    }

    pub async fn insert(conn: &mut SqliteConnection, new: &NewProduct) -> DbResult<Product> {
        validate_required("sku", &new.sku).map_err(CoreError::from)?;
        validate_required("name", &new.name).map_err(CoreError::from)?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            tenant_id: new.tenant_id.clone(),
            branch_id: new.branch_id.clone(),
            sku: new.sku.trim().to_string(),
            name: new.name.clone(),
            description: new.description.clone(),
            category: new.category.clone(),
            price_cents: new.price_cents,
            cost_cents: new.cost_cents,
            stock_quantity: 0,
            low_stock_threshold: new.low_stock_threshold,
            is_active: true,
            is_composite: false,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO products (
                id, tenant_id, branch_id, sku, name, description, category,
                price_cents, cost_cents, stock_quantity, low_stock_threshold,
                is_active, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, 1, 0, ?11, ?11)
            "#,
        )
        .bind(&product.id)
        .bind(&product.tenant_id)
        .bind(&product.branch_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.category)
        .bind(product.price_cents)
        .bind(product.cost_cents)
        .bind(product.low_stock_threshold)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        debug!(product_id = %product.id, sku = %product.sku, branch_id = %product.branch_id, "Product created");
        Ok(product)
    }

    /// Replaces the component list of `parent_id`. An empty list turns the
    /// product back into a plain one.
    pub async fn set_components(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        parent_id: &str,
        components: &[(String, i64)],
    ) -> DbResult<Vec<ProductComponent>> {
        sqlx::query("UPDATE products SET is_composite = ?1, updated_at = ?2 WHERE id = ?3 AND tenant_id = ?4")
            .bind(!components.is_empty())
            .bind(Utc::now())
            .bind(parent_id)
            .bind(tenant_id)
            .execute(&mut *conn)
            .await?;

        sqlx::query("DELETE FROM product_components WHERE tenant_id = ?1 AND parent_id = ?2")
            .bind(tenant_id)
            .bind(parent_id)
            .execute(&mut *conn)
            .await?;

        let mut rows = Vec::with_capacity(components.len());
        for (component_id, quantity) in components {
            let row = ProductComponent {
                id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                parent_id: parent_id.to_string(),
                component_id: component_id.clone(),
                quantity: *quantity,
            };
            sqlx::query(
                "INSERT INTO product_components (id, tenant_id, parent_id, component_id, quantity) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&row.id)
            .bind(&row.tenant_id)
            .bind(&row.parent_id)
            .bind(&row.component_id)
            .bind(row.quantity)
            .execute(&mut *conn)
            .await?;
            rows.push(row);
        }

        debug!(product_id = parent_id, components = rows.len(), "Product components replaced");
        Ok(rows)
    }

    /// Replaces the product's cost (weighted-average recomputation).
    pub async fn update_cost(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
        cost_cents: i64,
    ) -> DbResult<()> {
        sqlx::query("UPDATE products SET cost_cents = ?1, updated_at = ?2 WHERE id = ?3 AND tenant_id = ?4")
            .bind(cost_cents)
            .bind(Utc::now())
            .bind(id)
            .bind(tenant_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::fixtures::{self, TENANT};

    #[tokio::test]
    async fn test_create_starts_with_zero_stock() {
        let db = fixtures::database().await;
        let branch = fixtures::branch(&db, "Main").await;

        let product = db
            .products()
            .create(NewProduct::new(TENANT, &branch.id, "COKE-330", "Coca-Cola 330ml").price(150).cost(90))
            .await
            .unwrap();

        assert_eq!(product.stock_quantity, 0);
        assert_eq!(product.cost_cents, 90);
        assert_eq!(product.low_stock_threshold, DEFAULT_LOW_STOCK_THRESHOLD);

        let loaded = db.products().get(TENANT, &product.id).await.unwrap().unwrap();
        assert_eq!(loaded.sku, "COKE-330");
        assert!(db.products().get("tenant-b", &product.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_sku_in_branch_rejected() {
        let db = fixtures::database().await;
        let main = fixtures::branch(&db, "Main").await;
        let annex = fixtures::branch(&db, "Annex").await;

        db.products()
            .create(NewProduct::new(TENANT, &main.id, "SKU-1", "Widget"))
            .await
            .unwrap();

        let err = db
            .products()
            .create(NewProduct::new(TENANT, &main.id, "SKU-1", "Widget again"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // Same SKU in another branch is a different product
        db.products()
            .create(NewProduct::new(TENANT, &annex.id, "SKU-1", "Widget"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_find_by_sku_is_branch_scoped() {
        let db = fixtures::database().await;
        let main = fixtures::branch(&db, "Main").await;
        let annex = fixtures::branch(&db, "Annex").await;
        fixtures::stocked_product(&db, &main, "TEA-1", 4, 100).await;

        let hit = db.products().find_by_sku(TENANT, &main.id, "TEA-1").await.unwrap();
        assert_eq!(hit.map(|p| p.stock_quantity), Some(4));

        let miss = db.products().find_by_sku(TENANT, &annex.id, "TEA-1").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_low_stock() {
        let db = fixtures::database().await;
        let branch = fixtures::branch(&db, "Main").await;
        fixtures::stocked_product(&db, &branch, "LOW", 3, 100).await;
        fixtures::stocked_product(&db, &branch, "HIGH", 50, 100).await;

        let low = db.products().low_stock(TENANT, &branch.id).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].sku, "LOW");
    }

    #[tokio::test]
    async fn test_copy_for_branch() {
        let db = fixtures::database().await;
        let main = fixtures::branch(&db, "Main").await;
        let annex = fixtures::branch(&db, "Annex").await;
        let source = fixtures::stocked_product(&db, &main, "MUG", 12, 300).await;

        let copy = db
            .products()
            .create(NewProduct::copy_for_branch(&source, &annex.id, 350))
            .await
            .unwrap();

        assert_eq!(copy.sku, source.sku);
        assert_eq!(copy.price_cents, source.price_cents);
        assert_eq!(copy.cost_cents, 350);
        assert_eq!(copy.stock_quantity, 0);
        assert_eq!(copy.branch_id, annex.id);
    }

    #[tokio::test]
    async fn test_set_components_flags_parent() {
        let db = fixtures::database().await;
        let branch = fixtures::branch(&db, "Main").await;
        let bundle = fixtures::stocked_product(&db, &branch, "GIFT-BOX", 0, 0).await;
        let mug = fixtures::stocked_product(&db, &branch, "MUG", 5, 300).await;
        let tea = fixtures::stocked_product(&db, &branch, "TEA", 5, 100).await;

        let mut tx = db.begin().await.unwrap();
        ProductRepository::set_components(&mut tx, TENANT, &bundle.id, &[(mug.id.clone(), 1), (tea.id.clone(), 2)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(db.products().get(TENANT, &bundle.id).await.unwrap().unwrap().is_composite);
        let components = db.products().components(TENANT, &bundle.id).await.unwrap();
        assert_eq!(components.len(), 2);
        assert!(db.products().is_component(TENANT, &tea.id).await.unwrap());
        assert!(!db.products().is_component(TENANT, &bundle.id).await.unwrap());

        let mut tx = db.begin().await.unwrap();
        ProductRepository::set_components(&mut tx, TENANT, &bundle.id, &[]).await.unwrap();
        tx.commit().await.unwrap();

        assert!(!db.products().get(TENANT, &bundle.id).await.unwrap().unwrap().is_composite);
        assert!(db.products().components(TENANT, &bundle.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_sku_rejected() {
        let db = fixtures::database().await;
        let branch = fixtures::branch(&db, "Main").await;

        let err = db
            .products()
            .create(NewProduct::new(TENANT, &branch.id, "  ", "Nameless"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
    }
}
