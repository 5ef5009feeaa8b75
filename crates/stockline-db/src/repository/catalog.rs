//! # Catalog Repository
//!
//! Branches, suppliers and customers. Handlers use these lookups to reject
//! unknown (or other-tenant) ids before any write.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use stockline_core::{Branch, CreditTransactionType, Customer, Supplier, SupplierCreditTransaction};

/// A change to what the tenant owes a supplier.
#[derive(Debug, Clone)]
pub struct NewSupplierCredit {
    pub tenant_id: String,
    pub supplier_id: String,

    /// Positive raises the outstanding balance, negative pays it down.
    pub amount_cents: i64,
    pub transaction_type: CreditTransactionType,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Branches
    // =========================================================================

    pub async fn create_branch(&self, tenant_id: &str, name: &str) -> DbResult<Branch> {
        let branch = Branch {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO branches (id, tenant_id, name, is_active, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&branch.id)
        .bind(&branch.tenant_id)
        .bind(&branch.name)
        .bind(branch.is_active)
        .bind(branch.created_at)
        .execute(&self.pool)
        .await?;

        debug!(branch_id = %branch.id, name = %branch.name, "Branch created");
        Ok(branch)
    }

    /// Gets a branch of this tenant.
    ///
    /// ## Returns
    /// * `Ok(None)` - Unknown id, or a branch of another tenant
    pub async fn get_branch(&self, tenant_id: &str, id: &str) -> DbResult<Option<Branch>> {
        let branch = sqlx::query_as::<_, Branch>("SELECT * FROM branches WHERE id = ?1 AND tenant_id = ?2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(branch)
    }

    pub async fn list_branches(&self, tenant_id: &str) -> DbResult<Vec<Branch>> {
        let branches =
            sqlx::query_as::<_, Branch>("SELECT * FROM branches WHERE tenant_id = ?1 ORDER BY name")
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(branches)
    }

    // =========================================================================
    // Suppliers
    // =========================================================================

    pub async fn create_supplier(&self, tenant_id: &str, name: &str) -> DbResult<Supplier> {
        let supplier = Supplier {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            outstanding_balance_cents: 0,
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO suppliers (id, tenant_id, name, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&supplier.id)
            .bind(&supplier.tenant_id)
            .bind(&supplier.name)
            .bind(supplier.created_at)
            .execute(&self.pool)
            .await?;

        Ok(supplier)
    }

    pub async fn get_supplier(&self, tenant_id: &str, id: &str) -> DbResult<Option<Supplier>> {
        let supplier =
            sqlx::query_as::<_, Supplier>("SELECT * FROM suppliers WHERE id = ?1 AND tenant_id = ?2")
                .bind(id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(supplier)
    }

    /// Credit entries of one supplier, oldest first.
    pub async fn supplier_credit_history(
        &self,
        tenant_id: &str,
        supplier_id: &str,
    ) -> DbResult<Vec<SupplierCreditTransaction>> {
        let entries = sqlx::query_as::<_, SupplierCreditTransaction>(
            r#"
            SELECT * FROM supplier_credit_transactions
            WHERE tenant_id = ?1 AND supplier_id = ?2
            ORDER BY created_at, rowid
            "#,
        )
        .bind(tenant_id)
        .bind(supplier_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Moves the supplier's outstanding balance and writes the matching entry.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - Unknown supplier for this tenant
    pub async fn record_supplier_credit(
        conn: &mut SqliteConnection,
        credit: &NewSupplierCredit,
    ) -> DbResult<(SupplierCreditTransaction, i64)> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE suppliers SET outstanding_balance_cents = outstanding_balance_cents + ?1
             WHERE id = ?2 AND tenant_id = ?3
            RETURNING outstanding_balance_cents
            "#,
        )
        .bind(credit.amount_cents)
        .bind(&credit.supplier_id)
        .bind(&credit.tenant_id)
        .fetch_optional(&mut *conn)
        .await?;

        let balance = balance.ok_or_else(|| DbError::not_found("Supplier", &credit.supplier_id))?;

        let entry = SupplierCreditTransaction {
            id: Uuid::new_v4().to_string(),
            tenant_id: credit.tenant_id.clone(),
            supplier_id: credit.supplier_id.clone(),
            amount_cents: credit.amount_cents,
            transaction_type: credit.transaction_type,
            reference: credit.reference.clone(),
            notes: credit.notes.clone(),
            actor_id: credit.actor_id.clone(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO supplier_credit_transactions (
                id, tenant_id, supplier_id, amount_cents, transaction_type, reference, notes, actor_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.tenant_id)
        .bind(&entry.supplier_id)
        .bind(entry.amount_cents)
        .bind(entry.transaction_type)
        .bind(&entry.reference)
        .bind(&entry.notes)
        .bind(&entry.actor_id)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        debug!(
            supplier_id = %entry.supplier_id,
            amount_cents = entry.amount_cents,
            balance,
            kind = ?entry.transaction_type,
            "Supplier credit recorded"
        );
        Ok((entry, balance))
    }

    // =========================================================================
    // Customers
    // =========================================================================

    pub async fn create_customer(
        &self,
        tenant_id: &str,
        branch_id: Option<&str>,
        name: &str,
    ) -> DbResult<Customer> {
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            branch_id: branch_id.map(str::to_string),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO customers (id, tenant_id, branch_id, name, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&customer.id)
        .bind(&customer.tenant_id)
        .bind(&customer.branch_id)
        .bind(&customer.name)
        .bind(customer.created_at)
        .execute(&self.pool)
        .await?;

        Ok(customer)
    }

    pub async fn get_customer(&self, tenant_id: &str, id: &str) -> DbResult<Option<Customer>> {
        let customer =
            sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?1 AND tenant_id = ?2")
                .bind(id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(customer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{self, TENANT};

    #[tokio::test]
    async fn test_branch_lookup_is_tenant_scoped() {
        let db = fixtures::database().await;
        let branch = fixtures::branch(&db, "Downtown").await;

        let found = db.catalog().get_branch(TENANT, &branch.id).await.unwrap();
        assert_eq!(found.map(|b| b.name), Some("Downtown".to_string()));

        let other = db.catalog().get_branch("tenant-b", &branch.id).await.unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_supplier_and_customer() {
        let db = fixtures::database().await;
        let branch = fixtures::branch(&db, "Main").await;

        let supplier = db.catalog().create_supplier(TENANT, "Acme Wholesale").await.unwrap();
        let customer = db
            .catalog()
            .create_customer(TENANT, Some(&branch.id), "Walk-in")
            .await
            .unwrap();

        assert!(db.catalog().get_supplier(TENANT, &supplier.id).await.unwrap().is_some());
        assert!(db.catalog().get_supplier("tenant-b", &supplier.id).await.unwrap().is_none());

        let loaded = db.catalog().get_customer(TENANT, &customer.id).await.unwrap().unwrap();
        assert_eq!(loaded.branch_id.as_deref(), Some(branch.id.as_str()));
    }

    #[tokio::test]
    async fn test_supplier_credit_moves_balance() {
        let db = fixtures::database().await;
        let supplier = db.catalog().create_supplier(TENANT, "Acme").await.unwrap();
        let credit = |amount_cents, transaction_type| NewSupplierCredit {
            tenant_id: TENANT.to_string(),
            supplier_id: supplier.id.clone(),
            amount_cents,
            transaction_type,
            reference: None,
            notes: None,
            actor_id: None,
        };

        let mut tx = db.begin().await.unwrap();
        let (_, owed) = CatalogRepository::record_supplier_credit(&mut tx, &credit(5_000, CreditTransactionType::Purchase))
            .await
            .unwrap();
        let (payment, owed_after) =
            CatalogRepository::record_supplier_credit(&mut tx, &credit(-2_000, CreditTransactionType::Payment))
                .await
                .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(owed, 5_000);
        assert_eq!(owed_after, 3_000);
        assert_eq!(payment.amount_cents, -2_000);

        let loaded = db.catalog().get_supplier(TENANT, &supplier.id).await.unwrap().unwrap();
        assert_eq!(loaded.outstanding_balance_cents, 3_000);
        let history = db.catalog().supplier_credit_history(TENANT, &supplier.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].transaction_type, CreditTransactionType::Purchase);

        let mut tx = db.begin().await.unwrap();
        let mut stranger = credit(100, CreditTransactionType::Adjustment);
        stranger.tenant_id = "tenant-b".to_string();
        let err = CatalogRepository::record_supplier_credit(&mut tx, &stranger).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_branches_sorted() {
        let db = fixtures::database().await;
        fixtures::branch(&db, "Uptown").await;
        fixtures::branch(&db, "Airport").await;

        let names: Vec<String> = db
            .catalog()
            .list_branches(TENANT)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["Airport", "Uptown"]);
    }
}
