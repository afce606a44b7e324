//! Voucher repository
//!
//! Database operations for vouchers:
//! - insert and point lookup by id
//! - full scan ordered by `created_at` descending
//! - conditional redemption (`is_used` false → true exactly once)

use crate::db::{Backend, DynDatabasePool};
use crate::models::Voucher;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Voucher repository trait
#[async_trait]
pub trait VoucherRepository: Send + Sync {
    /// Insert a new voucher
    async fn create(&self, voucher: &Voucher) -> Result<Voucher>;

    /// Get voucher by exact id
    async fn get_by_id(&self, id: &str) -> Result<Option<Voucher>>;

    /// All vouchers, newest first
    async fn list(&self) -> Result<Vec<Voucher>>;

    /// Mark the voucher used if and only if it is currently unused.
    ///
    /// Returns `true` when this call performed the transition. A `false`
    /// result means the id is unknown or the voucher was already redeemed.
    async fn mark_used(&self, id: &str, used_at: DateTime<Utc>) -> Result<bool>;
}

/// SQLx-based voucher repository implementation
pub struct SqlxVoucherRepository {
    pool: DynDatabasePool,
}

impl SqlxVoucherRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn VoucherRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl VoucherRepository for SqlxVoucherRepository {
    async fn create(&self, voucher: &Voucher) -> Result<Voucher> {
        match self.pool.backend()? {
            Backend::Sqlite(pool) => create_voucher_sqlite(pool, voucher).await,
            Backend::Mysql(pool) => create_voucher_mysql(pool, voucher).await,
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Voucher>> {
        match self.pool.backend()? {
            Backend::Sqlite(pool) => get_voucher_by_id_sqlite(pool, id).await,
            Backend::Mysql(pool) => get_voucher_by_id_mysql(pool, id).await,
        }
    }

    async fn list(&self) -> Result<Vec<Voucher>> {
        match self.pool.backend()? {
            Backend::Sqlite(pool) => list_vouchers_sqlite(pool).await,
            Backend::Mysql(pool) => list_vouchers_mysql(pool).await,
        }
    }

    async fn mark_used(&self, id: &str, used_at: DateTime<Utc>) -> Result<bool> {
        match self.pool.backend()? {
            Backend::Sqlite(pool) => mark_used_sqlite(pool, id, used_at).await,
            Backend::Mysql(pool) => mark_used_mysql(pool, id, used_at).await,
        }
    }
}

const INSERT_VOUCHER: &str = r#"
    INSERT INTO vouchers (id, name, contact, created_at, is_used, used_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const SELECT_VOUCHER_BY_ID: &str = r#"
    SELECT id, name, contact, created_at, is_used, used_at
    FROM vouchers
    WHERE id = ?
"#;

const SELECT_ALL_VOUCHERS: &str = r#"
    SELECT id, name, contact, created_at, is_used, used_at
    FROM vouchers
    ORDER BY created_at DESC, id ASC
"#;

// The `is_used = 0` guard makes this a compare-and-set: of two concurrent
// redemptions only one sees an affected row.
const MARK_VOUCHER_USED: &str = r#"
    UPDATE vouchers
    SET is_used = 1, used_at = ?
    WHERE id = ? AND is_used = 0
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_voucher_sqlite(pool: &SqlitePool, voucher: &Voucher) -> Result<Voucher> {
    sqlx::query(INSERT_VOUCHER)
        .bind(&voucher.id)
        .bind(&voucher.name)
        .bind(&voucher.contact)
        .bind(voucher.created_at)
        .bind(voucher.is_used)
        .bind(voucher.used_at)
        .execute(pool)
        .await
        .context("Failed to create voucher")?;

    Ok(voucher.clone())
}

async fn get_voucher_by_id_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<Voucher>> {
    let row = sqlx::query(SELECT_VOUCHER_BY_ID)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get voucher by ID")?;

    row.as_ref().map(row_to_voucher_sqlite).transpose()
}

async fn list_vouchers_sqlite(pool: &SqlitePool) -> Result<Vec<Voucher>> {
    let rows = sqlx::query(SELECT_ALL_VOUCHERS)
        .fetch_all(pool)
        .await
        .context("Failed to list vouchers")?;

    rows.iter().map(row_to_voucher_sqlite).collect()
}

async fn mark_used_sqlite(pool: &SqlitePool, id: &str, used_at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(MARK_VOUCHER_USED)
        .bind(used_at)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to mark voucher as used")?;

    Ok(result.rows_affected() == 1)
}

fn row_to_voucher_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Voucher> {
    Ok(Voucher {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        contact: row.try_get("contact")?,
        created_at: row.try_get("created_at")?,
        is_used: row.try_get("is_used")?,
        used_at: row.try_get("used_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_voucher_mysql(pool: &MySqlPool, voucher: &Voucher) -> Result<Voucher> {
    sqlx::query(INSERT_VOUCHER)
        .bind(&voucher.id)
        .bind(&voucher.name)
        .bind(&voucher.contact)
        .bind(voucher.created_at)
        .bind(voucher.is_used)
        .bind(voucher.used_at)
        .execute(pool)
        .await
        .context("Failed to create voucher")?;

    Ok(voucher.clone())
}

async fn get_voucher_by_id_mysql(pool: &MySqlPool, id: &str) -> Result<Option<Voucher>> {
    let row = sqlx::query(SELECT_VOUCHER_BY_ID)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get voucher by ID")?;

    row.as_ref().map(row_to_voucher_mysql).transpose()
}

async fn list_vouchers_mysql(pool: &MySqlPool) -> Result<Vec<Voucher>> {
    let rows = sqlx::query(SELECT_ALL_VOUCHERS)
        .fetch_all(pool)
        .await
        .context("Failed to list vouchers")?;

    rows.iter().map(row_to_voucher_mysql).collect()
}

async fn mark_used_mysql(pool: &MySqlPool, id: &str, used_at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(MARK_VOUCHER_USED)
        .bind(used_at)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to mark voucher as used")?;

    Ok(result.rows_affected() == 1)
}

fn row_to_voucher_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Voucher> {
    Ok(Voucher {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        contact: row.try_get("contact")?,
        created_at: row.try_get("created_at")?,
        is_used: row.try_get("is_used")?,
        used_at: row.try_get("used_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::{Duration, SubsecRound};

    async fn setup_test_repo() -> SqlxVoucherRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxVoucherRepository::new(pool)
    }

    fn voucher_created(offset_minutes: i64, name: &str) -> Voucher {
        let mut voucher = Voucher::new(name, "+385 91 000 0000");
        voucher.created_at = (Utc::now() - Duration::minutes(offset_minutes)).trunc_subsecs(6);
        voucher
    }

    #[tokio::test]
    async fn test_create_and_get_voucher() {
        let repo = setup_test_repo().await;
        let voucher = Voucher::new("Ana", "0911234567");

        repo.create(&voucher).await.expect("Failed to create voucher");

        let found = repo
            .get_by_id(&voucher.id)
            .await
            .expect("Failed to get voucher")
            .expect("Voucher not found");
        assert_eq!(found, voucher);
    }

    #[tokio::test]
    async fn test_get_unknown_voucher_returns_none() {
        let repo = setup_test_repo().await;
        let found = repo.get_by_id("nonexistent").await.expect("Query failed");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let repo = setup_test_repo().await;
        let voucher = Voucher::new("Ana", "0911234567");

        repo.create(&voucher).await.unwrap();
        assert!(repo.create(&voucher).await.is_err());
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let repo = setup_test_repo().await;
        let oldest = voucher_created(60, "oldest");
        let newest = voucher_created(1, "newest");
        let middle = voucher_created(30, "middle");

        for voucher in [&oldest, &newest, &middle] {
            repo.create(voucher).await.unwrap();
        }

        let names: Vec<_> = repo.list().await.unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["newest", "middle", "oldest"]);
    }

    #[tokio::test]
    async fn test_mark_used_only_once() {
        let repo = setup_test_repo().await;
        let voucher = Voucher::new("Ana", "0911234567");
        repo.create(&voucher).await.unwrap();

        let first_at = Utc::now().trunc_subsecs(6);
        assert!(repo.mark_used(&voucher.id, first_at).await.unwrap());

        let second_at = first_at + Duration::minutes(5);
        assert!(!repo.mark_used(&voucher.id, second_at).await.unwrap());

        let stored = repo.get_by_id(&voucher.id).await.unwrap().unwrap();
        assert!(stored.is_used);
        assert_eq!(stored.used_at, Some(first_at));
    }

    #[tokio::test]
    async fn test_mark_used_unknown_id() {
        let repo = setup_test_repo().await;
        assert!(!repo.mark_used("nonexistent", Utc::now()).await.unwrap());
        assert!(repo.list().await.unwrap().is_empty());
    }
}
