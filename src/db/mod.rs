//! Database layer
//!
//! Persistence for vouchers and staff sessions. Both SQLite (default,
//! single-file deployment) and MySQL (hosted table) are supported; the driver
//! is selected from configuration.
//!
//! ```ignore
//! use nalu::config::DatabaseConfig;
//! use nalu::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, Backend, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
