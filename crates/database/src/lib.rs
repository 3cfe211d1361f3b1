//! SQLite persistence layer for the Tianji consultation service.
//!
//! This crate provides async database operations for users, conversation
//! history, the activation allow-list, and payment orders using SQLx with
//! SQLite, plus the pure entitlement predicates that gate chat access.
//!
//! # Example
//!
//! ```no_run
//! use database::{user, Database};
//! use chrono::Utc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and run migrations
//!     let db = Database::connect("sqlite:tianji.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     // Create an identity-only row for a phone number
//!     let user = user::create_placeholder(db.pool(), "13800138000", Utc::now()).await?;
//!     println!("created {}", user.id);
//!
//!     Ok(())
//! }
//! ```

pub mod activation_list;
pub mod conversation;
pub mod entitlement;
pub mod error;
pub mod models;
pub mod order;
pub mod retry;
pub mod user;
pub mod validation;

pub use error::{DatabaseError, Result};
pub use models::{ActivationEntry, Conversation, Order, User};
pub use validation::ValidationError;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Database connection wrapper.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Default pool size. Request handlers hold a connection only for the
    /// duration of a statement, so a small pool is enough.
    const DEFAULT_POOL_SIZE: u32 = 5;

    /// Connect to a SQLite database.
    ///
    /// The URL should be in the format `sqlite:path/to/db.sqlite?mode=rwc`.
    /// Use `sqlite::memory:` for tests.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Connect to a SQLite database with a custom pool size.
    ///
    /// In-memory databases are pinned to a single connection: every pooled
    /// connection to `:memory:` would otherwise open its own empty
    /// database.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_size = if url.contains(":memory:") || url.contains("mode=memory") {
            1
        } else {
            pool_size
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!("Connected to database: {} (pool size: {})", url, pool_size);

        Ok(Self { pool })
    }

    /// Run database migrations.
    ///
    /// This should be called once after connecting to ensure the schema is
    /// up to date.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
