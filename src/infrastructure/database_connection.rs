// Catalog database connection and schema management (SQLite via sqlx)

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 5).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        if !in_memory {
            let db_path = database_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:");
            let db_path = db_path.split('?').next().unwrap_or(db_path);

            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create database directory {:?}", parent))?;
            }
        }

        let mut connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL {}", database_url))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            // writers queue on the busy handler while readers keep going
            connect_options = connect_options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // every pooled connection to an in-memory URL would be its own database
        let max_connections = if in_memory { 1 } else { max_connections.max(1) };

        let mut options = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("Failed to connect to {}", database_url))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn into_pool(self) -> SqlitePool {
        self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_entries_sql = r#"
            CREATE TABLE IF NOT EXISTS catalog_entries (
                identity_key TEXT PRIMARY KEY,
                retailer TEXT NOT NULL,
                title TEXT,
                price_amount REAL,
                price_currency TEXT NOT NULL DEFAULT 'UNKNOWN',
                image_url TEXT,
                source_url TEXT NOT NULL,
                scraped_at DATETIME NOT NULL,
                attributes TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0,
                category TEXT,
                brand TEXT,
                colors TEXT NOT NULL DEFAULT '',
                first_seen_at DATETIME NOT NULL,
                last_seen_at DATETIME NOT NULL,
                occurrence_count INTEGER NOT NULL DEFAULT 1
            )
        "#;

        let create_indexes_sql = [
            "CREATE INDEX IF NOT EXISTS idx_catalog_last_seen ON catalog_entries (last_seen_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_catalog_confidence ON catalog_entries (confidence)",
            "CREATE INDEX IF NOT EXISTS idx_catalog_retailer_category ON catalog_entries (retailer, category)",
        ];

        sqlx::query(create_entries_sql)
            .execute(&self.pool)
            .await
            .context("Failed to create catalog_entries table")?;
        for sql in create_indexes_sql {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        info!("🗄️ Catalog schema ready");
        Ok(())
    }
}
