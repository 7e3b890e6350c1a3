//! Cold-load of templates, spawn lists, maps and castles.
//!
//! Everything here runs once at startup, before the timer pump starts.
//! The YAML sources are plain files; the SQL sources share one pool.

use std::time::Duration;

use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

pub mod map_db;
pub mod mob_db;

/// Connect to the database.
pub async fn connect(url: &str) -> Result<MySqlPool, sqlx::Error> {
    let pool = MySqlPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await?;
    tracing::info!("[db] Connected to MariaDB");
    Ok(pool)
}
