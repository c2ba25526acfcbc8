//! Database initialization functions
//!
//! Creates the settings table and seeds missing keys with built-in defaults.

use crate::crossfade::settings::CrossfadeSettings;
use crate::db::settings::settings_to_pairs;
use crate::error::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use tracing::info;

/// Open (and create if absent) the settings database
pub async fn connect(url: &str) -> Result<Pool<Sqlite>> {
    info!("Opening settings database: {}", url);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Create the settings table if it does not exist yet
pub async fn create_settings_table(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert a default value for every crossfade key that is missing
///
/// Existing values are left alone.
pub async fn init_settings_defaults(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Initializing default settings");

    for (key, default_value) in settings_to_pairs(&CrossfadeSettings::default()) {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
                .bind(key)
                .fetch_one(pool)
                .await?;

        if !exists {
            sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(&default_value)
                .execute(pool)
                .await?;

            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
    }

    Ok(())
}

/// Initialize all required database structures
pub async fn initialize_database(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Initializing database structures");
    create_settings_table(pool).await?;
    init_settings_defaults(pool).await?;
    info!("Database initialization complete");
    Ok(())
}
