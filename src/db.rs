// src/db.rs
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::config::Config;

pub async fn create_pool(config: &Config) -> Result<Pool<Postgres>, sqlx::Error> {
    info!(
        max_connections = config.db_max_connections,
        "Connecting to the database"
    );

    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect(&config.database_url)
        .await
}
