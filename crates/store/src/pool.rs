use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::Result;

/// Connect a pool and run pending migrations.
///
/// Mirrors the teacher stack's "connect, then migrate on boot" sequencing
/// for the gateway binary's startup path.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
