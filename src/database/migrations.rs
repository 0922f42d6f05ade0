//! Schema migrations and first-boot seeding.

use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::SqlitePool;

/// Embedded migrations from the `migrations/` directory
pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Apply all pending migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    MIGRATOR.run(pool).await.map_err(sqlx::Error::from)?;
    tracing::debug!("state store migrations applied");
    Ok(())
}

/// Seed the GPU pool on first boot.
///
/// Inserts `gpu_count` FREE slots with identifiers `GPU-{index}` when the
/// `gpu_resources` table is empty. A populated table is left untouched; the
/// pool may be managed by the external resource curator instead.
pub async fn seed_gpu_pool(pool: &SqlitePool, gpu_count: u32) -> Result<(), sqlx::Error> {
    if gpu_count == 0 {
        return Ok(());
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gpu_resources")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        tracing::debug!(existing, "gpu_resources already populated, skipping seed");
        return Ok(());
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;
    for index in 0..gpu_count {
        sqlx::query(
            "INSERT INTO gpu_resources (gpu_index, gpu_id, state, updated_at) \
             VALUES (?, ?, 'FREE', ?)",
        )
        .bind(index as i64)
        .bind(format!("GPU-{index}"))
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(gpu_count, "seeded GPU resource pool");
    Ok(())
}
