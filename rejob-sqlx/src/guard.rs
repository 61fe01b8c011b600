use async_trait::async_trait;
use chrono::TimeDelta;
use rejob::guard::{GuardError, IdempotencyGuard, IdempotencyKey};
use sqlx::PgPool;

/// An [`IdempotencyGuard`] storing markers in the `rejob_idempotency_markers` table.
///
/// Acquiring is a single `INSERT .. ON CONFLICT DO UPDATE` which only takes over an existing
/// marker once it has expired, so concurrent workers in any number of processes race safely.
#[derive(Clone, Debug)]
pub struct PgIdempotencyGuard {
    pool: PgPool,
}

impl From<PgPool> for PgIdempotencyGuard {
    fn from(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(error: sqlx::Error) -> GuardError {
    tracing::error!(?error, "Postgres idempotency store error: {error}");
    GuardError::Unavailable(error.to_string())
}

#[async_trait]
impl IdempotencyGuard for PgIdempotencyGuard {
    async fn try_acquire(&self, key: &IdempotencyKey, ttl: TimeDelta) -> Result<bool, GuardError> {
        let acquired: Option<String> = sqlx::query_scalar(
            r#"INSERT INTO rejob_idempotency_markers (key, expires_at)
            VALUES ($1, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE
                SET expires_at = EXCLUDED.expires_at
                WHERE rejob_idempotency_markers.expires_at <= now()
            RETURNING key
            "#,
        )
        .bind(key.to_string())
        .bind(ttl.num_milliseconds() as f64 / 1000.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(acquired.is_some())
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<(), GuardError> {
        sqlx::query("DELETE FROM rejob_idempotency_markers WHERE key = $1")
            .bind(key.to_string())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn prune_expired(&self) -> Result<u64, GuardError> {
        let result = sqlx::query("DELETE FROM rejob_idempotency_markers WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected())
    }
}
