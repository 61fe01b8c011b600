//! A Postgres backed [`Queue`] and [`IdempotencyGuard`](rejob::guard::IdempotencyGuard) for
//! `rejob`.
//!
//! Ready messages are claimed with `FOR UPDATE SKIP LOCKED` so each message is delivered to a
//! single worker even when many processes consume the same table. Subscribers are woken up by
//! `NOTIFY` on insert and otherwise poll.
//!
//! A message delivered to a worker that never acknowledges it becomes available again once the
//! visibility timeout has passed, which gives at least once delivery.
//!
//! The schema is created by the migrations in this crate, see [`migrate`].
use std::{collections::HashMap, ops::Deref, sync::Arc};

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rejob::{
    job::JobType,
    outcome::Ack,
    queue::{DeliveryId, DeliveryStream, EnqueuedJob, Queue, QueueError},
};
use sqlx::{migrate::MigrateError, postgres::PgListener, PgPool};
use tokio::sync::{mpsc, RwLock};
use tracing::instrument;

mod guard;
mod stream;
mod types;

pub use guard::PgIdempotencyGuard;
use stream::ReadyJobStream;
use types::{DeliveredRow, DeliveryState, Notification};

const NOTIFICATION_CHANNEL: &str = "rejob_scheduled";

/// Run the migrations creating the `rejob` tables.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub(crate) fn unavailable(error: sqlx::Error) -> QueueError {
    tracing::error!(?error, "Postgres queue error: {error}");
    QueueError::Unavailable(error.to_string())
}

type Subscribers = Arc<RwLock<HashMap<&'static str, Vec<mpsc::UnboundedSender<DateTime<Utc>>>>>>;

#[derive(Clone, Debug)]
pub struct PgQueue {
    pool: PgPool,
    subscribers: Subscribers,
    visibility_timeout: TimeDelta,
}

impl Deref for PgQueue {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

/// Builds a queue without a `LISTEN` connection: subscribers poll for new messages.
impl From<PgPool> for PgQueue {
    fn from(pool: PgPool) -> Self {
        Self {
            pool,
            subscribers: Default::default(),
            visibility_timeout: Self::DEFAULT_VISIBILITY_TIMEOUT,
        }
    }
}

impl PgQueue {
    /// How long a delivered message waits for its acknowledgement before being delivered again.
    pub const DEFAULT_VISIBILITY_TIMEOUT: TimeDelta = TimeDelta::minutes(30);

    /// Builds a queue and starts listening for notifications of newly enqueued messages.
    pub async fn new(pool: PgPool) -> Result<Self, QueueError> {
        let this = Self::from(pool);
        let mut listener = PgListener::connect_with(&this).await.map_err(unavailable)?;
        listener
            .listen(NOTIFICATION_CHANNEL)
            .await
            .map_err(unavailable)?;

        tokio::spawn({
            let subscribers = this.subscribers.clone();
            async move {
                while let Ok(notification) = listener.recv().await {
                    let notification =
                        match serde_json::from_str::<Notification>(notification.payload()) {
                            Ok(notification) => notification,
                            Err(error) => {
                                tracing::warn!(?error, "Ignoring malformed notification: {error}");
                                continue;
                            }
                        };

                    subscribers
                        .read()
                        .await
                        .get(notification.job_type.as_str())
                        .into_iter()
                        .flatten()
                        .for_each(|sender| {
                            let _ = sender.send(notification.scheduled_at);
                        });
                }
                tracing::debug!("Postgres notification listener stopped");
            }
        });

        Ok(this)
    }

    pub fn with_visibility_timeout(self, visibility_timeout: TimeDelta) -> Self {
        Self {
            visibility_timeout,
            ..self
        }
    }

    async fn delete_acknowledged(&self, retention: TimeDelta) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM rejob_jobs
            WHERE state = $1
            AND acknowledged_at < now() - make_interval(secs => $2)
            "#,
        )
        .bind(DeliveryState::Acknowledged)
        .bind(retention.num_milliseconds() as f64 / 1000.0)
        .execute(self.deref())
        .await?;
        Ok(result.rows_affected())
    }

    fn visibility_timeout_secs(&self) -> f64 {
        self.visibility_timeout.num_milliseconds() as f64 / 1000.0
    }

    async fn insert_job(&self, job: EnqueuedJob) -> Result<DeliveryId, QueueError> {
        let arguments = serde_json::to_value(&job.arguments)?;
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO rejob_jobs (
                job_type,
                arguments,
                scheduled_at
            ) VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(job.job_type.as_str())
        .bind(arguments)
        .bind(job.scheduled_at)
        .fetch_one(self.deref())
        .await
        .map_err(unavailable)?;
        Ok(id.into())
    }

    pub(crate) async fn load_next_mark_as_delivered(
        &self,
        job_type: JobType,
    ) -> sqlx::Result<Option<DeliveredRow>> {
        sqlx::query_as::<_, DeliveredRow>(
            r#"UPDATE rejob_jobs
            SET
                state = $2,
                delivered_at = now()
            WHERE id IN (
                SELECT id FROM rejob_jobs
                WHERE job_type = $1
                AND (
                    (state = $3 AND scheduled_at - now() < '00:00:00.1')
                    OR (state = $2 AND delivered_at < now() - make_interval(secs => $4))
                )
                ORDER BY scheduled_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, arguments
            "#,
        )
        .bind(job_type.as_str())
        .bind(DeliveryState::Delivered)
        .bind(DeliveryState::Scheduled)
        .bind(self.visibility_timeout_secs())
        .fetch_optional(self.deref())
        .await
    }

    /// The earliest time a message of the given type becomes available, counting delivered
    /// messages whose visibility timeout will lapse.
    pub(crate) async fn next_available_at(
        &self,
        job_type: JobType,
    ) -> sqlx::Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar(
            r#"SELECT MIN(
                CASE WHEN state = $2
                    THEN scheduled_at
                    ELSE delivered_at + make_interval(secs => $4)
                END
            )
            FROM rejob_jobs
            WHERE job_type = $1
            AND state IN ($2, $3)
            "#,
        )
        .bind(job_type.as_str())
        .bind(DeliveryState::Scheduled)
        .bind(DeliveryState::Delivered)
        .bind(self.visibility_timeout_secs())
        .fetch_one(self.deref())
        .await
    }

    async fn mark_acknowledged(&self, id: DeliveryId, ack: Ack) -> sqlx::Result<Option<i64>> {
        sqlx::query_scalar(
            r#"UPDATE rejob_jobs
            SET
                state = $3,
                ack = $4,
                acknowledged_at = now()
            WHERE id = $1 AND state = $2
            RETURNING id
            "#,
        )
        .bind(i64::from(id))
        .bind(DeliveryState::Delivered)
        .bind(DeliveryState::Acknowledged)
        .bind(ack.label())
        .fetch_optional(self.deref())
        .await
    }
}

#[async_trait]
impl Queue for PgQueue {
    #[instrument(skip(self, job), fields(job_type = %job.job_type))]
    async fn enqueue(&self, job: EnqueuedJob) -> Result<DeliveryId, QueueError> {
        self.insert_job(job).await
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, job_type: JobType) -> DeliveryStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .await
            .entry(job_type.as_str())
            .or_default()
            .push(sender);

        let mut stream = ReadyJobStream {
            queue: self.clone(),
            job_type,
            receiver,
        };
        Box::pin(stream! {
            loop {
                yield stream.next().await;
            }
        })
    }

    async fn acknowledge(&self, id: DeliveryId, ack: Ack) -> Result<(), QueueError> {
        self.mark_acknowledged(id, ack)
            .await
            .map_err(unavailable)?
            .ok_or(QueueError::DeliveryNotFound(id))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn prune_acknowledged(&self, retention: TimeDelta) -> Result<u64, QueueError> {
        self.delete_acknowledged(retention)
            .await
            .map_err(unavailable)
    }
}
