//! The queue runtime the core runs on top of.
//!
//! A [`Queue`] stores messages with a scheduled time and delivers each ready message to a single
//! subscriber of its job type. Delivery is at least once; the runner always answers a delivery
//! with an [`Ack`].
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::Stream;
use thiserror::Error;

use crate::{
    job::{arguments::JobArguments, JobType},
    outcome::Ack,
};

pub mod memory;

/// The id of a message within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryId(i64);

impl From<i64> for DeliveryId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<DeliveryId> for i64 {
    fn from(value: DeliveryId) -> Self {
        value.0
    }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeliveryId({})", self.0)
    }
}

/// A message to be enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueuedJob {
    pub job_type: JobType,
    pub arguments: JobArguments,
    /// The earliest time the message should be delivered.
    pub scheduled_at: DateTime<Utc>,
}

/// The time `delay` from now.
///
/// Saturates at the bounds of [`DateTime`] rather than overflowing.
pub fn scheduled_in(delay: TimeDelta) -> DateTime<Utc> {
    saturating_add(Utc::now(), delay)
}

pub(crate) fn saturating_add(time: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    time.checked_add_signed(delta).unwrap_or(if delta < TimeDelta::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// A message handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: DeliveryId,
    pub job_type: JobType,
    pub arguments: JobArguments,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Error encoding or decoding job arguments")]
    EncodeDecode(#[from] serde_json::Error),
    #[error("Delivery not found: {0}")]
    DeliveryNotFound(DeliveryId),
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
    #[error("Queue in bad state")]
    BadState,
}

pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, QueueError>> + Send>>;

#[async_trait]
pub trait Queue: Clone + Send + Sync + 'static {
    async fn enqueue(&self, job: EnqueuedJob) -> Result<DeliveryId, QueueError>;

    /// A never ending stream of ready messages for the given job type.
    ///
    /// A message is delivered to a single subscriber even when several subscribe to the same job
    /// type.
    async fn subscribe(&self, job_type: JobType) -> DeliveryStream;

    /// Records the terminal signal for a delivered message.
    async fn acknowledge(&self, id: DeliveryId, ack: Ack) -> Result<(), QueueError>;

    /// Deletes the records of messages acknowledged more than `retention` ago and returns how
    /// many were deleted.
    async fn prune_acknowledged(&self, retention: TimeDelta) -> Result<u64, QueueError>;
}
