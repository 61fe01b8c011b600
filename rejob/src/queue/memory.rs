//! Provides an in memory implementation of [`Queue`].
//!
//! It is designed to be a correct implementation for tests and single process deployments, not an
//! optimized one. Messages are lost on restart.
use std::{
    collections::{HashMap, VecDeque},
    ops::Sub,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;

use super::{Delivery, DeliveryId, DeliveryStream, EnqueuedJob, Queue, QueueError};
use crate::{job::JobType, outcome::Ack};

struct ReadyJobStream {
    queue: InMemoryQueue,
    job_type: JobType,
    receiver: mpsc::UnboundedReceiver<DateTime<Utc>>,
}

impl ReadyJobStream {
    const DEFAULT_DELAY: std::time::Duration = std::time::Duration::from_secs(30);
    const DELTA: std::time::Duration = std::time::Duration::from_millis(15);

    async fn next(&mut self) -> Result<Delivery, QueueError> {
        loop {
            let delay = match self.queue.next_scheduled_at(self.job_type)? {
                Some(timestamp) => timestamp
                    .sub(Utc::now())
                    .to_std()
                    .unwrap_or(Self::DELTA)
                    .min(Self::DEFAULT_DELAY),
                None => Self::DEFAULT_DELAY,
            };
            if delay <= Self::DELTA {
                if let Some(delivery) = self.queue.take_ready(self.job_type)? {
                    return Ok(delivery);
                }
            }
            tokio::select! {
                _ = self.receiver.recv() => { },
                _ = tokio::time::sleep(delay) => { },
            }
        }
    }
}

type Subscriber = mpsc::UnboundedSender<DateTime<Utc>>;

#[derive(Debug, Clone)]
struct Entry {
    id: DeliveryId,
    job: EnqueuedJob,
    delivered: bool,
}

/// An in memory implementation of [`Queue`].
///
/// Besides the [`Queue`] API it exposes inspection helpers for tests: the latest messages
/// enqueued ([`InMemoryQueue::enqueued`]), the messages still waiting
/// ([`InMemoryQueue::pending`]), the latest acknowledgements received
/// ([`InMemoryQueue::acknowledgements`]), and a way to pull the next message regardless of its
/// schedule ([`InMemoryQueue::take_next`]).
///
/// Only the last [`InMemoryQueue::DEFAULT_HISTORY_LIMIT`] enqueued messages and acknowledgements
/// are kept, see [`InMemoryQueue::with_history_limit`].
#[derive(Clone)]
pub struct InMemoryQueue {
    entries: Arc<RwLock<Vec<Entry>>>,
    history: Arc<RwLock<VecDeque<EnqueuedJob>>>,
    acknowledgements: Arc<RwLock<VecDeque<Acknowledgement>>>,
    history_limit: usize,
    id_counter: Arc<AtomicI64>,
    subscribers: Arc<RwLock<HashMap<&'static str, Vec<Subscriber>>>>,
    paused: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
struct Acknowledgement {
    id: DeliveryId,
    ack: Ack,
    at: DateTime<Utc>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self {
            entries: Default::default(),
            history: Default::default(),
            acknowledgements: Default::default(),
            history_limit: Self::DEFAULT_HISTORY_LIMIT,
            id_counter: Default::default(),
            subscribers: Default::default(),
            paused: Default::default(),
        }
    }
}

fn push_bounded<T>(records: &mut VecDeque<T>, record: T, limit: usize) {
    if limit == 0 {
        return;
    }
    while records.len() >= limit {
        records.pop_front();
    }
    records.push_back(record);
}

impl InMemoryQueue {
    pub const DEFAULT_HISTORY_LIMIT: usize = 1_000;

    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` enqueued messages and acknowledgements for inspection, dropping the
    /// oldest first. A limit of zero keeps none.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Run the queue in paused mode where subscribers are not woken up when messages are
    /// enqueued.
    ///
    /// Subscribers can be woken up later via [`InMemoryQueue::notify_all`].
    pub fn paused(self) -> Self {
        self.paused.store(true, Ordering::Relaxed);
        self
    }

    /// Wake up all the stream subscribers to continue execution.
    pub fn notify_all(&self) -> Result<(), QueueError> {
        let now = Utc::now();
        self.subscribers
            .read()
            .map_err(|_| QueueError::BadState)?
            .values()
            .flatten()
            .for_each(|sender| {
                let _ = sender.send(now);
            });
        Ok(())
    }

    /// The messages enqueued so far, including the ones already delivered, oldest first.
    pub fn enqueued(&self) -> Vec<EnqueuedJob> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// The messages of the given job type waiting for delivery.
    pub fn pending(&self, job_type: JobType) -> Vec<EnqueuedJob> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| !entry.delivered && entry.job.job_type == job_type)
            .map(|entry| entry.job.clone())
            .collect()
    }

    pub fn acknowledgements(&self) -> Vec<(DeliveryId, Ack)> {
        self.acknowledgements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|record| (record.id, record.ack))
            .collect()
    }

    /// Deliver the earliest scheduled message of the given job type, ignoring its scheduled time.
    ///
    /// Lets tests step through delayed retries without waiting for them.
    pub fn take_next(&self, job_type: JobType) -> Option<Delivery> {
        self.take_where(job_type, |_| true).ok().flatten()
    }

    fn take_ready(&self, job_type: JobType) -> Result<Option<Delivery>, QueueError> {
        let cutoff = Utc::now() + TimeDelta::milliseconds(100);
        self.take_where(job_type, |entry| entry.job.scheduled_at < cutoff)
    }

    fn take_where(
        &self,
        job_type: JobType,
        predicate: impl Fn(&Entry) -> bool,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut entries = self.entries.write().map_err(|_| QueueError::BadState)?;
        let next = entries
            .iter_mut()
            .filter(|entry| !entry.delivered && entry.job.job_type == job_type)
            .filter(|entry| predicate(entry))
            .min_by(|a, b| {
                a.job
                    .scheduled_at
                    .cmp(&b.job.scheduled_at)
                    .then(a.id.cmp(&b.id))
            });
        Ok(next.map(|entry| {
            entry.delivered = true;
            Delivery {
                id: entry.id,
                job_type: entry.job.job_type,
                arguments: entry.job.arguments.clone(),
            }
        }))
    }

    fn next_scheduled_at(&self, job_type: JobType) -> Result<Option<DateTime<Utc>>, QueueError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| QueueError::BadState)?
            .iter()
            .filter(|entry| !entry.delivered && entry.job.job_type == job_type)
            .map(|entry| entry.job.scheduled_at)
            .min())
    }

    fn notify_subscribers(
        &self,
        job_type: JobType,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        if !self.paused.load(Ordering::Relaxed) {
            self.subscribers
                .read()
                .map_err(|_| QueueError::BadState)?
                .get(job_type.as_str())
                .into_iter()
                .flatten()
                .for_each(|sender| {
                    let _ = sender.send(scheduled_at);
                });
        }
        Ok(())
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(&self, job: EnqueuedJob) -> Result<DeliveryId, QueueError> {
        let id = DeliveryId::from(self.id_counter.fetch_add(1, Ordering::SeqCst));
        let job_type = job.job_type;
        let scheduled_at = job.scheduled_at;

        push_bounded(
            &mut *self.history.write().map_err(|_| QueueError::BadState)?,
            job.clone(),
            self.history_limit,
        );
        self.entries
            .write()
            .map_err(|_| QueueError::BadState)?
            .push(Entry {
                id,
                job,
                delivered: false,
            });

        self.notify_subscribers(job_type, scheduled_at)?;

        Ok(id)
    }

    async fn subscribe(&self, job_type: JobType) -> DeliveryStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
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
        let mut entries = self.entries.write().map_err(|_| QueueError::BadState)?;
        let position = entries
            .iter()
            .position(|entry| entry.id == id && entry.delivered)
            .ok_or(QueueError::DeliveryNotFound(id))?;
        entries.remove(position);
        drop(entries);

        push_bounded(
            &mut *self
                .acknowledgements
                .write()
                .map_err(|_| QueueError::BadState)?,
            Acknowledgement {
                id,
                ack,
                at: Utc::now(),
            },
            self.history_limit,
        );
        Ok(())
    }

    async fn prune_acknowledged(&self, retention: TimeDelta) -> Result<u64, QueueError> {
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut acknowledgements = self
            .acknowledgements
            .write()
            .map_err(|_| QueueError::BadState)?;
        let before = acknowledgements.len();
        acknowledgements.retain(|record| record.at >= cutoff);
        Ok((before - acknowledgements.len()) as u64)
    }
}
