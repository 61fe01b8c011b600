//! An in memory implementation of [`IdempotencyGuard`].
//!
//! Only deduplicates within a single process. Use a shared store such as the Postgres guard when
//! several processes consume the same queue.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::{GuardError, IdempotencyGuard, IdempotencyKey};
use crate::queue::saturating_add;

#[derive(Debug, Clone, Default)]
pub struct InMemoryGuard {
    markers: Arc<Mutex<HashMap<IdempotencyKey, DateTime<Utc>>>>,
}

impl InMemoryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an unexpired marker exists for `key`.
    pub fn is_held(&self, key: &IdempotencyKey) -> bool {
        let now = Utc::now();
        self.markers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|expires_at| *expires_at > now)
    }
}

#[async_trait]
impl IdempotencyGuard for InMemoryGuard {
    async fn try_acquire(&self, key: &IdempotencyKey, ttl: TimeDelta) -> Result<bool, GuardError> {
        let now = Utc::now();
        let mut markers = self.markers.lock().map_err(|_| GuardError::BadState)?;
        match markers.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                markers.insert(key.clone(), saturating_add(now, ttl));
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<(), GuardError> {
        self.markers
            .lock()
            .map_err(|_| GuardError::BadState)?
            .remove(key);
        Ok(())
    }

    async fn prune_expired(&self) -> Result<u64, GuardError> {
        let now = Utc::now();
        let mut markers = self.markers.lock().map_err(|_| GuardError::BadState)?;
        let before = markers.len();
        markers.retain(|_, expires_at| *expires_at > now);
        Ok((before - markers.len()) as u64)
    }
}

#[cfg(test)]
mod test {
    use futures::future::join_all;

    use super::*;
    use crate::job::JobType;

    const JOB_TYPE: JobType = JobType::new("seo-update");

    fn key(subject: &str) -> IdempotencyKey {
        IdempotencyKey::new(JOB_TYPE, subject)
    }

    #[tokio::test]
    async fn second_acquire_fails_until_released() {
        let guard = InMemoryGuard::new();
        let ttl = TimeDelta::minutes(10);

        assert!(guard.try_acquire(&key("X"), ttl).await.unwrap());
        assert!(!guard.try_acquire(&key("X"), ttl).await.unwrap());
        assert!(guard.try_acquire(&key("Y"), ttl).await.unwrap());

        guard.release(&key("X")).await.unwrap();

        assert!(guard.try_acquire(&key("X"), ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_marker_is_taken_over() {
        let guard = InMemoryGuard::new();

        assert!(guard
            .try_acquire(&key("X"), TimeDelta::milliseconds(-1))
            .await
            .unwrap());
        assert!(!guard.is_held(&key("X")));
        assert!(guard
            .try_acquire(&key("X"), TimeDelta::minutes(1))
            .await
            .unwrap());
        assert!(guard.is_held(&key("X")));
    }

    #[tokio::test]
    async fn unbounded_ttl_holds_until_released() {
        let guard = InMemoryGuard::new();

        assert!(guard.try_acquire(&key("X"), TimeDelta::MAX).await.unwrap());
        assert!(guard.is_held(&key("X")));
        assert_eq!(guard.prune_expired().await.unwrap(), 0);

        guard.release(&key("X")).await.unwrap();
        assert!(!guard.is_held(&key("X")));
    }

    #[tokio::test]
    async fn releasing_unknown_key_is_ok() {
        let guard = InMemoryGuard::new();

        assert!(guard.release(&key("X")).await.is_ok());
    }

    #[tokio::test]
    async fn prune_removes_only_expired_markers() {
        let guard = InMemoryGuard::new();
        guard
            .try_acquire(&key("expired"), TimeDelta::milliseconds(-1))
            .await
            .unwrap();
        guard
            .try_acquire(&key("live"), TimeDelta::minutes(1))
            .await
            .unwrap();

        assert_eq!(guard.prune_expired().await.unwrap(), 1);
        assert!(guard.is_held(&key("live")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_admit_exactly_one() {
        let guard = InMemoryGuard::new();

        let results = join_all((0..16).map(|_| {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .try_acquire(&key("X"), TimeDelta::minutes(1))
                    .await
                    .unwrap()
            })
        }))
        .await;

        let acquired = results
            .into_iter()
            .map(Result::unwrap)
            .filter(|acquired| *acquired)
            .count();
        assert_eq!(acquired, 1);
    }
}
