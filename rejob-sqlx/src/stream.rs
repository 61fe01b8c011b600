use std::ops::Sub;

use chrono::{DateTime, Utc};
use rejob::{
    job::JobType,
    queue::{Delivery, QueueError},
};

use crate::{unavailable, PgQueue};

pub(crate) struct ReadyJobStream {
    pub(crate) queue: PgQueue,
    pub(crate) job_type: JobType,
    pub(crate) receiver: tokio::sync::mpsc::UnboundedReceiver<DateTime<Utc>>,
}

impl ReadyJobStream {
    const DEFAULT_DELAY: std::time::Duration = std::time::Duration::from_secs(30);
    const DELTA: std::time::Duration = std::time::Duration::from_millis(15);

    pub(crate) async fn next(&mut self) -> Result<Delivery, QueueError> {
        loop {
            let delay = match self
                .queue
                .next_available_at(self.job_type)
                .await
                .map_err(unavailable)?
            {
                Some(timestamp) => timestamp
                    .sub(Utc::now())
                    .to_std()
                    .unwrap_or(Self::DELTA)
                    .min(Self::DEFAULT_DELAY),
                _ => Self::DEFAULT_DELAY,
            };
            if delay <= Self::DELTA {
                if let Some(row) = self
                    .queue
                    .load_next_mark_as_delivered(self.job_type)
                    .await
                    .map_err(unavailable)?
                {
                    return row.into_delivery(self.job_type);
                }
            }
            tokio::select! {
                _ = self.receiver.recv() => { },
                _ = tokio::time::sleep(delay) => { },
            }
        }
    }
}
