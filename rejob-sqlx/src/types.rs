use chrono::{DateTime, Utc};
use rejob::{
    job::{arguments::JobArguments, JobType},
    queue::{Delivery, QueueError},
};
use serde::Deserialize;
use sqlx::prelude::FromRow;

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "rejob_delivery_state", rename_all = "lowercase")]
pub(crate) enum DeliveryState {
    Scheduled,
    Delivered,
    Acknowledged,
}

#[derive(Debug, FromRow)]
pub(crate) struct DeliveredRow {
    pub id: i64,
    pub arguments: serde_json::Value,
}

impl DeliveredRow {
    pub(crate) fn into_delivery(self, job_type: JobType) -> Result<Delivery, QueueError> {
        let arguments: JobArguments = serde_json::from_value(self.arguments)?;
        Ok(Delivery {
            id: self.id.into(),
            job_type,
            arguments,
        })
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct Notification {
    pub job_type: String,
    pub scheduled_at: DateTime<Utc>,
}
