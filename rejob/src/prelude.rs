//! The purpose of this module is to alleviate the need to import many of the `[rejob]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use rejob::prelude::*;
//! ```
pub use crate::backoff::BackoffStrategy;
pub use crate::backoff::Jitter;
pub use crate::backoff::Strategy;
pub use crate::cache::CacheInvalidator;
pub use crate::dependency::Dependency;
pub use crate::guard::{IdempotencyGuard, IdempotencyKey, OnDuplicate};
pub use crate::job::arguments::{ArgValue, JobArguments, SUBJECT_ID};
pub use crate::job::validation::Required;
pub use crate::job::{Job, JobType};
pub use crate::outcome::{Ack, ExecutionError, Outcome};
pub use crate::queue::Queue;
pub use crate::scheduler::RetryPolicy;
pub use crate::Rejob;
