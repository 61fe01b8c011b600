//! Argument validation run before any business logic.
//!
//! Validation failures are final: retrying a job with the same malformed arguments cannot
//! succeed, so the runner drops such jobs without requeuing them.
use thiserror::Error;

use super::{arguments::JobArguments, JobType};

/// A required argument key.
///
/// # Example
///
/// ```
/// use rejob::job::validation::Required;
///
/// const REQUIRED: &[Required] = &[
///     Required::key("subject_id"),
///     Required::key("position").allowing_zero(),
/// ];
///
/// assert!(!REQUIRED[0].allow_zero);
/// assert!(REQUIRED[1].allow_zero);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Required {
    pub key: &'static str,
    /// Whether a numeric zero is an acceptable value for this key.
    pub allow_zero: bool,
}

impl Required {
    pub const fn key(key: &'static str) -> Self {
        Self {
            key,
            allow_zero: false,
        }
    }

    pub const fn allowing_zero(self) -> Self {
        Self {
            allow_zero: true,
            ..self
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required argument `{0}`")]
    MissingArgument(&'static str),
}

/// Checks that every required key is present and non-empty.
///
/// Stops at the first missing key and logs it together with the job type.
pub fn validate(
    job_type: JobType,
    arguments: &JobArguments,
    required: &[Required],
) -> Result<(), ValidationError> {
    let missing = required.iter().find(|required| {
        arguments
            .get(required.key)
            .map_or(true, |value| value.is_empty(required.allow_zero))
    });

    match missing {
        None => Ok(()),
        Some(required) => {
            tracing::error!(
                %job_type,
                missing_key = required.key,
                "Job {job_type} rejected: missing required argument `{}`",
                required.key
            );
            Err(ValidationError::MissingArgument(required.key))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::job::arguments::SUBJECT_ID;

    const JOB_TYPE: JobType = JobType::new("seo-update");
    const REQUIRED: &[Required] = &[Required::key(SUBJECT_ID), Required::key("title")];

    #[test]
    fn accepts_complete_arguments() {
        let arguments = JobArguments::new()
            .with(SUBJECT_ID, "X")
            .with("title", "Widget");

        assert_eq!(validate(JOB_TYPE, &arguments, REQUIRED), Ok(()));
    }

    #[test]
    fn rejects_absent_key() {
        let arguments = JobArguments::new().with(SUBJECT_ID, "X");

        assert_eq!(
            validate(JOB_TYPE, &arguments, REQUIRED),
            Err(ValidationError::MissingArgument("title"))
        );
    }

    #[test]
    fn rejects_empty_string() {
        let arguments = JobArguments::new()
            .with(SUBJECT_ID, "")
            .with("title", "Widget");

        assert_eq!(
            validate(JOB_TYPE, &arguments, REQUIRED),
            Err(ValidationError::MissingArgument(SUBJECT_ID))
        );
    }

    #[test]
    fn zero_is_missing_unless_allowed() {
        let arguments = JobArguments::new().with(SUBJECT_ID, 0);

        assert_eq!(
            validate(JOB_TYPE, &arguments, &[Required::key(SUBJECT_ID)]),
            Err(ValidationError::MissingArgument(SUBJECT_ID))
        );
        assert_eq!(
            validate(
                JOB_TYPE,
                &arguments,
                &[Required::key(SUBJECT_ID).allowing_zero()]
            ),
            Ok(())
        );
    }

    #[test]
    fn attempt_does_not_satisfy_requirements() {
        let arguments = JobArguments::new().with_attempt(3);

        assert_eq!(
            validate(JOB_TYPE, &arguments, &[Required::key("attempt")]),
            Err(ValidationError::MissingArgument("attempt"))
        );
    }
}
