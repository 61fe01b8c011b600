//! The arguments carried by every job message.
//!
//! A [`JobArguments`] value is the whole retry state of a job: the payload needed to run the job
//! plus the `attempt` counter. Requeuing a job never mutates the arguments of the running
//! instance, instead [`JobArguments::next_attempt`] builds a new value to be enqueued.
//!
//! # Example
//!
//! ```
//! use rejob::job::arguments::{ArgValue, JobArguments};
//!
//! let arguments = JobArguments::new()
//!     .with("subject_id", "X")
//!     .with("title", "Widget");
//!
//! assert_eq!(arguments.attempt(), 0);
//! assert_eq!(arguments.subject_id().as_deref(), Some("X"));
//!
//! let retry = arguments.next_attempt();
//!
//! assert_eq!(retry.attempt(), 1);
//! assert_eq!(retry.get("title"), Some(&ArgValue::from("Widget")));
//! ```
use std::{
    collections::BTreeMap,
    fmt::Display,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

/// The key holding the id of the entity a job operates on.
pub const SUBJECT_ID: &str = "subject_id";

/// The key reserved for the attempt counter.
pub const ATTEMPT: &str = "attempt";

/// A primitive argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ArgValue {
    /// Whether the value counts as missing for the purpose of argument validation.
    ///
    /// Empty strings always count as missing; zero only counts as missing when `allow_zero` is
    /// false. Booleans are never empty.
    pub fn is_empty(&self, allow_zero: bool) -> bool {
        match self {
            Self::Str(value) => value.is_empty(),
            Self::Int(value) => *value == 0 && !allow_zero,
            Self::Float(value) => *value == 0.0 && !allow_zero,
            Self::Bool(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(value) => value.hash(state),
            Self::Int(value) => value.hash(state),
            Self::Float(value) => value.to_bits().hash(state),
            Self::Str(value) => value.hash(state),
        }
    }
}

impl Display for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for ArgValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// The arguments of a job: an ordered map of primitive values plus the attempt counter.
///
/// On the wire the arguments are a flat JSON object where `attempt` sits next to the payload
/// keys. The attempt counter is a typed field and can only be changed via
/// [`JobArguments::next_attempt`] or [`JobArguments::with_attempt`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobArguments {
    #[serde(default)]
    attempt: u16,
    #[serde(flatten)]
    values: BTreeMap<String, ArgValue>,
}

impl JobArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a payload value.
    ///
    /// The reserved `attempt` key is ignored, use [`JobArguments::with_attempt`] instead.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        let key = key.into();
        if key == ATTEMPT {
            tracing::warn!("Ignoring reserved argument key `{ATTEMPT}`");
        } else {
            self.values.insert(key, value.into());
        }
        self
    }

    pub fn with_attempt(self, attempt: u16) -> Self {
        Self { attempt, ..self }
    }

    /// The zero based attempt number of this job instance.
    pub fn attempt(&self) -> u16 {
        self.attempt
    }

    /// Builds the arguments for the next attempt: identical payload, attempt incremented by one.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            values: self.values.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ArgValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The id of the entity this job operates on, rendered as a string.
    pub fn subject_id(&self) -> Option<String> {
        self.get(SUBJECT_ID).map(ToString::to_string)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A stable hash over the given keys and their values.
    ///
    /// Missing keys still contribute to the hash so `{a: 1}` and `{b: 1}` differ. The attempt
    /// counter never takes part.
    pub fn signature(&self, keys: &[&str]) -> u64 {
        let mut state = fxhash::FxHasher64::default();
        for key in keys {
            key.hash(&mut state);
            match self.values.get(*key) {
                Some(value) => value.hash_into(&mut state),
                None => 0u8.hash(&mut state),
            }
        }
        state.finish()
    }
}
