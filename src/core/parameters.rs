use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use super::context::ContextValue;

/// Key under which [`RunIdIncrementer`] stores the run counter.
pub const RUN_ID_KEY: &str = "run.id";

/// A single job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ContextValue,
    /// Identifying parameters take part in the [`JobSignature`].
    pub identifying: bool,
}

/// Ordered set of typed parameters given to a job launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an identifying parameter.
    pub fn with(mut self, key: &str, value: impl Into<ContextValue>) -> Self {
        self.insert(key, value, true);
        self
    }

    /// Adds a parameter that does not distinguish one run from another.
    pub fn with_non_identifying(mut self, key: &str, value: impl Into<ContextValue>) -> Self {
        self.insert(key, value, false);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<ContextValue>, identifying: bool) {
        self.parameters.insert(
            key.to_string(),
            JobParameter {
                value: value.into(),
                identifying,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.parameters.get(key).map(|parameter| &parameter.value)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(ContextValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ContextValue::Str(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.parameters
            .iter()
            .map(|(key, parameter)| (key.as_str(), parameter))
    }

    /// Only the identifying parameters, in key order.
    pub fn identifying(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.iter()
            .filter(|(_, parameter)| parameter.identifying)
            .map(|(key, parameter)| (key, &parameter.value))
    }
}

impl<K, V> FromIterator<(K, V)> for JobParameters
where
    K: AsRef<str>,
    V: Into<ContextValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut parameters = JobParameters::new();
        for (key, value) in iter {
            parameters.insert(key.as_ref(), value, true);
        }
        parameters
    }
}

/// Identity of a job run lineage: the job name plus its identifying parameters.
///
/// Two launches with the same signature belong to the same lineage. A failed or
/// stopped lineage can be resumed; a completed one cannot be run again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobSignature {
    job_name: String,
    /// Escaped, type tagged identifying parameters
    key: String,
    /// Readable form, for logs and error messages
    label: String,
}

impl JobSignature {
    pub fn new(job_name: &str, parameters: &JobParameters) -> Self {
        let mut key = String::new();
        let mut label = Vec::new();

        for (index, (name, value)) in parameters.identifying().enumerate() {
            if index > 0 {
                key.push(',');
            }
            escape_into(&mut key, name);
            key.push('=');
            match value {
                ContextValue::Int(value) => key.push_str(&format!("i:{}", value)),
                ContextValue::Float(value) => key.push_str(&format!("f:{:?}", value)),
                ContextValue::Bool(value) => key.push_str(&format!("b:{}", value)),
                ContextValue::Str(value) => {
                    key.push_str("s:");
                    escape_into(&mut key, value);
                }
            }
            label.push(format!("{}={}", name, value));
        }

        Self {
            job_name: job_name.to_string(),
            key,
            label: label.join(","),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Canonical form, used as the storage key by repositories.
    ///
    /// Distinct signatures always have distinct keys.
    pub fn key(&self) -> String {
        let mut key = String::new();
        escape_into(&mut key, &self.job_name);
        key.push('{');
        key.push_str(&self.key);
        key.push('}');
        key
    }
}

/// Backslash-escapes the characters that delimit a signature key.
fn escape_into(target: &mut String, raw: &str) {
    for character in raw.chars() {
        if matches!(character, '\\' | ',' | '=' | ':' | '{' | '}') {
            target.push('\\');
        }
        target.push(character);
    }
}

impl fmt::Display for JobSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.job_name, self.label)
    }
}

/// Computes the parameters of the next run of a job from the previous ones.
pub trait JobParametersIncrementer: Send + Sync {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

/// Increments the `run.id` parameter, starting at 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunIdIncrementer;

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let mut parameters = previous.cloned().unwrap_or_default();
        let run_id = parameters.get_int(RUN_ID_KEY).unwrap_or(0) + 1;
        parameters.insert(RUN_ID_KEY, run_id, true);
        parameters
    }
}
