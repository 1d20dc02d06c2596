//! Parameter and secret source adapters
//!
//! `Env*` sources back the CLI with process environment variables.
//! `Static*` sources are in-memory and can be told to fail, for tests and
//! local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{ExError, ExErrorKind, Result};
use crate::ports::{ParameterSource, SecretSource};

fn unavailable(op: &str, message: &str) -> ExError {
    ExError::new(ExErrorKind::ExternalService)
        .with_op(op)
        .with_message(message.to_string())
}

fn poisoned(op: &str) -> ExError {
    ExError::new(ExErrorKind::Concurrency)
        .with_op(op)
        .with_message("source state lock poisoned")
}

/// Parameters read from environment variables of the same name
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvParameterSource;

#[async_trait]
impl ParameterSource for EnvParameterSource {
    async fn get_parameters(&self, names: &[String]) -> Result<HashMap<String, String>> {
        Ok(names
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.clone(), v)))
            .collect())
    }
}

/// In-memory parameters with a failure switch
#[derive(Debug, Default)]
pub struct StaticParameterSource {
    values: Mutex<HashMap<String, String>>,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl StaticParameterSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(self, name: &str, value: &str) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&self, name: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(name.to_string(), value.to_string());
        }
    }

    /// Make every subsequent call fail with `ExternalService`
    pub fn fail_with(&self, message: &str) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(message.to_string());
        }
    }

    /// Number of `get_parameters` calls that reached this source
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ParameterSource for StaticParameterSource {
    async fn get_parameters(&self, names: &[String]) -> Result<HashMap<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self
            .failure
            .lock()
            .map_err(|_| poisoned("get_parameters"))?
            .clone()
        {
            return Err(unavailable("get_parameters", &message));
        }

        let values = self.values.lock().map_err(|_| poisoned("get_parameters"))?;
        Ok(names
            .iter()
            .filter_map(|name| values.get(name).map(|v| (name.clone(), v.clone())))
            .collect())
    }
}

/// Secrets read from environment variables; the value is parsed as JSON
/// and falls back to a plain JSON string when it is not JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretSource;

#[async_trait]
impl SecretSource for EnvSecretSource {
    async fn get_secret(&self, name: &str) -> Result<Option<serde_json::Value>> {
        Ok(std::env::var(name).ok().map(|raw| {
            serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
        }))
    }
}

/// In-memory secrets with a failure switch
#[derive(Debug, Default)]
pub struct StaticSecretSource {
    secrets: Mutex<HashMap<String, serde_json::Value>>,
    failure: Mutex<Option<String>>,
}

impl StaticSecretSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, value: serde_json::Value) -> Self {
        if let Ok(mut secrets) = self.secrets.lock() {
            secrets.insert(name.to_string(), value);
        }
        self
    }

    pub fn fail_with(&self, message: &str) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(message.to_string());
        }
    }
}

#[async_trait]
impl SecretSource for StaticSecretSource {
    async fn get_secret(&self, name: &str) -> Result<Option<serde_json::Value>> {
        if let Some(message) = self
            .failure
            .lock()
            .map_err(|_| poisoned("get_secret"))?
            .clone()
        {
            return Err(unavailable("get_secret", &message));
        }
        let secrets = self.secrets.lock().map_err(|_| poisoned("get_secret"))?;
        Ok(secrets.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_parameters_omit_missing_names() {
        let source = StaticParameterSource::new().with("A", "1");
        let values = source
            .get_parameters(&["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
        assert!(!values.contains_key("B"));
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_static_parameters_failure_switch() {
        let source = StaticParameterSource::new().with("A", "1");
        source.fail_with("throttled");
        let err = source.get_parameters(&["A".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::ExternalService);
        assert!(err.message().contains("throttled"));
    }

    #[tokio::test]
    async fn test_static_secret_lookup() {
        let source = StaticSecretSource::new().with("SALT", serde_json::json!({"salt": "x"}));
        assert!(source.get_secret("SALT").await.unwrap().is_some());
        assert!(source.get_secret("OTHER").await.unwrap().is_none());
    }
}
