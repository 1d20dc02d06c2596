//! Notification configuration
//!
//! The feature flag and the site/system allow- and block-lists are owned by
//! an external parameter source. They are read through a short-TTL cache and
//! turned into an immutable [`NotifyConfig`] snapshot once per batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::errors::Result;
use crate::ports::ParameterSource;

/// Default lifetime of a cached parameter value
pub const DEFAULT_PARAMETER_TTL_SECS: i64 = 5;

/// Names of the parameters holding the notification configuration.
///
/// A name that is not configured reads as absent, which means "disabled"
/// for the flag and "empty" for the sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyParameterNames {
    pub enable_notifications: Option<String>,
    pub enabled_site_codes: Option<String>,
    pub enabled_systems: Option<String>,
    pub blocked_site_codes: Option<String>,
}

impl NotifyParameterNames {
    fn configured(&self) -> Vec<String> {
        [
            &self.enable_notifications,
            &self.enabled_site_codes,
            &self.enabled_systems,
            &self.blocked_site_codes,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }
}

/// Immutable per-batch notification configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyConfig {
    pub notifications_enabled: bool,
    /// Lowercased site codes
    pub enabled_site_codes: HashSet<String>,
    /// Lowercased application names
    pub enabled_systems: HashSet<String>,
    /// Lowercased site codes; always wins over the enabled sets
    pub blocked_site_codes: HashSet<String>,
}

impl NotifyConfig {
    /// Notifications off, every set empty
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build a snapshot from fetched parameter values
    pub fn from_values(names: &NotifyParameterNames, values: &HashMap<String, String>) -> Self {
        let lookup = |name: &Option<String>| {
            name.as_ref()
                .and_then(|n| values.get(n))
                .map(String::as_str)
        };

        Self {
            notifications_enabled: parse_flag(lookup(&names.enable_notifications)),
            enabled_site_codes: str_to_set(lookup(&names.enabled_site_codes)),
            enabled_systems: str_to_set(lookup(&names.enabled_systems)),
            blocked_site_codes: str_to_set(lookup(&names.blocked_site_codes)),
        }
    }

    /// (site enabled OR system enabled) AND site not blocked, case-insensitive
    pub fn allows(&self, site_code: &str, application_name: &str) -> bool {
        let site = site_code.trim().to_lowercase();
        let system = application_name.trim().to_lowercase();

        let enabled = self.enabled_site_codes.contains(&site) || self.enabled_systems.contains(&system);
        enabled && !self.blocked_site_codes.contains(&site)
    }
}

/// `"true"` (any case, surrounding whitespace ignored) is the only truthy value
pub fn parse_flag(value: Option<&str>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Comma separated list → lowercased set, blanks dropped
pub fn str_to_set(value: Option<&str>) -> HashSet<String> {
    value
        .unwrap_or("")
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Fetch the notification configuration in one parameter call
///
/// # Errors
///
/// Propagates the source's error; callers treat it as "notifications off".
pub async fn load_notify_config(
    source: &dyn ParameterSource,
    names: &NotifyParameterNames,
) -> Result<NotifyConfig> {
    let wanted = names.configured();
    if wanted.is_empty() {
        return Ok(NotifyConfig::disabled());
    }
    let values = source.get_parameters(&wanted).await?;
    Ok(NotifyConfig::from_values(names, &values))
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: Option<String>,
    fetched_at: DateTime<Utc>,
}

/// Read-through cache over a [`ParameterSource`]
///
/// Values (and absences) are reused until they are older than the TTL.
/// Staleness is bounded by the TTL; there is no invalidation.
pub struct CachedParameterSource<S> {
    inner: S,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    cache: RwLock<HashMap<String, CachedValue>>,
}

impl<S: ParameterSource> CachedParameterSource<S> {
    pub fn new(inner: S, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            ttl,
            clock,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ParameterSource> ParameterSource for CachedParameterSource<S> {
    async fn get_parameters(&self, names: &[String]) -> Result<HashMap<String, String>> {
        let now = self.clock.now();
        let mut result = HashMap::new();
        let mut stale = Vec::new();

        {
            let cache = self.cache.read().await;
            for name in names {
                match cache.get(name) {
                    Some(cached) if now - cached.fetched_at < self.ttl => {
                        if let Some(value) = &cached.value {
                            result.insert(name.clone(), value.clone());
                        }
                    }
                    _ => stale.push(name.clone()),
                }
            }
        }

        if stale.is_empty() {
            return Ok(result);
        }

        let fetched = self.inner.get_parameters(&stale).await?;
        let mut cache = self.cache.write().await;
        for name in stale {
            let value = fetched.get(&name).cloned();
            if let Some(v) = &value {
                result.insert(name.clone(), v.clone());
            }
            cache.insert(
                name,
                CachedValue {
                    value,
                    fetched_at: now,
                },
            );
        }

        Ok(result)
    }
}
