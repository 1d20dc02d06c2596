//! Runtime settings
//!
//! Everything the pipeline reads from its environment, resolved once at
//! startup. Parameter *names* live here; parameter *values* are fetched per
//! batch through a `ParameterSource`.

use std::time::Duration;

use psu_core::errors::{ExError, ExErrorKind, Result};
use psu_core::notify_config::{NotifyParameterNames, DEFAULT_PARAMETER_TTL_SECS};

/// Wall-clock budget for the atomic commit
pub const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 9500;

/// Environment in which the synthetic interception policy is active
pub const INTERCEPTION_ENVIRONMENT: &str = "int";

/// Parameter names used for the synthetic sets when not overridden
pub const DEFAULT_TEST_PRESCRIPTION_PARAMS: [&str; 4] = [
    "TEST_PRESCRIPTIONS_1",
    "TEST_PRESCRIPTIONS_2",
    "TEST_PRESCRIPTIONS_3",
    "TEST_PRESCRIPTIONS_4",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub environment: String,
    pub require_application_name: bool,
    pub notify_params: NotifyParameterNames,
    /// Parameter names of the synthetic sets A, B, C and D, in that order
    pub test_prescription_params: [String; 4],
    /// Secret holding the dedup salt
    pub salt_secret_name: Option<String>,
    pub queue_url: Option<String>,
    pub commit_timeout: Duration,
    pub parameter_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: String::new(),
            require_application_name: false,
            notify_params: NotifyParameterNames::default(),
            test_prescription_params: DEFAULT_TEST_PRESCRIPTION_PARAMS.map(str::to_string),
            salt_secret_name: None,
            queue_url: None,
            commit_timeout: Duration::from_millis(DEFAULT_COMMIT_TIMEOUT_MS),
            parameter_ttl: Duration::from_secs(DEFAULT_PARAMETER_TTL_SECS.unsigned_abs()),
        }
    }
}

impl Settings {
    /// Load settings from process environment variables
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` when a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup
    ///
    /// Blank values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` when a numeric variable does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let mut test_prescription_params = defaults.test_prescription_params.clone();
        let overrides = [
            "TEST_PRESCRIPTIONS_PARAM_NAME_1",
            "TEST_PRESCRIPTIONS_PARAM_NAME_2",
            "TEST_PRESCRIPTIONS_PARAM_NAME_3",
            "TEST_PRESCRIPTIONS_PARAM_NAME_4",
        ];
        for (slot, name) in test_prescription_params.iter_mut().zip(overrides) {
            if let Some(configured) = var(name) {
                *slot = configured;
            }
        }

        Ok(Self {
            environment: var("ENVIRONMENT").unwrap_or_default(),
            require_application_name: var("REQUIRE_APPLICATION_NAME")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            notify_params: NotifyParameterNames {
                enable_notifications: var("ENABLE_NOTIFICATIONS_PARAM"),
                enabled_site_codes: var("ENABLED_SITE_ODS_CODES_PARAM"),
                enabled_systems: var("ENABLED_SYSTEMS_PARAM"),
                blocked_site_codes: var("BLOCKED_SITE_ODS_CODES_PARAM"),
            },
            test_prescription_params,
            salt_secret_name: var("SQS_SALT"),
            queue_url: var("NHS_NOTIFY_PRESCRIPTIONS_SQS_QUEUE_URL"),
            commit_timeout: match var("PSU_COMMIT_TIMEOUT_MS") {
                Some(v) => Duration::from_millis(parse_number("PSU_COMMIT_TIMEOUT_MS", &v)?),
                None => defaults.commit_timeout,
            },
            parameter_ttl: match var("PSU_CONFIG_TTL_SECS") {
                Some(v) => Duration::from_secs(parse_number("PSU_CONFIG_TTL_SECS", &v)?),
                None => defaults.parameter_ttl,
            },
        })
    }

    /// Whether the synthetic interception policy should be installed
    pub fn interception_enabled(&self) -> bool {
        self.environment.eq_ignore_ascii_case(INTERCEPTION_ENVIRONMENT)
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| {
        ExError::new(ExErrorKind::NotConfigured)
            .with_op("settings")
            .with_message(format!("{} must be a whole number, got '{}'", name, value))
    })
}
