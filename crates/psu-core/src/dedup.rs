//! Salted dedup keys for notification envelopes
//!
//! The queue suppresses messages that share a dedup key within its window.
//! Keying on patient and site means repeated "ready" transitions for the
//! same patient at the same site collapse into one notification. The salt
//! keeps the key from being a reversible function of the patient id.

use psu_core_types::Sensitive;
use ring::hmac;

use crate::ports::SecretSource;

/// Non-secret salt used when the real one is unavailable
pub const FALLBACK_SALT: &str = "DEV SALT";

/// Hex HMAC-SHA256 of `input` keyed by `salt`
pub fn salted_hash(input: &str, salt: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, salt.as_bytes());
    hex::encode(hmac::sign(&key, input.as_bytes()).as_ref())
}

/// Dedup key for a patient at a site
pub fn dedup_key(patient_id: &str, site_code: &str, salt: &Sensitive<String>) -> String {
    salted_hash(&format!("{}:{}", patient_id, site_code), salt.expose())
}

/// Resolve the dedup salt from the secret source.
///
/// Never fails: a missing secret name, a fetch error or a secret without a
/// usable `salt` field all yield [`FALLBACK_SALT`] with a warning.
pub async fn resolve_salt(source: &dyn SecretSource, secret_name: Option<&str>) -> Sensitive<String> {
    let salt = match secret_name {
        None => None,
        Some(name) => match source.get_secret(name).await {
            Ok(Some(value)) => {
                let salt = value
                    .get("salt")
                    .and_then(|s| s.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                if salt.is_none() {
                    tracing::error!(
                        secret = name,
                        "Secret did not contain a valid salt field, falling back to {}",
                        FALLBACK_SALT
                    );
                }
                salt
            }
            Ok(None) => {
                tracing::error!(secret = name, "Salt secret not found, falling back to {}", FALLBACK_SALT);
                None
            }
            Err(err) => {
                tracing::error!(
                    secret = name,
                    error = %err,
                    "Failed to fetch salt secret, using {}",
                    FALLBACK_SALT
                );
                None
            }
        },
    };

    match salt {
        Some(salt) => Sensitive::new(salt),
        None => {
            tracing::warn!(
                "Using the fallback salt value - please update the environment variable `SQS_SALT` to a random value."
            );
            Sensitive::new(FALLBACK_SALT.to_string())
        }
    }
}
