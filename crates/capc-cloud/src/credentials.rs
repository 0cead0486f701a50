//! Endpoint credentials read from a failure domain's secret

use std::collections::BTreeMap;
use std::fmt;

use crate::error::CloudError;

/// Secret key holding the API endpoint URL
pub const API_URL_KEY: &str = "api-url";
/// Secret key holding the API key
pub const API_KEY_KEY: &str = "api-key";
/// Secret key holding the secret key
pub const SECRET_KEY_KEY: &str = "secret-key";
/// Secret key toggling TLS verification
pub const VERIFY_SSL_KEY: &str = "verify-ssl";

/// Everything needed to sign requests against one endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct CloudCredentials {
    /// Endpoint, e.g. `https://cloud.example.com/client/api`
    pub api_url: String,
    /// API key
    pub api_key: String,
    /// Secret key used for request signatures
    pub secret_key: String,
    /// Verify the endpoint's TLS certificate
    pub verify_ssl: bool,
}

impl CloudCredentials {
    /// Parse decoded secret data.
    ///
    /// `verify-ssl` is optional and defaults to true; anything other than
    /// "false" (case-insensitive) keeps verification on.
    pub fn from_secret_data(data: &BTreeMap<String, String>) -> Result<Self, CloudError> {
        let required = |key: &str| -> Result<String, CloudError> {
            data.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| CloudError::Credentials(format!("missing {}", key)))
        };

        Ok(Self {
            api_url: required(API_URL_KEY)?,
            api_key: required(API_KEY_KEY)?,
            secret_key: required(SECRET_KEY_KEY)?,
            verify_ssl: !data
                .get(VERIFY_SSL_KEY)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("false")),
        })
    }

    /// Same endpoint, different key pair (e.g. a per-account user)
    pub fn with_keys(&self, api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            ..self.clone()
        }
    }
}

// Keys stay out of logs
impl fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}
