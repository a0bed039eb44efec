//! Credential resolution
//!
//! Devices carry an opaque credential reference. With a secrets backend
//! configured the reference is a key-value path looked up over HTTP;
//! without one it names an environment variable.

use reqwest::Client;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{Credentials, Error, Result, Settings};

/// Environment variable consulted for a reference when no backend is set
///
/// Upper-cased, with `/` and `.` replaced by `_`.
pub fn env_var_name(reference: &str) -> String {
    reference.to_uppercase().replace(['/', '.'], "_")
}

/// Unwrap a versioned KV response: `data.data`, else `data`, else empty
fn unwrap_data(payload: JsonValue) -> Map<String, JsonValue> {
    let JsonValue::Object(mut outer) = payload else {
        return Map::new();
    };

    match outer.remove("data") {
        Some(JsonValue::Object(mut data)) => match data.remove("data") {
            Some(JsonValue::Object(inner)) if !inner.is_empty() => inner,
            Some(other) => {
                data.insert("data".to_string(), other);
                data
            }
            None => data,
        },
        _ => Map::new(),
    }
}

/// Resolves credential references into login material
#[derive(Debug, Clone)]
pub struct SecretsResolver {
    settings: Arc<Settings>,
    client: Client,
}

impl SecretsResolver {
    pub fn new(settings: Arc<Settings>) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.vault_timeout())
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { settings, client })
    }

    /// Resolve a device's credential reference
    #[instrument(skip(self))]
    pub async fn resolve(&self, reference: &str) -> Result<Credentials> {
        if reference.trim().is_empty() {
            return Err(Error::ConfigError(
                "credential reference is empty".to_string(),
            ));
        }

        match self.get_secret(reference, None).await? {
            JsonValue::Object(map) => Credentials::from_map(&map),
            JsonValue::String(value) => match serde_json::from_str::<JsonValue>(&value) {
                Ok(JsonValue::Object(map)) => Credentials::from_map(&map),
                _ => Credentials::from_colon_form(&value),
            },
            other => Err(Error::SecretError(format!(
                "unsupported secret shape for {}: {}",
                reference,
                json_type(&other)
            ))),
        }
    }

    /// Fetch a secret, optionally narrowed to one key
    ///
    /// Without a backend the value is the raw environment string.
    pub async fn get_secret(&self, path: &str, key: Option<&str>) -> Result<JsonValue> {
        let Some((url, token)) = self.settings.vault() else {
            let var_name = env_var_name(key.unwrap_or(path));
            debug!(var_name = %var_name, "Secrets backend not configured; using environment");
            return std::env::var(&var_name).map(JsonValue::String).map_err(|_| {
                Error::ConfigError(format!(
                    "secrets backend not configured and env var {} not found",
                    var_name
                ))
            });
        };

        let url = format!(
            "{}/v1/{}",
            url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        debug!(url = %url, "Fetching secret");

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::SecretError(format!("request to {} failed: {}", url, e)))?;

        let response = response
            .error_for_status()
            .map_err(|e| Error::SecretError(format!("secrets backend error: {}", e)))?;

        let payload: JsonValue = response
            .json()
            .await
            .map_err(|e| Error::SecretError(format!("invalid secrets response: {}", e)))?;

        let mut data = unwrap_data(payload);
        match key {
            Some(key) => data
                .remove(key)
                .ok_or_else(|| Error::SecretError(format!("key {} not found at {}", key, path))),
            None => Ok(JsonValue::Object(data)),
        }
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
