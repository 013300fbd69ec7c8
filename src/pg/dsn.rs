//! Connection parameters for a single PostgreSQL node

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::Deserialize;

/// Key holding a base64 encoded password in the config file
pub const B64_PASSWORD_KEY: &str = "b64password";
/// Key holding the plain password handed to the driver
pub const PASSWORD_KEY: &str = "password";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: &str = "5432";

#[derive(Debug, thiserror::Error)]
pub enum DsnError {
    #[error("could not decode {key}: {source}")]
    InvalidBase64 {
        key: &'static str,
        #[source]
        source: base64::DecodeError,
    },
    #[error("decoded {key} is not valid UTF-8")]
    InvalidUtf8 { key: &'static str },
}

/// A config value may be written as a string, an integer or a boolean
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ParamValue {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl From<ParamValue> for String {
    fn from(value: ParamValue) -> Self {
        match value {
            ParamValue::Text(s) => s,
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Bool(b) => b.to_string(),
        }
    }
}

/// Key/value connection parameters (host, port, user, dbname, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "BTreeMap<String, ParamValue>")]
pub struct Dsn(BTreeMap<String, String>);

impl From<BTreeMap<String, ParamValue>> for Dsn {
    fn from(raw: BTreeMap<String, ParamValue>) -> Self {
        Self(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Dsn {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Dsn {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Host parameter, falling back to `PGHOST` and then `localhost`
    pub fn host(&self) -> String {
        self.param_or_env("host", "PGHOST", DEFAULT_HOST)
    }

    /// Port parameter, falling back to `PGPORT` and then `5432`
    pub fn port(&self) -> String {
        self.param_or_env("port", "PGPORT", DEFAULT_PORT)
    }

    /// host:port, used to identify the node in logs
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    fn param_or_env(&self, key: &str, env_key: &str, default: &str) -> String {
        if let Some(value) = self.get(key).filter(|v| !v.is_empty()) {
            return value.to_string();
        }
        match std::env::var(env_key) {
            Ok(value) if !value.is_empty() => value,
            _ => default.to_string(),
        }
    }

    /// Replace `b64password` with its decoded form under `password`.
    ///
    /// No-op when no encoded password is present.
    pub fn decode_password(&mut self) -> Result<(), DsnError> {
        let Some(encoded) = self.0.get(B64_PASSWORD_KEY) else {
            return Ok(());
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|source| DsnError::InvalidBase64 {
                key: B64_PASSWORD_KEY,
                source,
            })?;
        let password = String::from_utf8(decoded).map_err(|_| DsnError::InvalidUtf8 {
            key: B64_PASSWORD_KEY,
        })?;
        self.0.insert(PASSWORD_KEY.to_string(), password);
        self.0.remove(B64_PASSWORD_KEY);
        Ok(())
    }

    /// libpq style `key='value'` connect string, always carrying host and port
    pub fn connect_string(&self) -> String {
        let mut params = self.0.clone();
        params.insert("host".to_string(), self.host());
        params.insert("port".to_string(), self.port());
        params
            .iter()
            .map(|(key, value)| format!("{}={}", key, connect_string_value(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote a value for use in a connect string
pub fn connect_string_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Quote an identifier (schema, table, column) for use in SQL text
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
