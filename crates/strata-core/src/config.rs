//! Connection configuration.
//!
//! The resource config arrives as JSON where every field is either a literal
//! or `{"env": "VAR_NAME"}`. [`RawConnectionConfig::resolve`] reads the
//! environment once and produces a [`ConnectionConfig`]; connection code only
//! ever sees the resolved struct.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{DbIoError, Result};

/// How connections are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectorStrategy {
    /// The engine's own client protocol.
    #[default]
    Native,
    /// A generic SQL toolkit connection (sqlx, Postgres wire).
    Sqlx,
}

impl FromStr for ConnectorStrategy {
    type Err = DbIoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "native" => Ok(ConnectorStrategy::Native),
            "sqlx" => Ok(ConnectorStrategy::Sqlx),
            other => Err(DbIoError::config(format!(
                "unknown connector '{}', expected 'native' or 'sqlx'",
                other
            ))),
        }
    }
}

impl fmt::Display for ConnectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorStrategy::Native => f.write_str("native"),
            ConnectorStrategy::Sqlx => f.write_str("sqlx"),
        }
    }
}

/// A config field given literally or read from an environment variable.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConfigSource<T> {
    Env { env: String },
    Literal(T),
}

impl<T> ConfigSource<T>
where
    T: Clone + FromStr,
{
    fn resolve(&self, key: &str) -> Result<T> {
        match self {
            ConfigSource::Literal(v) => Ok(v.clone()),
            ConfigSource::Env { env } => {
                let raw = std::env::var(env).map_err(|_| {
                    DbIoError::config(format!(
                        "environment variable '{}' for '{}' is not set",
                        env, key
                    ))
                })?;
                raw.trim().parse::<T>().map_err(|_| {
                    DbIoError::config(format!(
                        "environment variable '{}' for '{}' has an invalid value",
                        env, key
                    ))
                })
            }
        }
    }
}

fn resolve_opt<T: Clone + FromStr>(key: &str, src: &Option<ConfigSource<T>>) -> Result<Option<T>> {
    src.as_ref().map(|s| s.resolve(key)).transpose()
}

fn resolve_required<T: Clone + FromStr>(key: &str, src: &Option<ConfigSource<T>>) -> Result<T> {
    resolve_opt(key, src)?
        .ok_or_else(|| DbIoError::config(format!("missing required config field '{}'", key)))
}

/// Resource config as written by the user, before source resolution.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConnectionConfig {
    pub host: Option<ConfigSource<String>>,
    pub port: Option<ConfigSource<u16>>,
    pub user: Option<ConfigSource<String>>,
    pub password: Option<ConfigSource<String>>,
    pub catalog: Option<ConfigSource<String>>,
    pub schema: Option<ConfigSource<String>>,
    pub connector: Option<ConfigSource<String>>,
    pub autocommit: Option<ConfigSource<bool>>,
}

impl RawConnectionConfig {
    /// Resolve literal and environment sources into a [`ConnectionConfig`].
    pub fn resolve(&self) -> Result<ConnectionConfig> {
        let connector = match resolve_opt("connector", &self.connector)? {
            Some(name) => name.parse()?,
            None => ConnectorStrategy::default(),
        };
        Ok(ConnectionConfig {
            host: resolve_required("host", &self.host)?,
            port: resolve_required("port", &self.port)?,
            user: resolve_required("user", &self.user)?,
            password: resolve_opt("password", &self.password)?,
            catalog: resolve_opt("catalog", &self.catalog)?,
            schema: resolve_opt("schema", &self.schema)?,
            connector,
            autocommit: resolve_opt("autocommit", &self.autocommit)?.unwrap_or(true),
        })
    }
}

/// Resolved connection settings for one engine.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Default catalog (database) for unqualified names.
    pub catalog: Option<String>,
    /// Default schema for unqualified names.
    pub schema: Option<String>,
    pub connector: ConnectorStrategy,
    pub autocommit: bool,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: None,
            catalog: None,
            schema: None,
            connector: ConnectorStrategy::Native,
            autocommit: true,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_connector(mut self, connector: ConnectorStrategy) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    /// The same config with the default schema removed, so a slice-specific
    /// schema can be injected without colliding with it.
    pub fn without_schema(&self) -> Self {
        Self {
            schema: None,
            ..self.clone()
        }
    }

    /// Parse and resolve a JSON resource config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawConnectionConfig = serde_json::from_str(json)
            .map_err(|e| DbIoError::config(format!("invalid connection config: {}", e)))?;
        raw.resolve()
    }

    /// Read, parse and resolve a JSON resource config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DbIoError::config(format!("cannot read config file {:?}: {}", path, e))
        })?;
        Self::from_json_str(&content)
    }

    /// Connection arguments that are set, keyed by their config name.
    ///
    /// Every connector strategy builds its connection from this one key set.
    pub fn connection_args(&self) -> BTreeMap<&'static str, String> {
        let mut args = BTreeMap::new();
        args.insert("host", self.host.clone());
        args.insert("port", self.port.to_string());
        args.insert("user", self.user.clone());
        if let Some(password) = &self.password {
            args.insert("password", password.clone());
        }
        if let Some(catalog) = &self.catalog {
            args.insert("catalog", catalog.clone());
        }
        if let Some(schema) = &self.schema {
            args.insert("schema", schema.clone());
        }
        args
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .field("connector", &self.connector)
            .field("autocommit", &self.autocommit)
            .finish()
    }
}
