use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DunaError, Result};

pub const PG_CREDS_FILE_ENV_VAR: &str = "PG_CREDS_FILE";
pub const PG_HOST_ENV_VAR: &str = "PG_HOST";
pub const PG_PORT_ENV_VAR: &str = "PG_PORT";
pub const PG_DB_NAME_ENV_VAR: &str = "PG_DBNAME";
pub const PG_SSLMODE_ENV_VAR: &str = "PG_SSLMODE";

/// Database configuration.
///
/// Either `url` is set, or the connection is assembled from the discrete
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL. Takes precedence over the discrete fields.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    #[serde(default, skip_serializing)]
    pub password: String,

    #[serde(default = "default_dbname")]
    pub dbname: String,

    #[serde(default = "default_sslmode")]
    pub sslmode: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Pool checkout timeout in seconds.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            user: String::new(),
            password: String::new(),
            dbname: default_dbname(),
            sslmode: default_sslmode(),
            pool_size: default_pool_size(),
            pool_timeout_secs: default_pool_timeout(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "postgres".to_string()
}

fn default_sslmode() -> String {
    "disable".to_string()
}

fn default_pool_size() -> u32 {
    1
}

fn default_pool_timeout() -> u64 {
    30
}

impl DatabaseConfig {
    /// Build the configuration from `PG_*` environment variables.
    ///
    /// `PG_CREDS_FILE` is required and must point at a file whose first line
    /// is the user name and whose second line is the password.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DatabaseConfig::from_env`], with an explicit variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let creds_path = lookup(PG_CREDS_FILE_ENV_VAR)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                DunaError::Config(format!(
                    "{} environment variable not set",
                    PG_CREDS_FILE_ENV_VAR
                ))
            })?;

        let (user, password) = read_credentials_file(Path::new(&creds_path))?;

        let port = lookup(PG_PORT_ENV_VAR)
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(default_port);

        Ok(Self {
            url: None,
            host: lookup(PG_HOST_ENV_VAR).unwrap_or_else(default_host),
            port,
            user,
            password,
            dbname: lookup(PG_DB_NAME_ENV_VAR).unwrap_or_else(default_dbname),
            sslmode: lookup(PG_SSLMODE_ENV_VAR).unwrap_or_else(default_sslmode),
            ..Default::default()
        })
    }
}

/// Read `user` and `password` from the first two lines of a credentials file.
fn read_credentials_file(path: &Path) -> Result<(String, String)> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DunaError::Config(format!(
            "Failed to open credentials file {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut lines = content.lines();
    let user = lines.next().unwrap_or_default().trim().to_string();
    let password = lines.next().unwrap_or_default().trim().to_string();

    if user.is_empty() || password.is_empty() {
        return Err(DunaError::Config(format!(
            "Invalid credentials format in file {}",
            PG_CREDS_FILE_ENV_VAR
        )));
    }

    Ok((user, password))
}
