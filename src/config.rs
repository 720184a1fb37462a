use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use log::{info, warn};
use thiserror::Error;

use crate::quota::VotePolicy;

const MIN_SESSION_KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {key} value: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct PocketBaseSettings {
    pub url: String,
    pub collection: String,
    pub admin_email: String,
    pub admin_password: String,
    pub credential_lifetime: Duration,
}

#[derive(Debug, Clone)]
pub enum StoreSettings {
    Sled { path: String },
    PocketBase(PocketBaseSettings),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub store: StoreSettings,
    pub session_key: Vec<u8>,
    pub session_lifetime: Duration,
    pub secure_cookie: bool,
    pub vote_policy: VotePolicy,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from `lookup`. Secrets missing from `lookup`
    /// are read from `/run/secrets/<NAME>`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = match try_load::<String, _>(&lookup, "FESTIVAL_STORE", "sled")?.as_str() {
            "sled" => StoreSettings::Sled {
                path: try_load(&lookup, "FESTIVAL_SLED_PATH", "festival.db")?,
            },
            "pocketbase" => StoreSettings::PocketBase(PocketBaseSettings {
                url: required(&lookup, "POCKETBASE_URL")?,
                collection: try_load(&lookup, "POCKETBASE_COLLECTION", "images")?,
                admin_email: required(&lookup, "POCKETBASE_ADMIN_EMAIL")?,
                admin_password: secret(&lookup, "POCKETBASE_ADMIN_PASSWORD")?,
                credential_lifetime: Duration::from_secs(try_load(
                    &lookup,
                    "FESTIVAL_CREDENTIAL_SECS",
                    "600",
                )?),
            }),
            other => {
                return Err(ConfigError::Invalid {
                    key: "FESTIVAL_STORE",
                    message: format!("unknown store {:?}, expected sled or pocketbase", other),
                })
            }
        };

        let session_key = secret(&lookup, "FESTIVAL_SESSION_KEY")?.into_bytes();
        if session_key.len() < MIN_SESSION_KEY_LEN {
            return Err(ConfigError::Invalid {
                key: "FESTIVAL_SESSION_KEY",
                message: format!("needs at least {} bytes", MIN_SESSION_KEY_LEN),
            });
        }
        let session_hours: u64 = try_load(&lookup, "FESTIVAL_SESSION_HOURS", "168")?;
        let session_secs = session_hours
            .checked_mul(60 * 60)
            .filter(|secs| i64::try_from(*secs).is_ok())
            .ok_or_else(|| ConfigError::Invalid {
                key: "FESTIVAL_SESSION_HOURS",
                message: format!("{} hours is out of range", session_hours),
            })?;

        Ok(Config {
            bind: try_load(&lookup, "FESTIVAL_BIND", "127.0.0.1:8080")?,
            store,
            session_key,
            session_lifetime: Duration::from_secs(session_secs),
            secure_cookie: try_load(&lookup, "FESTIVAL_SECURE_COOKIE", "false")?,
            vote_policy: VotePolicy {
                allow_self_vote: try_load(&lookup, "FESTIVAL_ALLOW_SELF_VOTE", "true")?,
            },
            max_upload_bytes: try_load(&lookup, "FESTIVAL_MAX_UPLOAD_BYTES", "10485760")?,
        })
    }
}

fn try_load<T, F>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        })
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).ok_or(ConfigError::Missing(key))
}

fn secret<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .or_else(|| read_secret(key))
        .ok_or(ConfigError::Missing(key))
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
        })
        .ok()
}
