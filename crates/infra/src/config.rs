//! Store configuration loaded from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `DATABASE_URL` | required |
//! | `SLOTBOOK_DB_MAX_CONNECTIONS` | `10` |
//! | `SLOTBOOK_DB_ACQUIRE_TIMEOUT_MS` | `5000` |
//! | `SLOTBOOK_LOCK_TIMEOUT_MS` | unset (wait indefinitely) |

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::store::PostgresAppointmentStore;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const MAX_CONNECTIONS: &str = "SLOTBOOK_DB_MAX_CONNECTIONS";
pub const ACQUIRE_TIMEOUT_MS: &str = "SLOTBOOK_DB_ACQUIRE_TIMEOUT_MS";
pub const LOCK_TIMEOUT_MS: &str = "SLOTBOOK_LOCK_TIMEOUT_MS";

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub lock_timeout: Option<Duration>,
}

impl StoreConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url =
            get(DATABASE_URL).ok_or_else(|| anyhow!("{DATABASE_URL} must be set"))?;
        let max_connections =
            parse_or(get(MAX_CONNECTIONS), MAX_CONNECTIONS, DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(anyhow!("{MAX_CONNECTIONS} must be at least 1"));
        }
        let acquire_timeout_ms =
            parse_or(get(ACQUIRE_TIMEOUT_MS), ACQUIRE_TIMEOUT_MS, DEFAULT_ACQUIRE_TIMEOUT_MS)?;
        let lock_timeout = get(LOCK_TIMEOUT_MS)
            .map(|raw| parse::<u64>(&raw, LOCK_TIMEOUT_MS))
            .transpose()?
            .map(Duration::from_millis);

        Ok(Self {
            database_url,
            max_connections,
            acquire_timeout: Duration::from_millis(acquire_timeout_ms),
            lock_timeout,
        })
    }

    /// Open a connection pool with the configured limits.
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.database_url)
            .await
            .context("failed to connect to Postgres")
    }

    /// Connect and wrap the pool in an appointment store, applying the lock timeout.
    pub async fn connect_store(&self) -> anyhow::Result<PostgresAppointmentStore> {
        let store = PostgresAppointmentStore::new(self.connect().await?);
        Ok(match self.lock_timeout {
            Some(timeout) => store.with_lock_timeout(timeout),
            None => store,
        })
    }
}

fn parse<T>(raw: &str, key: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} must be a non-negative integer, got '{raw}'"))
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map_or(Ok(default), |raw| parse(&raw, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_url_is_set() {
        let cfg =
            StoreConfig::from_lookup(lookup(&[(DATABASE_URL, "postgres://localhost/slotbook")]))
                .unwrap();
        assert_eq!(cfg.database_url, "postgres://localhost/slotbook");
        assert_eq!(cfg.max_connections, 10);
        assert_eq!(cfg.acquire_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.lock_timeout, None);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db/slotbook"),
            (MAX_CONNECTIONS, "25"),
            (ACQUIRE_TIMEOUT_MS, " 750 "),
            (LOCK_TIMEOUT_MS, "2000"),
        ]))
        .unwrap();
        assert_eq!(cfg.max_connections, 25);
        assert_eq!(cfg.acquire_timeout, Duration::from_millis(750));
        assert_eq!(cfg.lock_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn missing_url_is_an_error() {
        let err = StoreConfig::from_lookup(lookup(&[(DATABASE_URL, "  ")])).unwrap_err();
        assert!(err.to_string().contains(DATABASE_URL));
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = StoreConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db/slotbook"),
            (LOCK_TIMEOUT_MS, "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(LOCK_TIMEOUT_MS));

        let err = StoreConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db/slotbook"),
            (MAX_CONNECTIONS, "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(MAX_CONNECTIONS));
    }
}
