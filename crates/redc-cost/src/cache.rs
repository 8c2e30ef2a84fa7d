//! Durable pricing cache on SQLite.
//!
//! One row per `(provider, region, resource_type)`. Reads filter on
//! `expires_at > now`, so an expired row is never returned even before
//! [`PricingCache::sweep_expired`] removes it. Timestamps are unix
//! milliseconds.

use std::path::Path;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use snafu::ResultExt;

use crate::error::CacheQuerySnafu;
use crate::error::CreateCacheDirSnafu;
use crate::error::OpenCacheSnafu;
use crate::error::PayloadSnafu;
use crate::error::Result;
use crate::types::PricingData;

/// Default lifetime of a cached row.
pub const DEFAULT_TTL_MS: u64 = 24 * 60 * 60 * 1000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pricing_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    region TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    pricing_data TEXT NOT NULL,
    currency TEXT NOT NULL,
    cached_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    UNIQUE(provider, region, resource_type)
);
CREATE INDEX IF NOT EXISTS idx_pricing_lookup ON pricing_cache(provider, region, resource_type);
CREATE INDEX IF NOT EXISTS idx_pricing_expiry ON pricing_cache(expires_at);
";

/// SQLite-backed pricing cache.
#[derive(Debug)]
pub struct PricingCache {
    conn: Mutex<Connection>,
}

impl PricingCache {
    /// Open or create the cache at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context(CreateCacheDirSnafu { path: parent })?;
            }
        }
        let conn = Connection::open(path).context(OpenCacheSnafu { path })?;
        Self::init(conn, path)
    }

    /// In-memory cache for tests and one-shot estimates.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context(OpenCacheSnafu { path: ":memory:" })?;
        Self::init(conn, Path::new(":memory:"))
    }

    fn init(conn: Connection, path: &Path) -> Result<Self> {
        conn.execute_batch(SCHEMA).context(OpenCacheSnafu { path })?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite consistent; keep serving.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Unexpired row for the key, if any.
    pub fn get(&self, provider: &str, region: &str, resource_type: &str, now_ms: u64) -> Result<Option<PricingData>> {
        let conn = self.conn();
        let payload: Option<String> = conn
            .query_row(
                "SELECT pricing_data FROM pricing_cache
                 WHERE provider = ?1 AND region = ?2 AND resource_type = ?3 AND expires_at > ?4",
                params![provider, region, resource_type, now_ms as i64],
                |row| row.get(0),
            )
            .optional()
            .context(CacheQuerySnafu { operation: "lookup" })?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json).context(PayloadSnafu)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the row for `data`'s key.
    pub fn put(&self, data: &PricingData, now_ms: u64, ttl_ms: u64) -> Result<()> {
        let payload = serde_json::to_string(data).context(PayloadSnafu)?;
        let expires_at = now_ms.saturating_add(ttl_ms);
        self.conn()
            .execute(
                "INSERT INTO pricing_cache
                    (provider, region, resource_type, pricing_data, currency, cached_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(provider, region, resource_type) DO UPDATE SET
                    pricing_data = excluded.pricing_data,
                    currency = excluded.currency,
                    cached_at = excluded.cached_at,
                    expires_at = excluded.expires_at",
                params![
                    data.provider,
                    data.region,
                    data.resource_type,
                    payload,
                    data.currency,
                    now_ms as i64,
                    expires_at as i64,
                ],
            )
            .context(CacheQuerySnafu { operation: "upsert" })?;
        Ok(())
    }

    /// Delete rows whose expiry is at or before `now_ms`. Returns the number removed.
    pub fn sweep_expired(&self, now_ms: u64) -> Result<usize> {
        self.conn()
            .execute("DELETE FROM pricing_cache WHERE expires_at <= ?1", params![now_ms as i64])
            .context(CacheQuerySnafu { operation: "sweep" })
    }

    /// Total rows, expired or not.
    pub fn row_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM pricing_cache", [], |row| row.get(0))
            .context(CacheQuerySnafu { operation: "count" })?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(hourly: f64) -> PricingData {
        PricingData::hourly("aws", "us-east-1", "t2.micro", "USD", hourly)
    }

    #[test]
    fn test_upsert_keeps_one_row() {
        let cache = PricingCache::open_in_memory().unwrap();
        cache.put(&price(0.5), 1_000, DEFAULT_TTL_MS).unwrap();
        cache.put(&price(0.75), 2_000, DEFAULT_TTL_MS).unwrap();

        assert_eq!(cache.row_count().unwrap(), 1);
        let hit = cache.get("aws", "us-east-1", "t2.micro", 3_000).unwrap().unwrap();
        assert_eq!(hit.hourly_price, 0.75);
    }

    #[test]
    fn test_expired_row_hidden_until_swept() {
        let cache = PricingCache::open_in_memory().unwrap();
        cache.put(&price(0.5), 1_000, 500).unwrap();

        assert!(cache.get("aws", "us-east-1", "t2.micro", 1_499).unwrap().is_some());
        // expiry is exclusive
        assert!(cache.get("aws", "us-east-1", "t2.micro", 1_500).unwrap().is_none());
        assert_eq!(cache.row_count().unwrap(), 1);

        assert_eq!(cache.sweep_expired(1_500).unwrap(), 1);
        assert_eq!(cache.row_count().unwrap(), 0);
    }

    #[test]
    fn test_miss_on_other_key() {
        let cache = PricingCache::open_in_memory().unwrap();
        cache.put(&price(0.5), 1_000, DEFAULT_TTL_MS).unwrap();
        assert!(cache.get("aws", "eu-west-1", "t2.micro", 1_000).unwrap().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("pricing.db");
        {
            let cache = PricingCache::open(&path).unwrap();
            cache.put(&price(1.25), 1_000, DEFAULT_TTL_MS).unwrap();
        }
        let cache = PricingCache::open(&path).unwrap();
        let hit = cache.get("aws", "us-east-1", "t2.micro", 2_000).unwrap().unwrap();
        assert_eq!(hit, price(1.25));
    }
}
