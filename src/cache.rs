//! Redis-backed response cache.
//!
//! Read handlers consult the cache before touching the database; write
//! handlers invalidate the affected keys afterward. The cache is strictly
//! best-effort: a Redis that is down, slow, or unconfigured degrades every
//! operation to a miss or a no-op, never to a request failure.
//!
//! Key layout: `cache:{table}` for full-table listings, `cache:{table}:{id}`
//! for single rows (composite-keyed rows join their ids with `:`).

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info, warn};

/// Build the cache key for a full-table listing.
pub fn list_key(table: &str) -> String {
    format!("cache:{}", table)
}

/// Build the cache key for a single row.
pub fn item_key(table: &str, id: &str) -> String {
    format!("cache:{}:{}", table, id)
}

/// Build the cache key for a composite-keyed row.
pub fn composite_key(table: &str, ids: &[&str]) -> String {
    format!("cache:{}:{}", table, ids.join(":"))
}

/// Cache client handle. Cheap to clone.
#[derive(Clone)]
pub struct Cache {
    conn: Option<MultiplexedConnection>,
}

impl Cache {
    /// Connect to Redis, or build a disabled cache when no URL is configured.
    ///
    /// A configured-but-unreachable Redis is reported and the cache comes up
    /// disabled; the server still starts, it just serves everything from the
    /// database.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            info!("no cache configured, caching disabled");
            return Self { conn: None };
        };

        let conn = match redis::Client::open(url) {
            Ok(client) => match client.get_multiplexed_async_connection().await {
                Ok(conn) => {
                    info!("connected to cache");
                    Some(conn)
                }
                Err(e) => {
                    warn!(error = %e, "failed to connect to cache, caching disabled");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "invalid cache URL, caching disabled");
                None
            }
        };

        Self { conn }
    }

    /// A cache that never hits; used when Redis is unconfigured and in tests.
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    /// Look up a cached value. Any failure is a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(value)) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "cache get failed");
                None
            }
        }
    }

    /// Store a value with a TTL. Failures are logged and swallowed.
    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl_secs).await {
            warn!(key, error = %e, "cache set failed");
        }
    }

    /// Drop a key. Failures are logged and swallowed.
    pub async fn del(&self, key: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if let Err(e) = conn.del::<_, ()>(key).await {
            warn!(key, error = %e, "cache del failed");
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(list_key("posts"), "cache:posts");
        assert_eq!(item_key("posts", "42"), "cache:posts:42");
        assert_eq!(
            composite_key("post_tags", &["7", "3"]),
            "cache:post_tags:7:3"
        );
    }

    #[tokio::test]
    async fn test_disabled_cache_misses_and_noops() {
        let cache = Cache::disabled();
        assert!(!cache.is_enabled());
        assert!(cache.get("cache:posts").await.is_none());
        // These must not error or panic.
        cache.set_ex("cache:posts", "[]", 300).await;
        cache.del("cache:posts").await;
    }

    #[tokio::test]
    async fn test_connect_without_url_is_disabled() {
        let cache = Cache::connect(None).await;
        assert!(!cache.is_enabled());
    }
}
