//! Blocklist of revoked token identifiers (`jti`).
//!
//! Every backend keeps an entry for a fixed retention window measured from the
//! moment of revocation. Retention comes from
//! [`AuthConfig::revocation_retention`](crate::auth::AuthConfig::revocation_retention),
//! which is never shorter than the longest token lifetime.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rocket_db_pools::sqlx::{self, PgPool};
use tokio::task::JoinHandle;

use crate::auth::AuthResult;

#[rocket::async_trait]
pub trait RevocationStore: Send + Sync {
    /// Mark `jti` as revoked. Visible to every later `contains` call.
    async fn add(&self, jti: &str) -> AuthResult<()>;

    async fn contains(&self, jti: &str) -> AuthResult<bool>;

    /// Drop entries whose retention has lapsed. Returns how many were removed.
    async fn purge_expired(&self) -> AuthResult<u64>;
}

fn retained_until(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    now.checked_add_signed(retention).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Process-local blocklist. Suitable for a single instance or tests.
#[derive(Debug)]
pub struct MemoryRevocationStore {
    entries: DashMap<String, DateTime<Utc>>,
    retention: Duration,
}

impl MemoryRevocationStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn add_at(&self, jti: &str, now: DateTime<Utc>) {
        let expires_at = retained_until(now, self.retention);
        self.entries
            .entry(jti.to_string())
            .and_modify(|current| {
                if *current < expires_at {
                    *current = expires_at;
                }
            })
            .or_insert(expires_at);
    }

    fn contains_at(&self, jti: &str, now: DateTime<Utc>) -> bool {
        let live = match self.entries.get(jti) {
            Some(expires_at) => *expires_at > now,
            None => return false,
        };
        if !live {
            self.entries.remove_if(jti, |_, expires_at| *expires_at <= now);
        }
        live
    }

    fn purge_at(&self, now: DateTime<Utc>) -> u64 {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len()) as u64
    }
}

#[rocket::async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn add(&self, jti: &str) -> AuthResult<()> {
        self.add_at(jti, Utc::now());
        Ok(())
    }

    async fn contains(&self, jti: &str) -> AuthResult<bool> {
        Ok(self.contains_at(jti, Utc::now()))
    }

    async fn purge_expired(&self) -> AuthResult<u64> {
        Ok(self.purge_at(Utc::now()))
    }
}

/// Blocklist shared by every instance through the `revoked_tokens` table.
#[derive(Debug, Clone)]
pub struct PgRevocationStore {
    pool: PgPool,
    retention: Duration,
}

impl PgRevocationStore {
    pub fn new(pool: PgPool, retention: Duration) -> Self {
        Self { pool, retention }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[rocket::async_trait]
impl RevocationStore for PgRevocationStore {
    async fn add(&self, jti: &str) -> AuthResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO revoked_tokens (jti, revoked_at, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (jti) DO UPDATE
                SET expires_at = GREATEST(revoked_tokens.expires_at, EXCLUDED.expires_at)
            "#,
        )
        .bind(jti)
        .bind(now)
        .bind(retained_until(now, self.retention))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn contains(&self, jti: &str) -> AuthResult<bool> {
        let revoked: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM revoked_tokens WHERE jti = $1 AND expires_at > $2)",
        )
        .bind(jti)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(revoked)
    }

    async fn purge_expired(&self) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Periodically drop lapsed blocklist entries. The first purge runs one
/// full interval after start.
pub fn spawn_purge_task(
    store: Arc<dyn RevocationStore>,
    every: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => log::info!("purged {} expired revoked tokens", removed),
                Err(err) => log::warn!("revoked token purge failed: {}", err),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn revoked_ids_are_reported() {
        let store = MemoryRevocationStore::new(Duration::days(2));

        assert!(!store.contains("abc").await.expect("lookup"));
        store.add("abc").await.expect("add");
        assert!(store.contains("abc").await.expect("lookup"));
        assert!(!store.contains("abd").await.expect("lookup"));
    }

    #[test]
    fn unbounded_retention_never_lapses() {
        let store = MemoryRevocationStore::new(Duration::MAX);
        let now = Utc::now();
        store.add_at("forever", now);

        assert!(store.contains_at("forever", now + Duration::days(365 * 1000)));
        assert_eq!(store.purge_at(now + Duration::days(365 * 1000)), 0);
    }

    #[test]
    fn entries_lapse_after_retention() {
        let store = MemoryRevocationStore::new(Duration::minutes(10));
        let now = Utc::now();
        store.add_at("old", now);

        assert!(store.contains_at("old", now + Duration::minutes(9)));
        assert!(!store.contains_at("old", now + Duration::minutes(11)));
        assert!(store.is_empty(), "lapsed entry is dropped on lookup");
    }

    #[test]
    fn re_adding_never_shortens_retention() {
        let store = MemoryRevocationStore::new(Duration::minutes(10));
        let now = Utc::now();
        store.add_at("jti", now + Duration::minutes(5));
        store.add_at("jti", now);

        assert!(store.contains_at("jti", now + Duration::minutes(12)));
    }

    #[test]
    fn purge_removes_only_lapsed_entries() {
        let store = MemoryRevocationStore::new(Duration::minutes(10));
        let now = Utc::now();
        store.add_at("early", now - Duration::minutes(20));
        store.add_at("late", now);

        assert_eq!(store.purge_at(now), 1);
        assert_eq!(store.len(), 1);
        assert!(store.contains_at("late", now));
    }

    #[tokio::test]
    async fn revocation_is_visible_across_tasks() {
        let store: Arc<dyn RevocationStore> =
            Arc::new(MemoryRevocationStore::new(Duration::days(2)));

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.add(&format!("jti-{i}")).await })
            })
            .collect();
        for writer in writers {
            writer.await.expect("join").expect("add");
        }

        let readers: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.contains(&format!("jti-{i}")).await })
            })
            .collect();
        for reader in readers {
            assert!(reader.await.expect("join").expect("lookup"));
        }
    }

    #[tokio::test]
    async fn purge_task_clears_lapsed_entries() {
        let store = Arc::new(MemoryRevocationStore::new(Duration::milliseconds(5)));
        store.add("short-lived").await.expect("add");

        let task = spawn_purge_task(store.clone(), std::time::Duration::from_millis(20));
        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        task.abort();

        assert!(store.is_empty());
    }
}
