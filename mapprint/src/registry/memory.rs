//! In-process shared registry backed by `DashMap`.
//!
//! Expiry is lazy: an entry past its deadline is treated as absent by every
//! operation and removed on the next access. [`MemoryRegistry::purge_expired`]
//! sweeps the whole map for long-running processes.
//!
//! Deadlines are measured with `tokio::time::Instant` so tests can drive
//! TTLs with a paused clock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{RegistryError, RegistryValue, SharedRegistry, DEFAULT_ENTRY_TTL};

#[derive(Debug)]
struct Slot {
    value: RegistryValue,
    ttl: Duration,
    expires_at: Instant,
}

impl Slot {
    fn new(value: RegistryValue, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            ttl,
            expires_at: now + ttl,
        }
    }

    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    #[inline]
    fn touch(&mut self, now: Instant) {
        self.expires_at = now + self.ttl;
    }
}

/// Shared registry living in this process.
#[derive(Debug)]
pub struct MemoryRegistry {
    entries: DashMap<String, Slot>,
    default_ttl: Duration,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    /// Creates an empty registry using [`DEFAULT_ENTRY_TTL`] for `put`.
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_ENTRY_TTL)
    }

    /// Creates an empty registry with a custom TTL for `put` and counters.
    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are stored, expired or not.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn read(&self, key: &str) -> Option<RegistryValue> {
        let now = Instant::now();
        let expired = match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                slot.touch(now);
                return Some(slot.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        // The shard guard must be released before removing.
        if expired {
            self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        }
        None
    }

    fn write(&self, key: &str, value: RegistryValue, ttl: Duration) {
        self.entries
            .insert(key.to_string(), Slot::new(value, ttl, Instant::now()));
    }

    fn remove(&self, key: &str) -> bool {
        let now = Instant::now();
        matches!(self.entries.remove(key), Some((_, slot)) if !slot.is_expired(now))
    }

    fn add(
        &self,
        key: &str,
        zero: RegistryValue,
        apply: impl FnOnce(&RegistryValue) -> Result<RegistryValue, RegistryError>,
    ) -> Result<RegistryValue, RegistryError> {
        let now = Instant::now();
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(zero.clone(), self.default_ttl, now));

        if slot.is_expired(now) {
            *slot = Slot::new(zero, self.default_ttl, now);
        }

        let next = apply(&slot.value)?;
        slot.value = next.clone();
        slot.touch(now);
        Ok(next)
    }

    fn insert_if_absent(&self, key: &str, value: RegistryValue, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot::new(value, ttl, now));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, ttl, now));
                true
            }
        }
    }

    fn live_keys(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl SharedRegistry for MemoryRegistry {
    async fn get(&self, key: &str) -> Result<Option<RegistryValue>, RegistryError> {
        Ok(self.read(key))
    }

    async fn put(&self, key: &str, value: RegistryValue) -> Result<(), RegistryError> {
        self.write(key, value, self.default_ttl);
        Ok(())
    }

    async fn put_with_ttl(
        &self,
        key: &str,
        value: RegistryValue,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        self.write(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RegistryError> {
        Ok(self.remove(key))
    }

    async fn increment_int(&self, key: &str, amount: i32) -> Result<i32, RegistryError> {
        let value = self.add(key, RegistryValue::Int(0), |v| match v {
            RegistryValue::Int(n) => n
                .checked_add(amount)
                .map(RegistryValue::Int)
                .ok_or_else(|| overflow(key)),
            other => Err(mismatch("int", other)),
        })?;
        match value {
            RegistryValue::Int(n) => Ok(n),
            other => Err(mismatch("int", &other)),
        }
    }

    async fn increment_long(&self, key: &str, amount: i64) -> Result<i64, RegistryError> {
        let value = self.add(key, RegistryValue::Long(0), |v| match v {
            RegistryValue::Long(n) => n
                .checked_add(amount)
                .map(RegistryValue::Long)
                .ok_or_else(|| overflow(key)),
            other => Err(mismatch("long", other)),
        })?;
        match value {
            RegistryValue::Long(n) => Ok(n),
            other => Err(mismatch("long", &other)),
        }
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: RegistryValue,
        ttl: Duration,
    ) -> Result<bool, RegistryError> {
        Ok(self.insert_if_absent(key, value, ttl))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self.live_keys(prefix))
    }
}

fn overflow(key: &str) -> RegistryError {
    RegistryError::Overflow {
        key: key.to_string(),
    }
}

fn mismatch(expected: &'static str, found: &RegistryValue) -> RegistryError {
    RegistryError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let registry = MemoryRegistry::new();
        assert_eq!(registry.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_found_zero_is_not_absent() {
        let registry = MemoryRegistry::new();
        registry.put("zero", RegistryValue::Long(0)).await.unwrap();
        assert_eq!(
            registry.get("zero").await.unwrap(),
            Some(RegistryValue::Long(0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_refreshed_by_access() {
        let registry = MemoryRegistry::new();
        let ttl = Duration::from_secs(10);
        registry
            .put_with_ttl("k", RegistryValue::Text("v".into()), ttl)
            .await
            .unwrap();

        assert!(registry.get("k").await.unwrap().is_some());

        // Access just before the deadline keeps it warm for another full TTL.
        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(registry.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(registry.get("k").await.unwrap().is_some());

        // No access for a full TTL: gone.
        tokio::time::advance(ttl).await;
        assert_eq!(registry.get("k").await.unwrap(), None);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_does_not_refresh_ttl() {
        let registry = MemoryRegistry::new();
        let ttl = Duration::from_secs(5);
        registry
            .put_with_ttl("c:available:a", RegistryValue::Int(1), ttl)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            registry.keys_with_prefix("c:available:").await.unwrap(),
            vec!["c:available:a".to_string()]
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(registry
            .keys_with_prefix("c:available:")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_increment_initializes_to_amount() {
        let registry = MemoryRegistry::new();
        assert_eq!(registry.increment_int("n", 5).await.unwrap(), 5);
        assert_eq!(registry.increment_int("n", -2).await.unwrap(), 3);
        assert_eq!(registry.increment_long("l", 1 << 33).await.unwrap(), 1 << 33);
    }

    #[tokio::test]
    async fn test_increment_overflow_is_rejected() {
        let registry = MemoryRegistry::new();
        registry.increment_int("n", i32::MAX).await.unwrap();
        assert!(matches!(
            registry.increment_int("n", 1).await,
            Err(RegistryError::Overflow { key }) if key == "n"
        ));
        assert_eq!(registry.increment_int("n", -1).await.unwrap(), i32::MAX - 1);

        registry.increment_long("l", i64::MIN).await.unwrap();
        assert!(matches!(
            registry.increment_long("l", -1).await,
            Err(RegistryError::Overflow { .. })
        ));
        assert_eq!(
            registry.get("l").await.unwrap(),
            Some(RegistryValue::Long(i64::MIN))
        );
    }

    #[tokio::test]
    async fn test_increment_type_mismatch() {
        let registry = MemoryRegistry::new();
        registry
            .put("n", RegistryValue::Text("x".into()))
            .await
            .unwrap();
        let err = registry.increment_long("n", 1).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::TypeMismatch {
                expected: "long",
                found: "text"
            }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_atomic() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    registry.increment_long("counter", 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(
            registry.get("counter").await.unwrap(),
            Some(RegistryValue::Long(2000))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_set_if_absent_single_winner() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .set_if_absent(
                        "claimed:job",
                        RegistryValue::Text(format!("instance-{i}")),
                        Duration::from_secs(30),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_after_expiry() {
        let registry = MemoryRegistry::new();
        let ttl = Duration::from_secs(2);
        assert!(registry
            .set_if_absent("claim", RegistryValue::Text("a".into()), ttl)
            .await
            .unwrap());
        assert!(!registry
            .set_if_absent("claim", RegistryValue::Text("b".into()), ttl)
            .await
            .unwrap());

        tokio::time::advance(ttl).await;
        assert!(registry
            .set_if_absent("claim", RegistryValue::Text("b".into()), ttl)
            .await
            .unwrap());
        assert_eq!(
            registry.get("claim").await.unwrap(),
            Some(RegistryValue::Text("b".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_purge() {
        let registry = MemoryRegistry::with_default_ttl(Duration::from_secs(1));
        registry.put("a", RegistryValue::Int(1)).await.unwrap();
        registry.put("b", RegistryValue::Int(2)).await.unwrap();

        assert!(registry.delete("a").await.unwrap());
        assert!(!registry.delete("a").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!registry.delete("b").await.unwrap());

        registry.put("c", RegistryValue::Int(3)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.is_empty());
    }
}
