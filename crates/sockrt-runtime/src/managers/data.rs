//! Payload store for the sockrt runtime
//!
//! The `DataManager` holds binary payloads keyed by a random 64-bit id until
//! the web view fetches them or their TTL lapses. One mutex guards the whole
//! map, so `expire` is safe to run from the timer while handlers `put` and the
//! scheme handler `get`/`remove` from other threads.

use parking_lot::Mutex;
use serde::Serialize;
use sockrt_core::{now_millis, script, Data, DataConfig, ResourceId, Seq};
use std::collections::HashMap;
use tracing::debug;

// ----------------------------------------------------------------------------
// Data Manager
// ----------------------------------------------------------------------------

/// TTL-expiring store of payloads awaiting retrieval
pub struct DataManager {
    entries: Mutex<HashMap<u64, Data>>,
    stats: Mutex<DataStats>,
    config: DataConfig,
    scheme: String,
}

impl DataManager {
    pub fn new(config: DataConfig, scheme: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stats: Mutex::new(DataStats::default()),
            config,
            scheme: scheme.into(),
        }
    }

    /// Store `data` under `id`, stamping its TTL and replacing any previous entry
    pub fn put(&self, id: u64, mut data: Data) {
        data.id = id;
        data.ttl = now_millis() + self.config.ttl_ms;

        let replaced = self.entries.lock().insert(id, data);

        let mut stats = self.stats.lock();
        stats.stored += 1;
        if let Some(previous) = replaced {
            Self::release(&mut stats, previous);
        }
    }

    /// Payload stored under `id`, if any
    pub fn get(&self, id: u64) -> Option<Data> {
        self.entries.lock().get(&id).cloned()
    }

    pub fn has(&self, id: u64) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Erase the entry; returns whether one was present
    pub fn remove(&self, id: u64) -> bool {
        let removed = self.entries.lock().remove(&id);
        match removed {
            Some(data) => {
                let mut stats = self.stats.lock();
                stats.removed += 1;
                Self::release(&mut stats, data);
                true
            }
            None => false,
        }
    }

    /// Remove entries whose TTL lapsed; returns how many were dropped
    pub fn expire(&self) -> usize {
        self.expire_at(now_millis())
    }

    /// Remove entries whose TTL is before `now` (milliseconds since epoch)
    pub fn expire_at(&self, now: u64) -> usize {
        let expired: Vec<Data> = {
            let mut entries = self.entries.lock();
            let ids: Vec<u64> = entries
                .iter()
                .filter(|(_, data)| data.ttl < now)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };

        let count = expired.len();
        if count > 0 {
            let mut stats = self.stats.lock();
            stats.expired += count as u64;
            for data in expired {
                Self::release(&mut stats, data);
            }
            debug!("Expired {} stored payloads", count);
        }
        count
    }

    /// Remove every entry
    pub fn clear(&self) {
        let drained: Vec<Data> = self.entries.lock().drain().map(|(_, data)| data).collect();
        let mut stats = self.stats.lock();
        for data in drained {
            stats.removed += 1;
            Self::release(&mut stats, data);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Store `data` and return a script making the page fetch it from `data?id=`
    pub fn create(&self, seq: &Seq, json: &str, data: Data) -> String {
        self.create_for_route("data", seq, json, data)
    }

    /// Store `data` and return a script making the page fetch it from `<route>?id=`
    ///
    /// A payload without an id is assigned a random non-zero one.
    pub fn create_for_route(&self, route: &str, seq: &Seq, json: &str, mut data: Data) -> String {
        if data.id == 0 {
            data.id = ResourceId::random().get();
        }

        let id = data.id;
        let script = script::fetch_payload(&self.scheme, route, seq, json, id, &data.headers);
        self.put(id, data);
        script
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    /// Get payload statistics
    pub fn get_statistics(&self) -> DataStats {
        self.stats.lock().clone()
    }

    // bodies are single-owner; dropping the entry releases the body exactly once
    fn release(stats: &mut DataStats, data: Data) {
        if data.body.is_some() {
            stats.bodies_released += 1;
        }
        drop(data);
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Statistics for payload storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataStats {
    /// Number of payloads stored
    pub stored: u64,
    /// Number of payloads removed explicitly
    pub removed: u64,
    /// Number of payloads dropped by TTL
    pub expired: u64,
    /// Number of owned bodies released
    pub bodies_released: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_manager() -> DataManager {
        DataManager::new(DataConfig::default(), "ipc")
    }

    #[test]
    fn test_put_then_get_returns_payload() {
        let manager = create_test_manager();
        manager.put(7, Data::octet_stream(vec![1, 2, 3]));

        let data = manager.get(7).unwrap();
        assert_eq!(data.id, 7);
        assert_eq!(data.body.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(data.ttl >= now_millis() + 32_000);
        assert!(manager.has(7));
    }

    #[test]
    fn test_missing_id_is_absent() {
        let manager = create_test_manager();
        assert!(manager.get(99).is_none());
        assert!(!manager.has(99));
        assert!(!manager.remove(99));
    }

    #[test]
    fn test_expire_releases_body_at_most_once() {
        let manager = create_test_manager();
        manager.put(1, Data::octet_stream(vec![0; 16]));
        manager.put(2, Data::default());

        let later = now_millis() + manager.config().ttl_ms + 1;
        assert_eq!(manager.expire_at(later), 2);
        assert!(!manager.has(1));

        // neither a second sweep nor an explicit remove can release it again
        assert_eq!(manager.expire_at(later), 0);
        assert!(!manager.remove(1));

        let stats = manager.get_statistics();
        assert_eq!(stats.expired, 2);
        assert_eq!(stats.bodies_released, 1);
    }

    #[test]
    fn test_expire_keeps_fresh_entries() {
        let manager = create_test_manager();
        manager.put(1, Data::octet_stream(vec![1]));
        assert_eq!(manager.expire(), 0);
        assert!(manager.has(1));
    }

    #[test]
    fn test_put_overwrites_existing_entry() {
        let manager = create_test_manager();
        manager.put(5, Data::octet_stream(vec![1]));
        manager.put(5, Data::octet_stream(vec![2, 2]));
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get(5).unwrap().length(), 2);
        assert_eq!(manager.get_statistics().bodies_released, 1);
    }

    #[test]
    fn test_create_assigns_id_and_builds_fetch_script() {
        let manager = create_test_manager();
        let script = manager.create(&Seq::from("3"), "{}", Data::octet_stream(vec![9]));
        assert_eq!(manager.len(), 1);

        let id = manager
            .entries
            .lock()
            .keys()
            .copied()
            .next()
            .unwrap();
        assert_ne!(id, 0);
        assert!(script.contains(&format!("ipc://data?id={}", id)));
    }

    #[test]
    fn test_concurrent_put_and_expire() {
        let manager = std::sync::Arc::new(create_test_manager());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let manager = std::sync::Arc::clone(&manager);
                std::thread::spawn(move || {
                    for i in 0..250u64 {
                        manager.put(t * 1000 + i, Data::octet_stream(vec![0; 4]));
                        manager.expire();
                        manager.get(t * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(manager.len(), 1000);
    }
}
