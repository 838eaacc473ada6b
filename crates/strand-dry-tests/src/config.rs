// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use strand_app_core::config::{ConfigError, ConfigStore};

/// In-memory [`ConfigStore`]. Clones share state, so a test can keep one
/// handle for inspection while a `ConfigService` owns another.
///
/// ```
/// use strand_app_core::config::ConfigService;
/// use strand_app_core::prefs::SessionPrefs;
/// use strand_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// SessionPrefs::default().save(&service).unwrap();
/// assert_eq!(store.keys(), vec!["session".to_owned()]);
/// assert_eq!(store.save_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<String, Vec<u8>>,
    loads: usize,
    saves: usize,
    fail_loads: bool,
    fail_saves: bool,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`.
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        let store = Self::new();
        store.lock().data = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Makes every load fail until turned off.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_loads = fail;
    }

    /// Makes every save fail until turned off.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    /// `load_raw` attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().loads
    }

    /// `save_raw` attempts, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    /// Stored keys in ascending order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().data.keys().cloned().collect()
    }

    /// Raw bytes stored under `key`, without counting a load.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().data.get(key).cloned()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.loads += 1;
        if inner.fail_loads {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.saves += 1;
        if inner.fail_saves {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        inner.data.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use strand_app_core::config::ConfigService;
    use strand_app_core::prefs::{SessionPrefs, SESSION_PREFS_KEY};
    use strand_core::TrackingMode;

    #[test]
    fn clones_share_data_and_counters() {
        let a = InMemoryConfigStore::new();
        let b = a.clone();
        a.save_raw("k", b"v").unwrap();
        assert_eq!(b.load_raw("k").unwrap(), b"v");
        assert_eq!((a.save_count(), a.load_count()), (1, 1));
    }

    #[test]
    fn failures_still_count_and_store_nothing() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_save(true);
        assert!(matches!(store.save_raw("k", b"v"), Err(ConfigError::Other(_))));
        assert_eq!(store.save_count(), 1);
        assert!(store.keys().is_empty());

        store.set_fail_on_save(false);
        store.set_fail_on_load(true);
        store.save_raw("k", b"v").unwrap();
        assert!(store.load_raw("k").is_err());
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn prefs_load_from_prepopulated_json() {
        let json = serde_json::json!({ "tracking": "disabled", "flush_on_idle": false });
        let store = InMemoryConfigStore::with_entries([(
            SESSION_PREFS_KEY,
            serde_json::to_vec(&json).unwrap(),
        )]);
        let prefs = SessionPrefs::load(&ConfigService::new(store.clone())).unwrap();
        assert_eq!(prefs.tracking, TrackingMode::Disabled);
        assert!(!prefs.flush_on_idle);
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn load_failure_surfaces_through_service() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_load(true);
        assert!(SessionPrefs::load(&ConfigService::new(store)).is_err());
    }
}
