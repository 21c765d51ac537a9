//! Session-scoped eligibility marker that survives the thank-you navigation.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::eligibility::EligibilityRecord;
use crate::host::SessionStorage;

pub struct EligibilityStore<'a> {
    key: &'a str,
    ttl_ms: i64,
}

impl<'a> EligibilityStore<'a> {
    pub fn new(key: &'a str, ttl_ms: i64) -> Self {
        Self { key, ttl_ms }
    }

    /// Writes the marker. Storage failures are logged and swallowed.
    pub fn persist<S: SessionStorage + ?Sized>(&self, storage: &mut S, record: &EligibilityRecord) {
        let payload = match serde_json::to_string(record) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "unable to serialize eligibility marker");
                return;
            }
        };

        info!(key = self.key, payload = %payload, "persisting eligibility marker");
        if let Err(err) = storage.set_item(self.key, &payload) {
            warn!(key = self.key, error = %err, "failed to persist eligibility marker");
        }
    }

    /// Reads and deletes the marker, returning it only when it parses and is
    /// within the TTL. The key is removed whatever the outcome.
    pub fn consume_if_fresh<S: SessionStorage + ?Sized>(
        &self,
        storage: &mut S,
        now_ms: i64,
    ) -> Option<EligibilityRecord> {
        let raw = match storage.get_item(self.key) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => {
                debug!(key = self.key, "no eligibility marker found");
                return None;
            }
            Err(err) => {
                warn!(key = self.key, error = %err, "error reading eligibility marker");
                self.clear(storage);
                return None;
            }
        };

        let record = self.parse_fresh(&raw, now_ms);
        self.clear(storage);
        record
    }

    fn parse_fresh(&self, raw: &str, now_ms: i64) -> Option<EligibilityRecord> {
        let parsed: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(key = self.key, error = %err, "discarding unparseable eligibility marker");
                return None;
            }
        };

        let Some(matched_at) = parsed.get("matchedAt").and_then(Value::as_f64) else {
            info!(key = self.key, raw = %raw, "eligibility marker has no timestamp");
            return None;
        };

        let age_ms = now_ms - matched_at as i64;
        let is_fresh = age_ms <= self.ttl_ms;
        info!(key = self.key, age_ms, is_fresh, "eligibility marker read");
        if !is_fresh {
            return None;
        }

        match serde_json::from_value::<EligibilityRecord>(parsed) {
            Ok(record) => Some(record),
            Err(_) => Some(EligibilityRecord {
                matched_at: matched_at as i64,
                prefill_postcode: String::new(),
                prefill_first_name: String::new(),
                prefill_answers: Default::default(),
            }),
        }
    }

    fn clear<S: SessionStorage + ?Sized>(&self, storage: &mut S) {
        if let Err(err) = storage.remove_item(self.key) {
            warn!(key = self.key, error = %err, "error clearing eligibility marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostError;
    use std::collections::HashMap;

    const KEY: &str = "solar_optly_eligible_submission";
    const TTL: i64 = 30 * 60 * 1000;

    #[derive(Default)]
    struct MapStorage {
        items: HashMap<String, String>,
        fail_writes: bool,
    }

    impl SessionStorage for MapStorage {
        fn get_item(&self, key: &str) -> Result<Option<String>, HostError> {
            Ok(self.items.get(key).cloned())
        }

        fn set_item(&mut self, key: &str, value: &str) -> Result<(), HostError> {
            if self.fail_writes {
                return Err(HostError::QuotaExceeded);
            }
            self.items.insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove_item(&mut self, key: &str) -> Result<(), HostError> {
            self.items.remove(key);
            Ok(())
        }
    }

    fn record(matched_at: i64) -> EligibilityRecord {
        EligibilityRecord {
            matched_at,
            prefill_postcode: "SW1A1AA".to_string(),
            prefill_first_name: "Ada".to_string(),
            prefill_answers: Default::default(),
        }
    }

    #[test]
    fn consume_is_single_use() {
        let store = EligibilityStore::new(KEY, TTL);
        let mut storage = MapStorage::default();
        store.persist(&mut storage, &record(1_000));

        assert_eq!(store.consume_if_fresh(&mut storage, 2_000), Some(record(1_000)));
        assert_eq!(store.consume_if_fresh(&mut storage, 2_000), None);
    }

    #[test]
    fn stale_marker_is_deleted_and_not_returned() {
        let store = EligibilityStore::new(KEY, TTL);
        let mut storage = MapStorage::default();
        let now = 10_000_000;
        store.persist(&mut storage, &record(now - 31 * 60 * 1000));

        assert_eq!(store.consume_if_fresh(&mut storage, now), None);
        assert!(storage.items.is_empty());
    }

    #[test]
    fn marker_exactly_at_ttl_is_fresh() {
        let store = EligibilityStore::new(KEY, TTL);
        let mut storage = MapStorage::default();
        store.persist(&mut storage, &record(0));
        assert!(store.consume_if_fresh(&mut storage, TTL).is_some());
    }

    #[test]
    fn corrupt_marker_is_deleted() {
        let store = EligibilityStore::new(KEY, TTL);
        let mut storage = MapStorage::default();
        storage.items.insert(KEY.to_string(), "{not json".to_string());

        assert_eq!(store.consume_if_fresh(&mut storage, 0), None);
        assert!(storage.items.is_empty());
    }

    #[test]
    fn marker_without_numeric_timestamp_is_rejected() {
        let store = EligibilityStore::new(KEY, TTL);
        let mut storage = MapStorage::default();
        storage
            .items
            .insert(KEY.to_string(), r#"{"matchedAt":"yesterday"}"#.to_string());

        assert_eq!(store.consume_if_fresh(&mut storage, 0), None);
        assert!(storage.items.is_empty());
    }

    #[test]
    fn write_failures_are_swallowed() {
        let store = EligibilityStore::new(KEY, TTL);
        let mut storage = MapStorage {
            fail_writes: true,
            ..MapStorage::default()
        };
        store.persist(&mut storage, &record(0));
        assert!(storage.items.is_empty());
    }
}
