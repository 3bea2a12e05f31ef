//! Idempotency ledger
//!
//! Maps an opaque client-supplied key to a previously created import job
//! id. The request layer consults it before creating a new job; a hit
//! short-circuits to the existing job. Entries are inserted only after the
//! job record exists. Concurrent requests with the same key may race; the
//! last insert wins, which is acceptable under the eventual-consistency
//! contract of the ledger.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

struct LedgerEntry {
    job_id: Uuid,
    inserted_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct IdempotencyLedger {
    keys: RwLock<HashMap<String, LedgerEntry>>,
}

impl IdempotencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the job id previously bound to `key`
    pub fn check(&self, key: &str) -> Option<Uuid> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|entry| entry.job_id)
    }

    /// Bind `key` to `job_id`; call only after the job record exists
    pub fn insert(&self, key: &str, job_id: Uuid) {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                LedgerEntry {
                    job_id,
                    inserted_at: Utc::now(),
                },
            );
    }

    /// Drop entries inserted more than `max_age` ago
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let before = keys.len();
        keys.retain(|_, entry| entry.inserted_at >= cutoff);
        before - keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_and_insert() {
        let ledger = IdempotencyLedger::new();
        assert!(ledger.check("k1").is_none());

        let job_id = Uuid::new_v4();
        ledger.insert("k1", job_id);
        assert_eq!(ledger.check("k1"), Some(job_id));
        assert!(ledger.check("k2").is_none());
    }

    #[test]
    fn test_last_insert_wins() {
        let ledger = IdempotencyLedger::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        ledger.insert("k1", first);
        ledger.insert("k1", second);
        assert_eq!(ledger.check("k1"), Some(second));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_cleanup_by_age() {
        let ledger = IdempotencyLedger::new();
        ledger.insert("k1", Uuid::new_v4());
        ledger.insert("k2", Uuid::new_v4());

        assert_eq!(ledger.cleanup(Duration::from_secs(3600)), 0);
        assert_eq!(ledger.len(), 2);

        assert_eq!(ledger.cleanup(Duration::from_secs(0)), 2);
        assert!(ledger.is_empty());
    }
}
