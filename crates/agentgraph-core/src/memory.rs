//! Run memory: process-scoped key/value document store.
//!
//! Tools use it to hand artifacts to later tools without explicit wiring
//! (e.g. the structured-output tool captions the latest `answer_*` doc).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Doc {
    value: String,
    /// Monotonic write sequence, used to find the most recent write.
    seq: u64,
}

#[derive(Default)]
pub struct Memory {
    docs: RwLock<HashMap<String, Doc>>,
    next_seq: AtomicU64,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Doc>> {
        self.docs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Doc>> {
        self.docs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put_doc(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut docs = self.write();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        docs.insert(
            key.into(),
            Doc {
                value: value.into(),
                seq,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).map(|d| d.value.clone())
    }

    /// Point-in-time copy of every document. Later writes never affect it.
    pub fn docs_snapshot(&self) -> BTreeMap<String, String> {
        self.read()
            .iter()
            .map(|(k, d)| (k.clone(), d.value.clone()))
            .collect()
    }

    /// Most recently written document whose key starts with `prefix`.
    pub fn latest_with_prefix(&self, prefix: &str) -> Option<(String, String)> {
        self.read()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .max_by_key(|(_, d)| d.seq)
            .map(|(k, d)| (k.clone(), d.value.clone()))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Timestamp-qualified key that no other call in this process returns.
    pub fn unique_key(prefix: &str) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}{}_{}",
            prefix,
            chrono::Utc::now().timestamp_millis(),
            n
        )
    }
}
