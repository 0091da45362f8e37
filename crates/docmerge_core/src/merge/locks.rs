//! Per-key advisory locks for merges.

use docmerge_storage::TableContext;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type LockKey = (TableContext, String);

/// One mutex per (partition, merge key) currently being merged.
///
/// Entries are dropped once no caller holds or waits for them.
#[derive(Debug, Default)]
pub(crate) struct MergeLocks {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl MergeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock of `(ctx, merge_key)`.
    pub fn with_lock<T>(&self, ctx: &TableContext, merge_key: &str, f: impl FnOnce() -> T) -> T {
        let key = (ctx.clone(), merge_key.to_string());
        let lock = Arc::clone(self.locks.lock().entry(key.clone()).or_default());

        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);

        // clones are only taken under the map lock
        let mut locks = self.locks.lock();
        if locks.get(&key).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(&key);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}
