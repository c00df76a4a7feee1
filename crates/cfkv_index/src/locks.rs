//! Per-row write serialization.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use cfkv_store::TableName;
use tokio::sync::{Mutex, MutexGuard};

const ROW_LOCK_STRIPES: usize = 256;

/// Striped async locks keyed by `(table, row key)`.
///
/// A writer holds its row's stripe from the prior-value read through the
/// last index write, so two writers of one row never interleave their index
/// maintenance. Unrelated rows may share a stripe.
pub(crate) struct RowLocks {
    stripes: Vec<Mutex<()>>,
}

impl Default for RowLocks {
    fn default() -> Self {
        Self::new(ROW_LOCK_STRIPES)
    }
}

impl RowLocks {
    pub(crate) fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) async fn lock(&self, table: &TableName, key: &[u8]) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_for(table, key)].lock().await
    }

    fn stripe_for(&self, table: &TableName, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        table.as_str().hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }
}
