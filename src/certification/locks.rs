//! Per-batch mutual exclusion
//!
//! Every mutation of a batch (ledger write, count, eligibility check, mint,
//! flag flip) runs while holding that batch's lock. Different batches never
//! contend.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::BatchId;

/// Lazily populated table of batch locks
#[derive(Default)]
pub struct BatchLocks {
    locks: RwLock<HashMap<BatchId, Arc<Mutex<()>>>>,
}

impl BatchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a batch
    pub async fn lock_for(&self, batch_id: &BatchId) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(batch_id) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(batch_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to a batch
    pub async fn acquire(&self, batch_id: &BatchId) -> OwnedMutexGuard<()> {
        self.lock_for(batch_id).await.lock_owned().await
    }

    /// Number of batches seen
    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.read().await.is_empty()
    }
}
