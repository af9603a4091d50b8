//! Named host-scoped mutexes.
//!
//! The registry is keyed by `(host, name)`. Acquisition blocks until the
//! current holder releases; the returned guard releases on drop, so every
//! exit path - including command failure - releases the lock.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of named mutexes, one logical lock per `(host, name)` pair.
#[derive(Default)]
pub struct HostMutexes {
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl HostMutexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock named `name` on `host`, blocking until it is
    /// free. Holders are serialized strictly in acquisition order.
    pub async fn acquire(&self, host: &str, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry((host.to_string(), name.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
