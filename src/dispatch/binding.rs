//! Per-connection `method id -> signature` table.
//!
//! A method id is UNKNOWN until the `ExtendedRpc` that introduces it has
//! been handled, and RESOLVED from then on until [`MethodBindings::clear`].
//! A plain `Rpc` may be handled before its `ExtendedRpc` when handling runs
//! on several workers; it then waits here for the binding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::MethodSignature;
use crate::error::InvocationError;

#[derive(Debug, Default)]
pub struct MethodBindings {
    methods: RwLock<HashMap<u32, Arc<MethodSignature>>>,
    /// One wake-up primitive per unresolved id, shared by all its waiters.
    waiters: Mutex<HashMap<u32, Arc<Notify>>>,
}

impl MethodBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, method_id: u32) -> Option<Arc<MethodSignature>> {
        self.methods
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&method_id)
            .cloned()
    }

    /// Resolve `method_id` and wake everything waiting on it.
    pub fn bind(&self, method_id: u32, signature: MethodSignature) -> Arc<MethodSignature> {
        let signature = Arc::new(signature);
        self.methods
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(method_id, signature.clone());

        if let Some(waiter) = self.waiters().remove(&method_id) {
            waiter.notify_waiters();
        }
        signature
    }

    /// Wait until `method_id` is bound.
    ///
    /// The cache is re-checked on every wake-up and at least once per
    /// `poll_interval`. With `deadline` set, gives up with
    /// [`InvocationError::BindingTimeout`] once it has passed; with `None`
    /// waits without bound.
    pub async fn wait_for(
        &self,
        method_id: u32,
        poll_interval: Duration,
        deadline: Option<Duration>,
    ) -> Result<Arc<MethodSignature>, InvocationError> {
        if let Some(signature) = self.get(method_id) {
            return Ok(signature);
        }

        tracing::debug!("waiting for binding of method id {}", method_id);
        let started = Instant::now();
        let waiter = self
            .waiters()
            .entry(method_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        loop {
            let notified = waiter.notified();
            tokio::pin!(notified);
            // Registered before the re-check so a bind in between is not lost.
            notified.as_mut().enable();

            if let Some(signature) = self.get(method_id) {
                // A waiter registered after the bind leaves an entry behind.
                self.waiters().remove(&method_id);
                return Ok(signature);
            }

            let wait = match deadline {
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        self.release_waiter(method_id, &waiter);
                        return Err(InvocationError::BindingTimeout {
                            method_id,
                            waited_ms: elapsed.as_millis() as u64,
                        });
                    }
                    poll_interval.min(limit - elapsed)
                }
                None => poll_interval,
            };

            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    /// Drop the wake-up entry for `method_id` if `waiter` is its last user.
    fn release_waiter(&self, method_id: u32, waiter: &Arc<Notify>) {
        let mut waiters = self.waiters();
        let last = waiters
            .get(&method_id)
            // One count for the map, one for `waiter`.
            .is_some_and(|entry| Arc::ptr_eq(entry, waiter) && Arc::strong_count(entry) == 2);
        if last {
            waiters.remove(&method_id);
        }
    }

    /// Forget every binding (reconnect). Pending waiters keep polling.
    pub fn clear(&self) {
        self.methods
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.waiters().clear();
    }

    pub fn len(&self) -> usize {
        self.methods.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids that currently have waiters registered.
    pub fn waiting(&self) -> usize {
        self.waiters().len()
    }

    fn waiters(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<Notify>>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }
}
