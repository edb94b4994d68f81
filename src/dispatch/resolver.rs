//! Mapping call identifiers to targets.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rmpv::Value;

use super::{ExecutionContext, Target};
use crate::error::InvocationError;

/// Resolves the identifier of a call to the object that serves it.
pub trait ObjectResolver: Send + Sync + 'static {
    /// # Errors
    ///
    /// [`InvocationError::NoSuchTarget`] when nothing is registered under
    /// `identifier`.
    fn resolve(
        &self,
        identifier: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Arc<dyn Target>, InvocationError>;

    /// The caller dropped its handles to `identifiers`. Default: ignore.
    fn release(&self, identifiers: &[Value], ctx: &ExecutionContext) {
        let _ = (identifiers, ctx);
    }
}

/// Targets registered under string identifiers.
///
/// Release hints unregister the named targets.
#[derive(Default)]
pub struct ObjectRegistry {
    targets: RwLock<HashMap<String, Arc<dyn Target>>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target` under `identifier`, returning the target it replaced.
    pub fn register(
        &self,
        identifier: impl Into<String>,
        target: Arc<dyn Target>,
    ) -> Option<Arc<dyn Target>> {
        self.targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identifier.into(), target)
    }

    pub fn unregister(&self, identifier: &str) -> Option<Arc<dyn Target>> {
        self.targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.targets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectResolver for ObjectRegistry {
    fn resolve(
        &self,
        identifier: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Arc<dyn Target>, InvocationError> {
        identifier
            .as_str()
            .and_then(|name| {
                self.targets
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(name)
                    .cloned()
            })
            .ok_or_else(|| InvocationError::NoSuchTarget(identifier.to_string()))
    }

    fn release(&self, identifiers: &[Value], _ctx: &ExecutionContext) {
        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
        for name in identifiers.iter().filter_map(Value::as_str) {
            if targets.remove(name).is_some() {
                tracing::debug!("released {}", name);
            }
        }
    }
}
