use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-scenario write serialization. Holding the guard gives exclusive right
/// to modify or execute against one scenario's snapshot.
#[derive(Debug, Default)]
pub struct ScenarioLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub type ScenarioGuard = OwnedMutexGuard<()>;

impl ScenarioLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, scenario_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(scenario_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn acquire(&self, scenario_id: &str) -> ScenarioGuard {
        self.slot(scenario_id).lock_owned().await
    }

    pub fn try_acquire(&self, scenario_id: &str) -> Option<ScenarioGuard> {
        self.slot(scenario_id).try_lock_owned().ok()
    }

    /// Drops the slot of a deleted scenario.
    pub fn forget(&self, scenario_id: &str) {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(scenario_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_scenario_is_exclusive() {
        let locks = ScenarioLocks::new();
        let guard = locks.acquire("a").await;
        assert!(locks.try_acquire("a").is_none());
        assert!(locks.try_acquire("b").is_some());
        drop(guard);
        assert!(locks.try_acquire("a").is_some());
    }
}
