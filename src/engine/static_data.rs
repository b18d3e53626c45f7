//! Workflow-scoped static data shared by runs of the same workflow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

/// Handle to one workflow's static data. Lock it to read or write.
pub type StaticDataHandle = Arc<tokio::sync::Mutex<Map<String, Value>>>;

/// Static data for every workflow this engine has run, keyed by workflow key.
///
/// Each workflow's map sits behind its own async mutex, so concurrent runs of
/// the same workflow serialize their updates instead of overwriting each other.
#[derive(Debug, Clone, Default)]
pub struct StaticDataStore {
    entries: Arc<Mutex<HashMap<String, StaticDataHandle>>>,
}

impl StaticDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for a workflow, created from `seed` on first use.
    pub fn handle(&self, key: &str, seed: Option<&Map<String, Value>>) -> StaticDataHandle {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(entries.entry(key.to_string()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(seed.cloned().unwrap_or_default()))
        }))
    }

    /// Copy of a workflow's current static data.
    pub async fn snapshot(&self, key: &str) -> Option<Map<String, Value>> {
        let handle = {
            let entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.get(key).cloned()
        }?;
        let data = handle.lock().await;
        Some(data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_seed_applies_only_once() {
        let store = StaticDataStore::new();
        let mut seed = Map::new();
        seed.insert("count".into(), json!(1));

        let handle = store.handle("wf", Some(&seed));
        handle.lock().await.insert("count".into(), json!(2));

        // A second seed does not reset existing data.
        let again = store.handle("wf", Some(&Map::new()));
        assert_eq!(again.lock().await.get("count"), Some(&json!(2)));
        assert!(store.snapshot("other").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let store = StaticDataStore::new();
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let handle = store.handle("wf", None);
            tasks.push(tokio::spawn(async move {
                let mut data = handle.lock().await;
                let current = data.get("n").and_then(Value::as_i64).unwrap_or(0);
                tokio::task::yield_now().await;
                data.insert("n".into(), json!(current + 1));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let snapshot = store.snapshot("wf").await.unwrap();
        assert_eq!(snapshot.get("n"), Some(&json!(20)));
    }
}
