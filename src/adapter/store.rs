//! Adapter persistence seam.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::adapter::{Adapter, AdapterError};

/// CRUD storage for adapter records.
///
/// Swapping implementations must not require changes in the dispatcher or
/// the orchestrator, which only read through this trait.
#[async_trait]
pub trait AdapterStore: Send + Sync {
    /// Insert a new record. Fails with `Exists` if the name is taken.
    async fn create(&self, adapter: Adapter) -> Result<(), AdapterError>;

    async fn get(&self, name: &str) -> Option<Adapter>;

    /// Apply `f` to the stored record and return the updated copy.
    async fn update(
        &self,
        name: &str,
        f: &mut (dyn for<'a> FnMut(&'a mut Adapter) + Send),
    ) -> Option<Adapter>;

    /// All records, sorted by name.
    async fn list(&self) -> Vec<Adapter>;

    async fn delete(&self, name: &str) -> Option<Adapter>;
}

/// Process-local store with one lock per record.
#[derive(Default)]
pub struct InMemoryAdapterStore {
    rows: RwLock<HashMap<String, Arc<Mutex<Adapter>>>>,
}

impl InMemoryAdapterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_row(row: &Mutex<Adapter>) -> std::sync::MutexGuard<'_, Adapter> {
    row.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl AdapterStore for InMemoryAdapterStore {
    async fn create(&self, adapter: Adapter) -> Result<(), AdapterError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&adapter.name) {
            return Err(AdapterError::Exists { name: adapter.name });
        }
        rows.insert(adapter.name.clone(), Arc::new(Mutex::new(adapter)));
        Ok(())
    }

    async fn get(&self, name: &str) -> Option<Adapter> {
        let row = self.rows.read().await.get(name).cloned()?;
        let adapter = lock_row(&row).clone();
        Some(adapter)
    }

    async fn update(
        &self,
        name: &str,
        f: &mut (dyn for<'a> FnMut(&'a mut Adapter) + Send),
    ) -> Option<Adapter> {
        let row = self.rows.read().await.get(name).cloned()?;
        let mut adapter = lock_row(&row);
        f(&mut adapter);
        adapter.updated_at = chrono::Utc::now();
        Some(adapter.clone())
    }

    async fn list(&self) -> Vec<Adapter> {
        let rows: Vec<Arc<Mutex<Adapter>>> = self.rows.read().await.values().cloned().collect();
        let mut adapters: Vec<Adapter> = rows.iter().map(|row| lock_row(row).clone()).collect();
        adapters.sort_by(|a, b| a.name.cmp(&b.name));
        adapters
    }

    async fn delete(&self, name: &str) -> Option<Adapter> {
        let row = self.rows.write().await.remove(name)?;
        let adapter = lock_row(&row).clone();
        Some(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterAuth, AdapterStatus, ConnectionKind};
    use chrono::Utc;

    fn adapter(name: &str) -> Adapter {
        Adapter {
            name: name.to_string(),
            kind: ConnectionKind::RemoteHttp,
            description: None,
            launch: None,
            local: None,
            remote_url: Some("http://example.com/mcp".to_string()),
            auth: AdapterAuth::None,
            env: HashMap::new(),
            status: AdapterStatus::Ready,
            status_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = InMemoryAdapterStore::new();
        store.create(adapter("a")).await.unwrap();
        assert!(matches!(
            store.create(adapter("a")).await,
            Err(AdapterError::Exists { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_list_delete() {
        let store = InMemoryAdapterStore::new();
        store.create(adapter("b")).await.unwrap();
        store.create(adapter("a")).await.unwrap();

        let updated = store
            .update("a", &mut |a| a.status = AdapterStatus::Degraded)
            .await
            .unwrap();
        assert_eq!(updated.status, AdapterStatus::Degraded);
        assert!(updated.updated_at >= updated.created_at);

        let names: Vec<String> = store.list().await.into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(store.delete("a").await.is_some());
        assert!(store.get("a").await.is_none());
        assert!(store.update("a", &mut |_| {}).await.is_none());
    }

    #[tokio::test]
    async fn test_update_closure_borrows_caller_state() {
        let store = InMemoryAdapterStore::new();
        store.create(adapter("a")).await.unwrap();

        let reason = String::from("sidecar not ready");
        let mut before = None;
        let updated = store
            .update("a", &mut |a| {
                before = Some(a.status);
                a.status_reason = Some(reason.clone());
            })
            .await
            .unwrap();
        assert_eq!(before, Some(AdapterStatus::Ready));
        assert_eq!(updated.status_reason.as_deref(), Some("sidecar not ready"));
    }

    #[test]
    fn test_empty_store_lists_nothing() {
        let store = InMemoryAdapterStore::new();
        assert!(tokio_test::block_on(store.list()).is_empty());
        assert!(tokio_test::block_on(store.get("missing")).is_none());
    }
}
