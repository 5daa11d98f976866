//! Session persistence seam.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::session::Session;

/// Storage for session records.
///
/// `update` must apply its closure atomically to one row. Implementations
/// must not make updates to different sessions wait on each other.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session);

    async fn get(&self, id: &str) -> Option<Session>;

    /// Apply `f` to the stored row and return the updated copy.
    async fn update(
        &self,
        id: &str,
        f: &mut (dyn for<'a> FnMut(&'a mut Session) + Send),
    ) -> Option<Session>;

    /// Sessions of one adapter, or of every adapter when `adapter` is `None`.
    async fn list(&self, adapter: Option<&str>) -> Vec<Session>;

    async fn remove(&self, id: &str) -> Option<Session>;
}

/// Process-local store.
///
/// The map lock is only taken for writing when rows are added or removed.
/// Each row has its own short-lived lock, so touches on different sessions
/// only share the map's read lock.
#[derive(Default)]
pub struct InMemorySessionStore {
    rows: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_row(row: &Mutex<Session>) -> std::sync::MutexGuard<'_, Session> {
    row.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: Session) {
        self.rows
            .write()
            .await
            .insert(session.id.clone(), Arc::new(Mutex::new(session)));
    }

    async fn get(&self, id: &str) -> Option<Session> {
        let row = self.rows.read().await.get(id).cloned()?;
        let session = lock_row(&row).clone();
        Some(session)
    }

    async fn update(
        &self,
        id: &str,
        f: &mut (dyn for<'a> FnMut(&'a mut Session) + Send),
    ) -> Option<Session> {
        let row = self.rows.read().await.get(id).cloned()?;
        let mut session = lock_row(&row);
        f(&mut session);
        Some(session.clone())
    }

    async fn list(&self, adapter: Option<&str>) -> Vec<Session> {
        let rows: Vec<Arc<Mutex<Session>>> = self.rows.read().await.values().cloned().collect();
        let mut sessions: Vec<Session> = rows
            .iter()
            .map(|row| lock_row(row).clone())
            .filter(|s| adapter.is_none_or(|a| s.adapter == a))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    async fn remove(&self, id: &str) -> Option<Session> {
        let row = self.rows.write().await.remove(id)?;
        let session = lock_row(&row).clone();
        Some(session)
    }
}
