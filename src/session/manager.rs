//! Session lifecycle on top of a [`SessionStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;

use crate::session::store::SessionStore;
use crate::session::{Session, SessionError, SessionStatus, short_id};

/// Warn when session count exceeds this threshold.
const SESSION_COUNT_WARNING_THRESHOLD: usize = 1000;

/// Creates, validates and expires sessions.
///
/// Besides the store, the manager keeps one async lock per session. The
/// dispatcher holds it for the duration of a forward so a client's requests
/// on one session reach the backend in the order they were issued.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    order_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Rows in the store, kept here so `create` need not list them.
    stored: AtomicUsize,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            order_locks: std::sync::Mutex::new(HashMap::new()),
            stored: AtomicUsize::new(0),
        }
    }

    /// Start a session bound to `backend_address`.
    pub async fn create(
        &self,
        adapter: &str,
        backend_address: &str,
        client_info: Option<serde_json::Value>,
    ) -> Session {
        let session = Session::new(adapter, backend_address, client_info);
        self.store.insert(session.clone()).await;

        let count = self.stored.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= SESSION_COUNT_WARNING_THRESHOLD && count % 100 == 0 {
            tracing::warn!(
                "High session count: {} sessions. Consider setting SESSION_IDLE_TIMEOUT_SECS.",
                count
            );
        }
        tracing::info!(adapter, session = short_id(&session.id), "Session created");
        session
    }

    /// Re-run initialization on an existing active session.
    ///
    /// The id is kept. The backend address is re-pinned and any id the
    /// backend issued earlier is dropped.
    pub async fn reinitialize(
        &self,
        adapter: &str,
        id: &str,
        backend_address: &str,
        client_info: Option<serde_json::Value>,
    ) -> Result<Session, SessionError> {
        self.touch_for(adapter, id).await?;
        let mut client_info = client_info;
        let session = self
            .store
            .update(id, &mut |s| {
                s.backend_address = backend_address.to_string();
                s.backend_session_id = None;
                if let Some(info) = client_info.take() {
                    s.client_info = Some(info);
                }
                s.last_activity_at = Utc::now();
            })
            .await
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        tracing::info!(adapter, session = short_id(id), "Session reinitialized");
        Ok(session)
    }

    /// Record activity on a session.
    ///
    /// Unknown ids are `NotFound`; ids that exist but were invalidated are
    /// `Invalidated`, so clients can tell "reinitialize" from "never existed".
    pub async fn touch(&self, id: &str) -> Result<Session, SessionError> {
        let mut was_active = false;
        let session = self
            .store
            .update(id, &mut |s| {
                was_active = s.is_active();
                if was_active {
                    s.last_activity_at = Utc::now();
                }
            })
            .await
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;

        if !was_active {
            return Err(SessionError::Invalidated { id: id.to_string() });
        }
        Ok(session)
    }

    /// [`touch`](Self::touch), also requiring the session to belong to `adapter`.
    ///
    /// A session of another adapter is reported as not found.
    pub async fn touch_for(&self, adapter: &str, id: &str) -> Result<Session, SessionError> {
        match self.store.get(id).await {
            Some(s) if s.adapter == adapter => self.touch(id).await,
            _ => Err(SessionError::NotFound { id: id.to_string() }),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Session, SessionError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    /// Remember the id the backend assigned on `initialize`.
    pub async fn set_backend_session(&self, id: &str, backend_session_id: &str) {
        self.store
            .update(id, &mut |s| {
                s.backend_session_id = Some(backend_session_id.to_string());
            })
            .await;
    }

    pub async fn invalidate(&self, id: &str) -> Result<Session, SessionError> {
        let session = self
            .store
            .update(id, &mut |s| s.invalidate())
            .await
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        self.drop_order_lock(id);
        tracing::info!(adapter = %session.adapter, session = short_id(id), "Session invalidated");
        Ok(session)
    }

    /// Invalidate every active session of `adapter`. Returns how many changed.
    pub async fn invalidate_all(&self, adapter: &str) -> usize {
        let mut count = 0;
        for session in self.store.list(Some(adapter)).await {
            if !session.is_active() {
                continue;
            }
            if self
                .store
                .update(&session.id, &mut |s| s.invalidate())
                .await
                .is_some()
            {
                self.drop_order_lock(&session.id);
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!(adapter, count, "Invalidated adapter sessions");
        }
        count
    }

    /// Invalidate the active sessions of `adapter` pinned to `backend_address`.
    ///
    /// Used when one backend instance goes away while a replacement may
    /// already be serving new sessions.
    pub async fn invalidate_pinned(&self, adapter: &str, backend_address: &str) -> usize {
        let mut count = 0;
        for session in self.store.list(Some(adapter)).await {
            if !session.is_active() || session.backend_address != backend_address {
                continue;
            }
            if self
                .store
                .update(&session.id, &mut |s| s.invalidate())
                .await
                .is_some()
            {
                self.drop_order_lock(&session.id);
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!(adapter, backend = backend_address, count, "Invalidated sessions of lost backend");
        }
        count
    }

    pub async fn list(&self, adapter: &str) -> Vec<Session> {
        self.store.list(Some(adapter)).await
    }

    /// Invalidate sessions idle for longer than `max_idle`, and forget
    /// sessions that have been invalidated for longer than that.
    ///
    /// Returns `(invalidated, removed)`.
    pub async fn prune_idle(&self, max_idle: Duration) -> (usize, usize) {
        let Some(cutoff) = chrono::TimeDelta::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
        else {
            return (0, 0);
        };

        let mut invalidated = 0;
        let mut removed = 0;
        for session in self.store.list(None).await {
            match session.status {
                SessionStatus::Active if session.last_activity_at < cutoff => {
                    // Re-check under the row lock; the session may have been
                    // touched since the listing.
                    let mut changed = false;
                    self.store
                        .update(&session.id, &mut |s| {
                            if s.is_active() && s.last_activity_at < cutoff {
                                s.invalidate();
                                changed = true;
                            }
                        })
                        .await;
                    if changed {
                        invalidated += 1;
                    }
                }
                SessionStatus::Invalidated
                    if session.invalidated_at.is_some_and(|at| at < cutoff) =>
                {
                    if self.store.remove(&session.id).await.is_some() {
                        self.stored.fetch_sub(1, Ordering::Relaxed);
                        self.drop_order_lock(&session.id);
                        removed += 1;
                    }
                }
                _ => {}
            }
        }

        if invalidated > 0 || removed > 0 {
            tracing::info!(
                "Pruned sessions: {} invalidated, {} removed (idle > {}s)",
                invalidated,
                removed,
                max_idle.as_secs()
            );
        }
        (invalidated, removed)
    }

    /// Run [`prune_idle`](Self::prune_idle) every `every` until the task is aborted.
    pub fn spawn_idle_sweep(
        self: Arc<Self>,
        max_idle: Duration,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.prune_idle(max_idle).await;
            }
        })
    }

    /// Lock that orders requests within one session.
    ///
    /// Callers validate the id first; entries are dropped when the session
    /// is invalidated or removed.
    pub fn order_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .order_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Sessions currently holding an ordering lock entry.
    pub fn tracked_order_locks(&self) -> usize {
        self.order_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Rows held by the store, invalidated ones included.
    pub fn stored_count(&self) -> usize {
        self.stored.load(Ordering::Relaxed)
    }

    fn drop_order_lock(&self, id: &str) {
        self.order_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
    }
}
