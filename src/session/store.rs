//! In-memory session store.
//!
//! Concurrent map of session records plus a container-id index. Calls within
//! one session are serialized by the engine's contract; the maps only have
//! to survive concurrent access from independent sessions. No method holds a
//! map guard across an await point.

use crate::session::{ContainerMeta, Session, SessionConfig};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

pub(crate) struct SessionRecord {
    pub config: SessionConfig,
    pub current: Option<ContainerMeta>,
    pub history: Vec<ContainerMeta>,
    pub idle_retained: Vec<ContainerMeta>,
    pub created_at: DateTime<Utc>,
}

/// Concurrent in-memory session table.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionRecord>,
    by_container: DashMap<String, String>,
}

impl SessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a session id is present.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Insert a new session. Returns `false` if the id already exists.
    pub fn insert(&self, session_id: &str, config: SessionConfig) -> bool {
        if self.sessions.contains_key(session_id) {
            return false;
        }
        self.sessions.insert(
            session_id.to_string(),
            SessionRecord {
                config,
                current: None,
                history: Vec::new(),
                idle_retained: Vec::new(),
                created_at: Utc::now(),
            },
        );
        debug!("Registered session {}", session_id);
        true
    }

    /// The configuration a session was created with.
    pub fn config(&self, session_id: &str) -> Option<SessionConfig> {
        self.sessions.get(session_id).map(|r| r.config.clone())
    }

    /// Metadata of the session's current container.
    pub fn current_meta(&self, session_id: &str) -> Option<ContainerMeta> {
        self.sessions
            .get(session_id)
            .and_then(|r| r.current.clone())
    }

    /// Bind a container to the session and record it in the history.
    ///
    /// The history append is idempotent on container id; rebinding a
    /// retained container does not duplicate its entry.
    pub fn set_current(&self, session_id: &str, meta: ContainerMeta) {
        if let Some(mut record) = self.sessions.get_mut(session_id) {
            self.by_container
                .insert(meta.container_id.clone(), session_id.to_string());
            if !record
                .history
                .iter()
                .any(|m| m.container_id == meta.container_id)
            {
                record.history.push(meta.clone());
            }
            record.current = Some(meta);
        }
    }

    /// Detach the current container from the session, returning its meta.
    ///
    /// The container-id index entry is kept; pair with [`forget_container`]
    /// when the container is being removed (metadata removal is atomic with
    /// de-registration).
    pub fn take_current(&self, session_id: &str) -> Option<ContainerMeta> {
        self.sessions
            .get_mut(session_id)
            .and_then(|mut r| r.current.take())
    }

    /// Drop the container-id index entry for a removed container.
    pub fn forget_container(&self, container_id: &str) {
        self.by_container.remove(container_id);
    }

    /// The session a container belongs to.
    pub fn session_for_container(&self, container_id: &str) -> Option<String> {
        self.by_container.get(container_id).map(|s| s.clone())
    }

    /// Metadata for a container, looked up by container id.
    pub fn meta_for_container(&self, container_id: &str) -> Option<ContainerMeta> {
        let session_id = self.session_for_container(container_id)?;
        let record = self.sessions.get(&session_id)?;
        record
            .current
            .as_ref()
            .filter(|m| m.container_id == container_id)
            .or_else(|| {
                record
                    .idle_retained
                    .iter()
                    .find(|m| m.container_id == container_id)
            })
            .or_else(|| {
                record
                    .history
                    .iter()
                    .find(|m| m.container_id == container_id)
            })
            .cloned()
    }

    /// Apply a mutation to a container's metadata wherever it is held
    /// (current binding, idle-retained list, and history entry).
    pub fn update_meta<F>(&self, container_id: &str, mutate: F)
    where
        F: Fn(&mut ContainerMeta),
    {
        let Some(session_id) = self.session_for_container(container_id) else {
            return;
        };
        if let Some(mut record) = self.sessions.get_mut(&session_id) {
            let record = record.value_mut();
            if let Some(meta) = record
                .current
                .as_mut()
                .filter(|m| m.container_id == container_id)
            {
                mutate(meta);
            }
            if let Some(meta) = record
                .idle_retained
                .iter_mut()
                .find(|m| m.container_id == container_id)
            {
                mutate(meta);
            }
            if let Some(meta) = record
                .history
                .iter_mut()
                .find(|m| m.container_id == container_id)
            {
                mutate(meta);
            }
        }
    }

    /// Toggle a container's running flag, stamping `last_executed_at`
    /// whenever a run begins.
    pub fn set_running(&self, container_id: &str, is_running: bool) {
        let now = Utc::now();
        self.update_meta(container_id, |meta| {
            meta.is_running = is_running;
            if is_running {
                meta.last_executed_at = Some(now);
            }
        });
    }

    /// Park a container on the session's idle-retained list.
    pub fn push_idle_retained(&self, session_id: &str, meta: ContainerMeta) {
        if let Some(mut record) = self.sessions.get_mut(session_id) {
            debug!(
                "Retaining idle container {} for session {}",
                meta.container_name, session_id
            );
            record.idle_retained.push(meta);
        }
    }

    /// Take an idle-retained container whose image matches, if any.
    pub fn take_idle_retained_matching(
        &self,
        session_id: &str,
        image: &str,
    ) -> Option<ContainerMeta> {
        let mut record = self.sessions.get_mut(session_id)?;
        let idx = record
            .idle_retained
            .iter()
            .position(|m| crate::container::images_match(&m.image, image))?;
        Some(record.idle_retained.remove(idx))
    }

    /// Take every idle-retained container of a session.
    pub fn drain_idle_retained(&self, session_id: &str) -> Vec<ContainerMeta> {
        self.sessions
            .get_mut(session_id)
            .map(|mut r| std::mem::take(&mut r.idle_retained))
            .unwrap_or_default()
    }

    /// Remove a session, returning its final state for teardown.
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        let (_, record) = self.sessions.remove(session_id)?;
        for meta in record
            .current
            .iter()
            .chain(record.idle_retained.iter())
            .chain(record.history.iter())
        {
            self.by_container.remove(&meta.container_id);
        }
        debug!("Removed session {}", session_id);
        Some(Self::snapshot_record(session_id, &record))
    }

    /// All registered session ids.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Point-in-time view of a session.
    pub fn snapshot(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .get(session_id)
            .map(|r| Self::snapshot_record(session_id, &r))
    }

    fn snapshot_record(session_id: &str, record: &SessionRecord) -> Session {
        let created_at = record
            .history
            .iter()
            .map(|m| m.created_at)
            .min()
            .unwrap_or(record.created_at);
        let last_executed_at = record
            .history
            .iter()
            .filter_map(|m| m.last_executed_at)
            .max();
        let is_active = record
            .current
            .as_ref()
            .map(|m| m.is_running)
            .unwrap_or(false);

        Session {
            session_id: session_id.to_string(),
            config: record.config.clone(),
            container: record.current.clone(),
            container_history: record.history.clone(),
            idle_retained: record.idle_retained.clone(),
            created_at,
            last_executed_at,
            is_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PlacementStrategy, SessionConfig};

    fn meta(session: &str, cid: &str, image: &str) -> ContainerMeta {
        ContainerMeta::new(
            session,
            cid,
            format!("codebox-{}", cid),
            image,
            format!("/tmp/codebox-workspaces/{}", cid).into(),
        )
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let store = SessionStore::new();
        assert!(store.insert("s1", SessionConfig::new(PlacementStrategy::PerSession)));
        assert!(!store.insert("s1", SessionConfig::new(PlacementStrategy::Pool)));
        assert_eq!(
            store.config("s1").unwrap().strategy,
            PlacementStrategy::PerSession
        );
    }

    #[test]
    fn test_history_append_idempotent_on_container_id() {
        let store = SessionStore::new();
        store.insert("s1", SessionConfig::new(PlacementStrategy::PerSession));

        let m = meta("s1", "c1", "alpine:latest");
        store.set_current("s1", m.clone());
        store.take_current("s1");
        store.set_current("s1", m);

        let snapshot = store.snapshot("s1").unwrap();
        assert_eq!(snapshot.container_history.len(), 1);
    }

    #[test]
    fn test_update_meta_reaches_history() {
        let store = SessionStore::new();
        store.insert("s1", SessionConfig::new(PlacementStrategy::PerSession));
        store.set_current("s1", meta("s1", "c1", "alpine:latest"));

        store.update_meta("c1", |m| m.deps_installed = true);

        let snapshot = store.snapshot("s1").unwrap();
        assert!(snapshot.container.unwrap().deps_installed);
        assert!(snapshot.container_history[0].deps_installed);
    }

    #[test]
    fn test_set_running_stamps_start_time() {
        let store = SessionStore::new();
        store.insert("s1", SessionConfig::new(PlacementStrategy::PerSession));
        store.set_current("s1", meta("s1", "c1", "alpine:latest"));

        store.set_running("c1", true);
        let active = store.snapshot("s1").unwrap();
        assert!(active.is_active);
        assert!(active.last_executed_at.is_some());

        store.set_running("c1", false);
        let idle = store.snapshot("s1").unwrap();
        assert!(!idle.is_active);
        assert!(idle.last_executed_at.is_some(), "stamp survives run end");
    }

    #[test]
    fn test_idle_retained_matching_by_image() {
        let store = SessionStore::new();
        store.insert("s1", SessionConfig::new(PlacementStrategy::PerSession));

        store.push_idle_retained("s1", meta("s1", "c1", "python:3.9-slim"));
        store.push_idle_retained("s1", meta("s1", "c2", "alpine:latest"));

        let hit = store
            .take_idle_retained_matching("s1", "docker.io/library/alpine:latest")
            .unwrap();
        assert_eq!(hit.container_id, "c2");
        assert!(store.take_idle_retained_matching("s1", "alpine:latest").is_none());
        assert_eq!(store.drain_idle_retained("s1").len(), 1);
    }

    #[test]
    fn test_remove_clears_container_index() {
        let store = SessionStore::new();
        store.insert("s1", SessionConfig::new(PlacementStrategy::PerSession));
        store.set_current("s1", meta("s1", "c1", "alpine:latest"));
        assert_eq!(store.session_for_container("c1").as_deref(), Some("s1"));

        let removed = store.remove("s1").unwrap();
        assert_eq!(removed.container_history.len(), 1);
        assert!(store.session_for_container("c1").is_none());
        assert!(!store.contains("s1"));
    }

    #[test]
    fn test_snapshot_created_at_uses_earliest_container() {
        let store = SessionStore::new();
        store.insert("s1", SessionConfig::new(PlacementStrategy::PerSession));

        let mut early = meta("s1", "c1", "alpine:latest");
        early.created_at = Utc::now() - chrono::Duration::hours(2);
        store.set_current("s1", early.clone());
        store.take_current("s1");
        store.set_current("s1", meta("s1", "c2", "alpine:latest"));

        let snapshot = store.snapshot("s1").unwrap();
        assert_eq!(snapshot.created_at, early.created_at);
        assert_eq!(snapshot.container_history.len(), 2);
    }
}
