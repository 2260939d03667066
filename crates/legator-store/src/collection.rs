//! One typed collection: CRUD with optimistic concurrency, a status
//! subresource, and broadcast change watches.

use crate::{Resource, StoreError, StoreResult};
use chrono::Utc;
use legator_types::meta::NamespacedName;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

/// A change event emitted to watchers.
#[derive(Debug, Clone)]
pub enum WatchEvent<R> {
    Added(R),
    Modified(R),
    Deleted(R),
}

/// Capacity of the watch broadcast ring. Slow watchers observe a `Lagged`
/// error and must relist, mirroring watch-stream resumption against a real
/// cluster API.
const WATCH_BUFFER: usize = 256;

/// A typed collection of objects keyed by `namespace/name`.
pub struct Collection<R: Resource> {
    objects: RwLock<HashMap<NamespacedName, R>>,
    next_version: AtomicU64,
    watch_tx: broadcast::Sender<WatchEvent<R>>,
}

impl<R: Resource> Default for Collection<R> {
    fn default() -> Self {
        let (watch_tx, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            objects: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            watch_tx,
        }
    }
}

impl<R: Resource> Collection<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Persist a new object. Assigns its first resource version and creation
    /// timestamp. Fails if the key already exists.
    pub fn create(&self, mut obj: R) -> StoreResult<R> {
        let key = obj.meta().key();
        let mut map = self.objects.write().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: R::KIND,
                key: key.to_string(),
            });
        }
        obj.meta_mut().resource_version = self.bump();
        obj.meta_mut().creation_timestamp = Some(Utc::now());
        map.insert(key.clone(), obj.clone());
        drop(map);
        debug!(kind = R::KIND, key = %key, "object created");
        let _ = self.watch_tx.send(WatchEvent::Added(obj.clone()));
        Ok(obj)
    }

    pub fn get(&self, key: &NamespacedName) -> StoreResult<R> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: R::KIND,
                key: key.to_string(),
            })
    }

    /// List every object, in unspecified order.
    pub fn list(&self) -> Vec<R> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace an object. The write must carry the current resource version;
    /// a stale version is rejected with `Conflict` so the caller re-reads.
    pub fn update(&self, mut obj: R) -> StoreResult<R> {
        let key = obj.meta().key();
        let mut map = self.objects.write().unwrap_or_else(|e| e.into_inner());
        let current = map.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: R::KIND,
            key: key.to_string(),
        })?;
        let current_version = current.meta().resource_version;
        if obj.meta().resource_version != current_version {
            return Err(StoreError::Conflict {
                kind: R::KIND,
                key: key.to_string(),
                stale: obj.meta().resource_version,
                current: current_version,
            });
        }
        obj.meta_mut().resource_version = self.bump();
        map.insert(key, obj.clone());
        drop(map);
        let _ = self.watch_tx.send(WatchEvent::Modified(obj.clone()));
        Ok(obj)
    }

    /// Mutate an object's status subresource in place, under the store lock.
    ///
    /// The closure sees the latest object, so status writes never conflict
    /// with concurrent spec edits. Returns the stored result.
    pub fn update_status(
        &self,
        key: &NamespacedName,
        mutate: impl FnOnce(&mut R),
    ) -> StoreResult<R> {
        let mut map = self.objects.write().unwrap_or_else(|e| e.into_inner());
        let obj = map.get_mut(key).ok_or_else(|| StoreError::NotFound {
            kind: R::KIND,
            key: key.to_string(),
        })?;
        mutate(obj);
        obj.meta_mut().resource_version = self.bump();
        let updated = obj.clone();
        drop(map);
        let _ = self.watch_tx.send(WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    pub fn delete(&self, key: &NamespacedName) -> StoreResult<R> {
        let mut map = self.objects.write().unwrap_or_else(|e| e.into_inner());
        let removed = map.remove(key).ok_or_else(|| StoreError::NotFound {
            kind: R::KIND,
            key: key.to_string(),
        })?;
        drop(map);
        debug!(kind = R::KIND, key = %key, "object deleted");
        let _ = self.watch_tx.send(WatchEvent::Deleted(removed.clone()));
        Ok(removed)
    }

    /// Subscribe to change events. Events emitted before the call are not
    /// replayed; watchers list first, then watch.
    pub fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.watch_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legator_types::agent::{Agent, AgentSpec, AgentStatus};
    use legator_types::meta::ObjectMeta;

    fn make_agent(name: &str) -> Agent {
        Agent {
            meta: ObjectMeta::new("default", name),
            spec: AgentSpec {
                description: "test agent".into(),
                emoji: String::new(),
                schedule: Default::default(),
                model: Default::default(),
                skills: vec![],
                capabilities: None,
                guardrails: Default::default(),
                reporting: None,
                environment_ref: "env".into(),
                paused: false,
            },
            status: AgentStatus::default(),
        }
    }

    #[test]
    fn create_get_roundtrip() {
        let col = Collection::<Agent>::new();
        let created = col.create(make_agent("a1")).unwrap();
        assert!(created.meta.resource_version > 0);
        assert!(created.meta.creation_timestamp.is_some());

        let fetched = col.get(&NamespacedName::new("default", "a1")).unwrap();
        assert_eq!(fetched.meta.resource_version, created.meta.resource_version);
    }

    #[test]
    fn create_duplicate_rejected() {
        let col = Collection::<Agent>::new();
        col.create(make_agent("a1")).unwrap();
        let err = col.create(make_agent("a1")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn update_requires_current_version() {
        let col = Collection::<Agent>::new();
        let mut obj = col.create(make_agent("a1")).unwrap();
        obj.spec.description = "edited".into();
        let updated = col.update(obj.clone()).unwrap();
        assert!(updated.meta.resource_version > obj.meta.resource_version);

        // Writing the stale copy again must conflict.
        let err = col.update(obj).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn update_status_never_conflicts() {
        let col = Collection::<Agent>::new();
        let created = col.create(make_agent("a1")).unwrap();
        let key = created.meta.key();

        let updated = col
            .update_status(&key, |a| a.status.run_count += 1)
            .unwrap();
        assert_eq!(updated.status.run_count, 1);
        assert!(updated.meta.resource_version > created.meta.resource_version);
    }

    #[test]
    fn delete_then_get_not_found() {
        let col = Collection::<Agent>::new();
        col.create(make_agent("a1")).unwrap();
        let key = NamespacedName::new("default", "a1");
        col.delete(&key).unwrap();
        assert!(matches!(
            col.get(&key).unwrap_err(),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            col.delete(&key).unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn watch_sees_lifecycle() {
        let col = Collection::<Agent>::new();
        let mut rx = col.watch();

        col.create(make_agent("a1")).unwrap();
        let key = NamespacedName::new("default", "a1");
        col.update_status(&key, |a| a.status.run_count = 3).unwrap();
        col.delete(&key).unwrap();

        assert!(matches!(rx.recv().await.unwrap(), WatchEvent::Added(_)));
        match rx.recv().await.unwrap() {
            WatchEvent::Modified(a) => assert_eq!(a.status.run_count, 3),
            other => panic!("expected Modified, got {other:?}"),
        }
        assert!(matches!(rx.recv().await.unwrap(), WatchEvent::Deleted(_)));
    }
}
