//! In-memory [`ResourceApi`] for tests and local experiments.
//!
//! Behaves like the API server where the operator cares: resource versions
//! guard updates, creates collide on existing names, status writes only
//! touch the status stanza. Faults can be queued per verb to exercise error
//! paths, and every call is logged.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::{
    api::core::v1::{PersistentVolumeClaim, Pod},
    apimachinery::pkg::apis::meta::v1::Time,
};

use crate::{
    cluster::{Cluster, ManagedResource, ObjectKey, ResourceApi},
    crd::Workspace,
    error::ClusterError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Replace,
    ReplaceStatus,
    Delete,
    List,
}

struct Store<K> {
    objects: BTreeMap<ObjectKey, K>,
    version: u64,
    faults: HashMap<Verb, VecDeque<ClusterError>>,
    log: Vec<(Verb, Option<ObjectKey>)>,
}

pub struct MemoryApi<K> {
    store: Mutex<Store<K>>,
}

impl<K: ManagedResource> Default for MemoryApi<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ManagedResource> MemoryApi<K> {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store {
                objects: BTreeMap::new(),
                version: 0,
                faults: HashMap::new(),
                log: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store<K>> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store an object as-is, bypassing existence checks.
    pub fn insert(&self, mut obj: K) {
        let mut store = self.lock();
        store.version += 1;
        obj.meta_mut().resource_version = Some(store.version.to_string());
        store.objects.insert(ObjectKey::of(&obj), obj);
    }

    pub fn snapshot(&self, key: &ObjectKey) -> Option<K> {
        self.lock().objects.get(key).cloned()
    }

    /// Drop an object without going through `delete`.
    pub fn remove(&self, key: &ObjectKey) -> Option<K> {
        self.lock().objects.remove(key)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Out-of-band mutation, as another writer would do. Bumps the resource
    /// version so holders of the old copy will conflict.
    pub fn modify(&self, key: &ObjectKey, f: impl FnOnce(&mut K)) -> bool {
        let mut store = self.lock();
        store.version += 1;
        let version = store.version.to_string();
        match store.objects.get_mut(key) {
            Some(obj) => {
                f(obj);
                obj.meta_mut().resource_version = Some(version);
                true
            }
            None => false,
        }
    }

    /// Make the next call of `verb` fail with `err`. Faults queue up.
    pub fn fail_next(&self, verb: Verb, err: ClusterError) {
        self.lock().faults.entry(verb).or_default().push_back(err);
    }

    pub fn calls(&self, verb: Verb) -> usize {
        self.lock().log.iter().filter(|(v, _)| *v == verb).count()
    }

    pub fn call_log(&self) -> Vec<(Verb, Option<ObjectKey>)> {
        self.lock().log.clone()
    }

    fn enter(&self, verb: Verb, key: Option<&ObjectKey>) -> Result<MutexGuard<'_, Store<K>>, ClusterError> {
        let mut store = self.lock();
        store.log.push((verb, key.cloned()));
        let fault = store.faults.get_mut(&verb).and_then(VecDeque::pop_front);
        match fault {
            Some(err) => Err(err),
            None => Ok(store),
        }
    }
}

fn not_found<K: ManagedResource>(key: &ObjectKey) -> ClusterError {
    ClusterError::NotFound {
        kind: K::KIND,
        key: key.clone(),
    }
}

fn check_version<K: ManagedResource>(stored: &K, incoming: &K, key: &ObjectKey) -> Result<(), ClusterError> {
    match &incoming.meta().resource_version {
        Some(rv) if Some(rv) != stored.meta().resource_version.as_ref() => Err(ClusterError::Conflict {
            kind: K::KIND,
            key: key.clone(),
            message: format!(
                "the object has been modified; expected version {:?}, got {rv}",
                stored.meta().resource_version
            ),
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl<K: ManagedResource> ResourceApi<K> for MemoryApi<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K, ClusterError> {
        let store = self.enter(Verb::Get, Some(key))?;
        store.objects.get(key).cloned().ok_or_else(|| not_found::<K>(key))
    }

    async fn create(&self, obj: &K) -> Result<K, ClusterError> {
        let key = ObjectKey::of(obj);
        let mut store = self.enter(Verb::Create, Some(&key))?;
        if store.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists { kind: K::KIND, key });
        }
        store.version += 1;
        let mut created = obj.clone();
        let meta = created.meta_mut();
        meta.resource_version = Some(store.version.to_string());
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.creation_timestamp = Some(Time(Utc::now()));
        store.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn replace(&self, obj: &K) -> Result<K, ClusterError> {
        let key = ObjectKey::of(obj);
        let mut store = self.enter(Verb::Replace, Some(&key))?;
        let stored = store.objects.get(&key).cloned().ok_or_else(|| not_found::<K>(&key))?;
        check_version(&stored, obj, &key)?;

        store.version += 1;
        let mut updated = obj.clone();
        updated.copy_status_from(&stored);
        let meta = updated.meta_mut();
        meta.resource_version = Some(store.version.to_string());
        meta.uid = stored.meta().uid.clone();
        meta.creation_timestamp = stored.meta().creation_timestamp.clone();
        store.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn replace_status(&self, obj: &K) -> Result<K, ClusterError> {
        let key = ObjectKey::of(obj);
        let mut store = self.enter(Verb::ReplaceStatus, Some(&key))?;
        let mut updated = store.objects.get(&key).cloned().ok_or_else(|| not_found::<K>(&key))?;
        check_version(&updated, obj, &key)?;

        store.version += 1;
        updated.copy_status_from(obj);
        updated.meta_mut().resource_version = Some(store.version.to_string());
        store.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        let mut store = self.enter(Verb::Delete, Some(key))?;
        store.objects.remove(key).map(|_| ()).ok_or_else(|| not_found::<K>(key))
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>, ClusterError> {
        let store = self.enter(Verb::List, None)?;
        Ok(store.objects.keys().cloned().collect())
    }
}

/// A whole fake cluster, with typed handles kept for assertions.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    pub workspaces: Arc<MemoryApi<Workspace>>,
    pub pods: Arc<MemoryApi<Pod>>,
    pub pvcs: Arc<MemoryApi<PersistentVolumeClaim>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster(&self) -> Cluster {
        Cluster {
            workspaces: self.workspaces.clone(),
            pods: self.pods.clone(),
            pvcs: self.pvcs.clone(),
        }
    }
}
