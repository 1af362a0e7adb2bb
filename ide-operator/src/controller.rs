//! Work queue and worker pool feeding the [`Reconciler`].
//!
//! Keys reach the queue from watch events, from the periodic resync and from
//! requeues after failures. The queue guarantees a key is never reconciled
//! by two workers at once: a key added while it is being processed is parked
//! as dirty and queued again once the worker calls [`WorkQueue::done`].

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Client,
};
use tokio::{sync::Notify, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    cluster::{with_timeout, Cluster, ManagedResource, ObjectKey, ResourceApi, GET_TIMEOUT},
    config::OperatorConfig,
    crd::Workspace,
    error::ClusterError,
    provision::APP_LABEL,
    reconciler::{Action, Reconciler},
};

const BACKOFF_BASE: Duration = Duration::from_millis(5);
const BACKOFF_MAX: Duration = Duration::from_secs(1000);

/// Delay before the `failures`-th retry of a key: 5ms doubling per
/// consecutive failure, capped at 1000s.
pub fn backoff_for(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    BACKOFF_BASE.saturating_mul(1u32 << exponent).min(BACKOFF_MAX)
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    ready: Notify,
}

/// Deduplicating FIFO of workspace keys.
#[derive(Clone, Default)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.ready.notify_one();
    }

    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Requeue after a failure, backing off per consecutive failure.
    pub fn add_rate_limited(&self, key: ObjectKey) {
        let failures = {
            let mut state = self.lock();
            let count = state.failures.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.add_after(key, backoff_for(failures));
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &ObjectKey) {
        self.lock().failures.remove(key);
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Waits for the next key and marks it as processing. `None` once the
    /// queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Marks `key` as no longer processing, queueing it again if it was
    /// added in the meantime.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.shared.ready.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.shared.ready.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Workspace,
    Pod,
    PersistentVolumeClaim,
}

/// Something happened to an object of `kind` named `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: ResourceKind,
    pub key: ObjectKey,
}

/// Only workspace events trigger reconciliation. Changes to the Pods and
/// PVCs the operator creates, including ones it makes itself, are ignored.
pub fn admits(event: &WatchEvent) -> bool {
    match event.kind {
        ResourceKind::Workspace => true,
        ResourceKind::Pod | ResourceKind::PersistentVolumeClaim => false,
    }
}

#[derive(Clone)]
pub struct Controller {
    reconciler: Reconciler,
    workspaces: Arc<dyn ResourceApi<Workspace>>,
    queue: WorkQueue,
    config: OperatorConfig,
}

impl Controller {
    pub fn new(cluster: Cluster, config: OperatorConfig) -> Self {
        Self {
            reconciler: Reconciler::new(cluster.clone(), config.mode),
            workspaces: cluster.workspaces,
            queue: WorkQueue::new(),
            config,
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Enqueue the event's key if the predicates admit it.
    pub fn handle_event(&self, event: WatchEvent) -> bool {
        if !admits(&event) {
            debug!(kind = ?event.kind, key = %event.key, "event filtered");
            return false;
        }
        self.queue.add(event.key);
        true
    }

    /// Enqueue every workspace in the cluster.
    pub async fn resync(&self) -> Result<usize, ClusterError> {
        let keys = with_timeout("list workspaces", GET_TIMEOUT, self.workspaces.list_keys()).await?;
        let count = keys.len();
        for key in keys {
            self.queue.add(key);
        }
        Ok(count)
    }

    /// Reconcile one key from the queue. Returns `false` once the queue has
    /// shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.reconciler.reconcile(&key).await {
            Ok(Action::Done) => self.queue.forget(&key),
            Ok(Action::Requeue(after)) => {
                self.queue.forget(&key);
                self.queue.add_after(key.clone(), after);
            }
            Err(e) => {
                warn!(workspace = %key, error = %e, "reconcile failed, requeueing");
                self.queue.add_rate_limited(key.clone());
            }
        }
        self.queue.done(&key);
        true
    }

    /// Runs the workers and the resync loop until `cancel` fires. Workers
    /// finish the reconciliation they are in before returning.
    pub async fn run(&self, cancel: CancellationToken) {
        let workers = self.config.concurrency.max(1);
        info!(workers, resync_secs = self.config.resync_period.as_secs(), "controller starting");

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            let controller = self.clone();
            tasks.spawn(async move { while controller.process_next().await {} });
        }

        let controller = self.clone();
        let resync_cancel = cancel.clone();
        tasks.spawn(async move {
            let period = controller.config.resync_period;
            if period.is_zero() {
                warn!("resync period is zero, listing workspaces once at startup");
                if let Err(e) = controller.resync().await {
                    error!(error = %e, "resync failed");
                }
                return;
            }
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = resync_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = controller.resync().await {
                            error!(error = %e, "resync failed");
                        }
                    }
                }
            }
        });

        cancel.cancelled().await;
        self.queue.shutdown();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "controller task panicked");
            }
        }
        info!("controller stopped");
    }
}

/// Spawns watches on workspaces and on the operator's Pods and PVCs,
/// forwarding every change to [`Controller::handle_event`]. Deletions are
/// forwarded too, so a removed workspace gets its children cleaned up.
pub fn kube_triggers(client: Client, controller: &Controller, cancel: CancellationToken) -> JoinSet<()> {
    let selector = format!("{}={}", APP_LABEL.0, APP_LABEL.1);
    let mut tasks = JoinSet::new();

    tasks.spawn(watch(
        Api::<Workspace>::all(client.clone()),
        watcher::Config::default(),
        ResourceKind::Workspace,
        controller.clone(),
        cancel.clone(),
    ));
    tasks.spawn(watch(
        Api::<Pod>::all(client.clone()),
        watcher::Config::default().labels(&selector),
        ResourceKind::Pod,
        controller.clone(),
        cancel.clone(),
    ));
    tasks.spawn(watch(
        Api::<PersistentVolumeClaim>::all(client),
        watcher::Config::default().labels(&selector),
        ResourceKind::PersistentVolumeClaim,
        controller.clone(),
        cancel,
    ));

    tasks
}

async fn watch<K: ManagedResource>(
    api: Api<K>,
    config: watcher::Config,
    kind: ResourceKind,
    controller: Controller,
    cancel: CancellationToken,
) {
    let mut events = watcher(api, config).default_backoff().boxed();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = events.next() => match next {
                Some(Ok(event)) => {
                    if let Some(obj) = touched(event) {
                        controller.handle_event(WatchEvent { kind, key: ObjectKey::of(&obj) });
                    }
                }
                Some(Err(e)) => warn!(?kind, error = %e, "watch error"),
                None => break,
            },
        }
    }
    debug!(?kind, "watch stopped");
}

fn touched<K>(event: watcher::Event<K>) -> Option<K> {
    match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) | watcher::Event::Delete(obj) => Some(obj),
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}
