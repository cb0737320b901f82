//! Actor-based single-writer execution
//!
//! Every activated [`EntityKey`] gets one Tokio task that owns the entity's
//! state and drains a bounded FIFO mailbox:
//! - One logical writer per key eliminates lost updates
//! - Operations on different keys run fully in parallel
//! - Write-through: a mutation is committed before its caller is answered
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │              ActorHost<S> (Clone)                     │
//! │   registry: EntityKey -> Mailbox (mpsc::Sender)       │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ Message::Run(job) + oneshot reply
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │            EntityActor (one task per key)             │
//! │  activate: StateStore::load -> S (or S::default())    │
//! │  execute:  op(&mut scratch) -> Step::Commit | Skip    │
//! │  commit:   StateStore::commit(bincode(scratch))       │
//! │  swap:     state = scratch, then reply                │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ idle_timeout with empty queue
//!                       ▼
//!              retire (unregister, drop state)
//! ```

use crate::{
    metrics::{OUTCOME_COMMITTED, OUTCOME_FAILED, OUTCOME_READ, OUTCOME_REJECTED},
    EntityKey, Error, HostConfig, HostMetrics, Result, StateStore,
};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// State owned by an entity actor
///
/// `Default` is the state of an entity that has never been committed.
pub trait EntityState:
    Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> EntityState for T where
    T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// What an operation wants done with the scratch state it was handed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<R> {
    /// Persist the scratch state, then answer with `R`
    Commit(R),
    /// Discard the scratch state and answer with `R`
    Skip(R),
}

impl<R> Step<R> {
    /// Result carried by the step
    pub fn into_inner(self) -> R {
        match self {
            Step::Commit(value) | Step::Skip(value) => value,
        }
    }

    /// Whether the step persists state
    pub fn is_commit(&self) -> bool {
        matches!(self, Step::Commit(_))
    }
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// Shared between a caller and its queued job; whoever moves it out of
/// PENDING first decides whether the job runs.
#[derive(Debug, Default)]
struct Ticket(AtomicU8);

impl Ticket {
    fn claim(&self) -> bool {
        self.0
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn cancel(&self) -> bool {
        self.0
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

enum Executed {
    Commit,
    Skip,
    Rejected,
}

/// Type-erased operation queued in a mailbox
trait Job<S>: Send {
    fn claim(&self) -> bool;

    fn execute(&mut self, scratch: &mut S) -> Executed;

    fn complete(self: Box<Self>, commit: Result<()>);

    fn abort(self: Box<Self>, err: Error);
}

struct Call<S, R, E, F> {
    op: Option<F>,
    outcome: Option<std::result::Result<Step<R>, E>>,
    ticket: Arc<Ticket>,
    reply: oneshot::Sender<std::result::Result<R, E>>,
    _state: PhantomData<fn(&mut S)>,
}

impl<S, R, E, F> Job<S> for Call<S, R, E, F>
where
    R: Send,
    E: From<Error> + Send,
    F: FnOnce(&mut S) -> std::result::Result<Step<R>, E> + Send,
{
    fn claim(&self) -> bool {
        self.ticket.claim()
    }

    fn execute(&mut self, scratch: &mut S) -> Executed {
        let Some(op) = self.op.take() else {
            return Executed::Rejected;
        };
        let outcome = op(scratch);
        let executed = match &outcome {
            Ok(Step::Commit(_)) => Executed::Commit,
            Ok(Step::Skip(_)) => Executed::Skip,
            Err(_) => Executed::Rejected,
        };
        self.outcome = Some(outcome);
        executed
    }

    fn complete(self: Box<Self>, commit: Result<()>) {
        let Call { outcome, reply, .. } = *self;
        let answer = match (outcome, commit) {
            (Some(Ok(step)), Ok(())) => Ok(step.into_inner()),
            (Some(Ok(_)), Err(err)) => Err(E::from(err)),
            (Some(Err(err)), _) => Err(err),
            (None, _) => Err(E::from(Error::Concurrency(
                "Operation completed without executing".to_string(),
            ))),
        };
        // Caller may have gone away; the effect is already durable
        let _ = reply.send(answer);
    }

    fn abort(self: Box<Self>, err: Error) {
        let _ = self.reply.send(Err(E::from(err)));
    }
}

/// Message sent to an entity actor
enum Message<S> {
    /// Run an operation against the entity state
    Run(Box<dyn Job<S>>),

    /// Drop the cached state once earlier messages are done
    Passivate { response: oneshot::Sender<bool> },
}

/// Registry entry for a running actor
struct Mailbox<S> {
    sender: mpsc::Sender<Message<S>>,
    generation: u64,
}

struct Shared<S> {
    store: Arc<dyn StateStore>,
    registry: DashMap<EntityKey, Arc<Mailbox<S>>>,
    config: HostConfig,
    metrics: HostMetrics,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

/// Per-key single-writer runtime for one entity state type
///
/// Cloning is cheap; clones share the same registry and store. Dropping the
/// last clone stops every mailbox task once its queue is drained.
pub struct ActorHost<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for ActorHost<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> std::fmt::Debug for ActorHost<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHost")
            .field("store", &self.shared.store.name())
            .field("active", &self.shared.registry.len())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl<S: EntityState> ActorHost<S> {
    /// Create a host over `store`
    pub fn new(store: Arc<dyn StateStore>, config: HostConfig) -> Result<Self> {
        config.validate()?;

        let metrics = HostMetrics::new()?;

        tracing::info!(
            store = store.name(),
            mailbox_capacity = config.mailbox_capacity,
            idle_timeout_ms = ?config.idle_timeout_ms,
            invoke_timeout_ms = ?config.invoke_timeout_ms,
            "Actor host started"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                store,
                registry: DashMap::new(),
                config,
                metrics,
                next_generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Run `op` against the state of `key`, serialized with every other
    /// operation on that key.
    ///
    /// `op` receives a scratch copy. Returning [`Step::Commit`] persists the
    /// copy and makes it the live state before the call resolves; returning
    /// [`Step::Skip`] or an error discards it. A call that times out while
    /// still queued is cancelled and never runs.
    pub async fn invoke<R, E, F>(&self, key: &EntityKey, op: F) -> std::result::Result<R, E>
    where
        R: Send + 'static,
        E: From<Error> + Send + 'static,
        F: FnOnce(&mut S) -> std::result::Result<Step<R>, E> + Send + 'static,
    {
        let started = Instant::now();
        let deadline = self.shared.config.invoke_timeout().map(|limit| started + limit);

        let ticket = Arc::new(Ticket::default());
        let (reply, mut response) = oneshot::channel();
        let call = Call {
            op: Some(op),
            outcome: None,
            ticket: Arc::clone(&ticket),
            reply,
            _state: PhantomData,
        };
        let mut message = Message::Run(Box::new(call) as Box<dyn Job<S>>);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mailbox = self.mailbox(key).map_err(E::from)?;

            let sent = match deadline {
                Some(at) => match tokio::time::timeout_at(at, mailbox.sender.send(message)).await {
                    Ok(sent) => sent,
                    Err(_) => return Err(E::from(self.timed_out(key, started))),
                },
                None => mailbox.sender.send(message).await,
            };

            match sent {
                Ok(()) => break,
                Err(mpsc::error::SendError(returned)) => {
                    // Task is gone; forget it so the retry activates a fresh one
                    self.shared
                        .registry
                        .remove_if(key, |_, current| current.generation == mailbox.generation);

                    if attempt >= self.shared.config.send_attempts {
                        return Err(E::from(Error::Concurrency(format!(
                            "Mailbox for {} closed after {} attempts",
                            key, attempt
                        ))));
                    }
                    tracing::debug!(key = %key, attempt, "Mailbox closed, reactivating");
                    message = returned;
                }
            }
        }

        let answer = match deadline {
            Some(at) => match tokio::time::timeout_at(at, &mut response).await {
                Ok(answer) => answer,
                Err(_) if ticket.cancel() => return Err(E::from(self.timed_out(key, started))),
                // Already executing: its outcome must reach the caller
                Err(_) => response.await,
            },
            None => response.await,
        };

        answer.map_err(|_| {
            E::from(Error::Concurrency(format!(
                "Response channel for {} closed",
                key
            )))
        })?
    }

    /// Run a read-only closure against the state of `key`
    pub async fn read<R, F>(&self, key: &EntityKey, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&S) -> R + Send + 'static,
    {
        self.invoke(key, move |state: &mut S| Ok::<_, Error>(Step::Skip(f(&*state))))
            .await
    }

    /// Drop the cached state of `key` after all operations queued before this
    /// call have finished. The next operation reloads the last committed
    /// snapshot. Returns whether a cached state was dropped.
    pub async fn passivate(&self, key: &EntityKey) -> Result<bool> {
        let mailbox = self
            .shared
            .registry
            .get(key)
            .map(|entry| Arc::clone(entry.value()));
        let Some(mailbox) = mailbox else {
            return Ok(false);
        };

        let (response, dropped) = oneshot::channel();
        if mailbox
            .sender
            .send(Message::Passivate { response })
            .await
            .is_err()
        {
            return Ok(false);
        }
        drop(mailbox);

        dropped
            .await
            .map_err(|_| Error::Concurrency(format!("Response channel for {} closed", key)))
    }

    /// Number of running mailbox tasks
    pub fn active_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Whether `key` currently has a running mailbox task
    pub fn is_active(&self, key: &EntityKey) -> bool {
        self.shared.registry.contains_key(key)
    }

    /// Host metrics
    pub fn metrics(&self) -> &HostMetrics {
        &self.shared.metrics
    }

    /// Underlying snapshot store
    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.shared.store)
    }

    /// Stop activating entities and unregister every mailbox. Operations
    /// already queued still run; tasks exit once their last sender is gone.
    /// Later calls fail with [`Error::Concurrency`] because a fresh activation
    /// could race a task that is still draining.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let count = self.shared.registry.len();
        self.shared.registry.clear();
        tracing::info!(mailboxes = count, "Actor host shut down");
    }

    /// Whether [`ActorHost::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn timed_out(&self, key: &EntityKey, started: Instant) -> Error {
        self.shared.metrics.invoke_timeouts.inc();
        let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::warn!(key = %key, waited_ms, "Operation timed out before executing");
        Error::Timeout {
            key: key.to_string(),
            waited_ms,
        }
    }

    /// Look up the mailbox for `key`, activating one if needed. The entry API
    /// holds the shard lock, so concurrent first callers share one task, and
    /// `shutdown` cannot clear the shard between the closed check and the
    /// insert.
    fn mailbox(&self, key: &EntityKey) -> Result<Arc<Mailbox<S>>> {
        if let Some(existing) = self.shared.registry.get(key) {
            return Ok(Arc::clone(existing.value()));
        }

        match self.shared.registry.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                if self.shared.closed.load(Ordering::SeqCst) {
                    return Err(Error::Concurrency(format!(
                        "Actor host is shut down, cannot activate {}",
                        key
                    )));
                }
                let mailbox = self.spawn_actor(key);
                entry.insert(Arc::clone(&mailbox));
                Ok(mailbox)
            }
        }
    }

    fn spawn_actor(&self, key: &EntityKey) -> Arc<Mailbox<S>> {
        let (sender, receiver) = mpsc::channel(self.shared.config.mailbox_capacity);
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);

        let actor = EntityActor {
            key: key.clone(),
            generation,
            state: None,
            mailbox: receiver,
            store: Arc::clone(&self.shared.store),
            metrics: self.shared.metrics.clone(),
            idle_timeout: self.shared.config.idle_timeout(),
            host: Arc::downgrade(&self.shared),
        };

        self.shared.metrics.active_mailboxes.inc();
        tokio::spawn(actor.run());

        Arc::new(Mailbox { sender, generation })
    }
}

/// Task owning one entity's state
struct EntityActor<S> {
    key: EntityKey,
    generation: u64,
    state: Option<S>,
    mailbox: mpsc::Receiver<Message<S>>,
    store: Arc<dyn StateStore>,
    metrics: HostMetrics,
    idle_timeout: Option<Duration>,
    host: Weak<Shared<S>>,
}

impl<S: EntityState> EntityActor<S> {
    /// Run the actor event loop
    async fn run(mut self) {
        tracing::debug!(key = %self.key, generation = self.generation, "Mailbox started");

        loop {
            let next = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, self.mailbox.recv()).await {
                    Ok(message) => message,
                    Err(_) => {
                        if self.try_retire() {
                            break;
                        }
                        continue;
                    }
                },
                None => self.mailbox.recv().await,
            };

            match next {
                Some(Message::Run(job)) => self.handle(job).await,
                Some(Message::Passivate { response }) => {
                    let dropped = self.passivate();
                    let _ = response.send(dropped);
                }
                // Every sender is gone
                None => break,
            }
        }

        self.passivate();
        self.metrics.active_mailboxes.dec();
        tracing::debug!(key = %self.key, generation = self.generation, "Mailbox stopped");
    }

    /// Unregister if nobody can still reach this mailbox. Holding the shard
    /// lock while checking the handle count and the queue means no sender can
    /// be handed out or used between the check and the removal.
    fn try_retire(&self) -> bool {
        let Some(host) = self.host.upgrade() else {
            return true;
        };

        host.registry
            .remove_if(&self.key, |_, entry| {
                entry.generation == self.generation
                    && Arc::strong_count(entry) == 1
                    && self.mailbox.is_empty()
            })
            .is_some()
    }

    async fn handle(&mut self, mut job: Box<dyn Job<S>>) {
        if !job.claim() {
            tracing::debug!(key = %self.key, "Skipping operation cancelled by its caller");
            return;
        }

        let started = Instant::now();
        let mut scratch = match self.activate().await {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(key = %self.key, error = %err, "Activation failed");
                self.record(OUTCOME_FAILED, started);
                job.abort(err);
                return;
            }
        };

        let outcome = match job.execute(&mut scratch) {
            Executed::Skip => {
                job.complete(Ok(()));
                OUTCOME_READ
            }
            Executed::Rejected => {
                job.complete(Ok(()));
                OUTCOME_REJECTED
            }
            Executed::Commit => match self.commit(&scratch).await {
                Ok(()) => {
                    self.state = Some(scratch);
                    job.complete(Ok(()));
                    OUTCOME_COMMITTED
                }
                Err(err) => {
                    // The store may or may not hold the new snapshot; reload on next use
                    tracing::warn!(key = %self.key, error = %err, "Commit failed, dropping cached state");
                    self.metrics
                        .commit_failures
                        .with_label_values(&[self.key.entity_type()])
                        .inc();
                    self.passivate();
                    job.complete(Err(err));
                    OUTCOME_FAILED
                }
            },
        };

        self.record(outcome, started);
    }

    /// Scratch copy of the live state, hydrating it first if needed
    async fn activate(&mut self) -> Result<S> {
        if let Some(state) = &self.state {
            return Ok(state.clone());
        }

        let activation_error = |reason: String| Error::Activation {
            key: self.key.to_string(),
            reason,
        };

        let snapshot = self
            .store
            .load(&self.key)
            .await
            .map_err(|err| activation_error(err.to_string()))?;
        let restored = snapshot.is_some();
        let state: S = match snapshot {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|err| activation_error(err.to_string()))?
            }
            None => S::default(),
        };

        self.metrics
            .activations
            .with_label_values(&[self.key.entity_type()])
            .inc();
        tracing::debug!(key = %self.key, restored, "Entity activated");

        self.state = Some(state.clone());
        Ok(state)
    }

    async fn commit(&self, state: &S) -> Result<()> {
        let snapshot = bincode::serialize(state)?;
        self.store.commit(&self.key, snapshot).await
    }

    fn passivate(&mut self) -> bool {
        if self.state.take().is_none() {
            return false;
        }
        self.metrics
            .passivations
            .with_label_values(&[self.key.entity_type()])
            .inc();
        tracing::debug!(key = %self.key, "Entity passivated");
        true
    }

    fn record(&self, outcome: &str, started: Instant) {
        self.metrics.record_operation(
            self.key.entity_type(),
            outcome,
            started.elapsed().as_secs_f64(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStateStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i64,
        history: Vec<i64>,
    }

    /// Memory store with injectable failures and latency, counting loads and
    /// logging successful commits
    #[derive(Default)]
    struct TestStore {
        inner: MemoryStateStore,
        commit_delay: Option<Duration>,
        fail_commits: AtomicBool,
        fail_loads: AtomicBool,
        loads: AtomicUsize,
        commits: Mutex<Vec<EntityKey>>,
    }

    impl TestStore {
        fn slow(delay: Duration) -> Self {
            Self {
                commit_delay: Some(delay),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl StateStore for TestStore {
        async fn load(&self, key: &EntityKey) -> Result<Option<Vec<u8>>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(Error::Storage("disk unavailable".to_string()));
            }
            self.inner.load(key).await
        }

        async fn commit(&self, key: &EntityKey, snapshot: Vec<u8>) -> Result<()> {
            if let Some(delay) = self.commit_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(Error::Storage("write rejected".to_string()));
            }
            self.inner.commit(key, snapshot).await?;
            self.commits.lock().push(key.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "test"
        }
    }

    fn key(id: &str) -> EntityKey {
        EntityKey::resolve("org-1", "counter", [id]).unwrap()
    }

    fn host_with(store: Arc<TestStore>, config: HostConfig) -> ActorHost<Counter> {
        ActorHost::new(store, config).unwrap()
    }

    fn host(store: Arc<TestStore>) -> ActorHost<Counter> {
        host_with(store, HostConfig::default())
    }

    async fn increment(host: &ActorHost<Counter>, key: &EntityKey) -> Result<i64> {
        host.invoke(key, |counter: &mut Counter| {
            counter.value += 1;
            counter.history.push(counter.value);
            Ok::<_, Error>(Step::Commit(counter.value))
        })
        .await
    }

    async fn committed(store: &TestStore, key: &EntityKey) -> Option<Counter> {
        store
            .inner
            .load(key)
            .await
            .unwrap()
            .map(|bytes| bincode::deserialize(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_invoke_commits_before_returning() {
        let store = Arc::new(TestStore::default());
        let host = host(store.clone());
        let key = key("a");

        assert_eq!(increment(&host, &key).await.unwrap(), 1);

        let stored = committed(&store, &key).await.unwrap();
        assert_eq!(stored.value, 1);
        assert_eq!(host.metrics().operation_count("counter", OUTCOME_COMMITTED), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_operations_on_one_key_serialize() {
        let store = Arc::new(TestStore::default());
        let host = host(store.clone());
        let key = key("hot");

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..100 {
            let host = host.clone();
            let key = key.clone();
            tasks.spawn(async move { increment(&host, &key).await.unwrap() });
        }

        let mut seen = Vec::new();
        while let Some(result) = tasks.join_next().await {
            seen.push(result.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=100).collect::<Vec<_>>());

        let state = host.read(&key, |c: &Counter| c.clone()).await.unwrap();
        assert_eq!(state.value, 100);
        assert_eq!(state.history, (1..=100).collect::<Vec<_>>());
        assert_eq!(committed(&store, &key).await.unwrap(), state);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_activate_once() {
        let store = Arc::new(TestStore::default());
        let host = host(store.clone());
        let key = key("fresh");

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let host = host.clone();
            let key = key.clone();
            tasks.spawn(async move { increment(&host, &key).await.unwrap() });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        assert_eq!(host.active_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_in_parallel() {
        let store = Arc::new(TestStore::slow(Duration::from_millis(100)));
        let host = host(store);

        let started = std::time::Instant::now();
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..10 {
            let host = host.clone();
            let key = key(&format!("k{}", i));
            tasks.spawn(async move { increment(&host, &key).await.unwrap() });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap(), 1);
        }

        // Serial execution would need at least one second
        assert!(started.elapsed() < Duration::from_millis(600));
        assert_eq!(host.active_count(), 10);
    }

    #[tokio::test]
    async fn test_failed_operation_leaves_no_trace() {
        let store = Arc::new(TestStore::default());
        let host = host(store.clone());
        let key = key("a");
        increment(&host, &key).await.unwrap();

        let result: std::result::Result<(), Error> = host
            .invoke(&key, |counter: &mut Counter| {
                counter.value = 999;
                counter.history.clear();
                Err(Error::Other("validation failed".to_string()))
            })
            .await;
        assert!(result.is_err());

        let state = host.read(&key, |c: &Counter| c.clone()).await.unwrap();
        assert_eq!(state.value, 1);
        assert_eq!(state.history, vec![1]);
        assert_eq!(committed(&store, &key).await.unwrap().value, 1);
        assert_eq!(host.metrics().operation_count("counter", OUTCOME_REJECTED), 1);
    }

    #[tokio::test]
    async fn test_skip_discards_scratch_state() {
        let store = Arc::new(TestStore::default());
        let host = host(store.clone());
        let key = key("a");

        let seen = host
            .invoke(&key, |counter: &mut Counter| {
                counter.value = 42;
                Ok::<_, Error>(Step::Skip(counter.value))
            })
            .await
            .unwrap();
        assert_eq!(seen, 42);

        assert_eq!(host.read(&key, |c: &Counter| c.value).await.unwrap(), 0);
        assert!(committed(&store, &key).await.is_none());

        increment(&host, &key).await.unwrap();
        assert_eq!(*store.commits.lock(), vec![key.clone()]);
    }

    #[tokio::test]
    async fn test_passivate_reloads_committed_state() {
        let store = Arc::new(TestStore::default());
        let host = host(store.clone());
        let key = key("a");

        increment(&host, &key).await.unwrap();
        increment(&host, &key).await.unwrap();
        assert!(host.passivate(&key).await.unwrap());
        assert!(!host.passivate(&key).await.unwrap());

        assert_eq!(increment(&host, &key).await.unwrap(), 3);
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
        assert_eq!(
            host.metrics()
                .activations
                .with_label_values(&["counter"])
                .get(),
            2
        );
    }

    #[tokio::test]
    async fn test_passivate_unknown_key() {
        let host = host(Arc::new(TestStore::default()));
        assert!(!host.passivate(&key("never")).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_last_durable_state() {
        let store = Arc::new(TestStore::default());
        let host = host(store.clone());
        let key = key("a");
        increment(&host, &key).await.unwrap();

        store.fail_commits.store(true, Ordering::SeqCst);
        let err = increment(&host, &key).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        store.fail_commits.store(false, Ordering::SeqCst);
        assert_eq!(host.read(&key, |c: &Counter| c.value).await.unwrap(), 1);
        // Cached copy was dropped and rehydrated
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
        assert_eq!(
            host.metrics()
                .commit_failures
                .with_label_values(&["counter"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_activation_failure_is_hard_error() {
        let store = Arc::new(TestStore::default());
        store.fail_loads.store(true, Ordering::SeqCst);
        let host = host(store.clone());
        let key = key("a");

        let err = increment(&host, &key).await.unwrap_err();
        assert!(matches!(err, Error::Activation { .. }));

        store.fail_loads.store(false, Ordering::SeqCst);
        assert_eq!(increment(&host, &key).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_timeout_cancels_queued_operation() {
        let store = Arc::new(TestStore::slow(Duration::from_millis(200)));
        let config = HostConfig {
            invoke_timeout_ms: Some(50),
            ..HostConfig::default()
        };
        let host = host_with(store.clone(), config);
        let key = key("a");

        let first = {
            let host = host.clone();
            let key = key.clone();
            tokio::spawn(async move { increment(&host, &key).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Queued behind the slow commit; gives up before it starts
        let err = increment(&host, &key).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        // Started before its deadline passed, so it still reports success
        assert_eq!(first.await.unwrap().unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(host.read(&key, |c: &Counter| c.value).await.unwrap(), 1);
        assert_eq!(committed(&store, &key).await.unwrap().history, vec![1]);
        assert_eq!(host.metrics().invoke_timeouts.get(), 1);
    }

    #[tokio::test]
    async fn test_idle_mailbox_retires_and_reactivates() {
        let store = Arc::new(TestStore::default());
        let config = HostConfig {
            idle_timeout_ms: Some(30),
            ..HostConfig::default()
        };
        let host = host_with(store.clone(), config);
        let key = key("a");

        increment(&host, &key).await.unwrap();
        assert!(host.is_active(&key));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!host.is_active(&key));
        assert_eq!(host.active_count(), 0);

        assert_eq!(increment(&host, &key).await.unwrap(), 2);
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_unregisters_mailboxes() {
        let host = host(Arc::new(TestStore::default()));
        increment(&host, &key("a")).await.unwrap();
        increment(&host, &key("b")).await.unwrap();
        assert_eq!(host.active_count(), 2);

        host.shutdown();
        assert_eq!(host.active_count(), 0);
        assert!(host.is_shut_down());

        assert!(matches!(
            increment(&host, &key("a")).await,
            Err(Error::Concurrency(_))
        ));
        assert!(matches!(
            host.read(&key("b"), |c: &Counter| c.value).await,
            Err(Error::Concurrency(_))
        ));
        assert_eq!(host.active_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_never_races_an_in_flight_commit() {
        let store = Arc::new(TestStore::slow(Duration::from_millis(200)));
        let host = host(store.clone());
        let key = key("a");

        let in_flight = tokio::spawn({
            let host = host.clone();
            let key = key.clone();
            async move { increment(&host, &key).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        host.shutdown();
        let late = increment(&host, &key).await;
        assert!(matches!(late, Err(Error::Concurrency(_))));

        assert_eq!(in_flight.await.unwrap().unwrap(), 1);
        let stored = committed(&store, &key).await.unwrap();
        assert_eq!(stored.value, 1);
        assert_eq!(*store.commits.lock(), vec![key.clone()]);

        // A new host over the same store sees every acknowledged commit
        tokio::time::sleep(Duration::from_millis(20)).await;
        let restarted = host_with(
            Arc::new(TestStore {
                inner: store.inner.clone(),
                ..TestStore::default()
            }),
            HostConfig::default(),
        );
        assert_eq!(increment(&restarted, &key).await.unwrap(), 2);
    }

    async fn crash(host: &ActorHost<Counter>, key: &EntityKey) -> Result<i64> {
        host.invoke(key, |_: &mut Counter| -> Result<Step<i64>> {
            panic!("operation crashed")
        })
        .await
    }

    #[tokio::test]
    async fn test_dead_mailbox_is_replaced_on_next_call() {
        let store = Arc::new(TestStore::default());
        let host = host(store.clone());
        let key = key("a");

        increment(&host, &key).await.unwrap();
        assert!(matches!(crash(&host, &key).await, Err(Error::Concurrency(_))));

        // The dead task is still registered; the retry replaces it
        assert!(host.is_active(&key));
        assert_eq!(increment(&host, &key).await.unwrap(), 2);
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_send_gives_up_after_configured_attempts() {
        let store = Arc::new(TestStore::default());
        let config = HostConfig {
            send_attempts: 1,
            ..HostConfig::default()
        };
        let host = host_with(store.clone(), config);
        let key = key("a");

        increment(&host, &key).await.unwrap();
        assert!(crash(&host, &key).await.is_err());

        let exhausted = increment(&host, &key).await;
        assert!(matches!(exhausted, Err(Error::Concurrency(_))));
        assert!(!host.is_active(&key));

        // The stale entry was dropped, so the next call activates afresh
        assert_eq!(increment(&host, &key).await.unwrap(), 2);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let config = HostConfig {
            mailbox_capacity: 0,
            ..HostConfig::default()
        };
        let result = ActorHost::<Counter>::new(Arc::new(MemoryStateStore::new()), config);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_invoke_timeout() {
        let config = HostConfig {
            invoke_timeout_ms: Some(0),
            ..HostConfig::default()
        };
        let result = ActorHost::<Counter>::new(Arc::new(MemoryStateStore::new()), config);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_ticket_claim_and_cancel_are_exclusive() {
        let ticket = Ticket::default();
        assert!(ticket.claim());
        assert!(!ticket.cancel());

        let ticket = Ticket::default();
        assert!(ticket.cancel());
        assert!(!ticket.claim());
    }

    #[test]
    fn test_step_into_inner() {
        assert_eq!(Step::Commit(3).into_inner(), 3);
        assert!(Step::Commit(()).is_commit());
        assert!(!Step::Skip(()).is_commit());
    }
}
