//! Bounded background task manager.
//!
//! # Responsibilities
//! - Spawn submitted futures and track them until they finish
//! - Enforce capacity, evicting the oldest quarter under pressure
//! - Cooperative cancellation by id, by group, or wholesale on stop
//! - Run each task's cleanup hook exactly once
//!
//! # Design Decisions
//! - One mutex guards the task map, groups, and counters; it is never held
//!   across an await
//! - Whoever removes a record from the map finalizes it, so terminal
//!   bookkeeping happens once no matter which path gets there first
//! - Exit notification and hooks run after the lock is released

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::TaskManagerConfig;
use crate::health::report::TaskHealthReport;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::tasks::error::TaskError;
use crate::tasks::handle::TaskHandle;
use crate::tasks::memory::{MemoryProbe, SystemMemoryProbe};
use crate::tasks::reaper::Reaper;
use crate::tasks::record::{wait_exit, TaskExit, TaskId, TaskInfo, TaskOptions, TaskRecord};

/// Tasks older than this count toward `old_tasks`.
const OLD_TASK_AGE: Duration = Duration::from_secs(60);
/// Tasks older than this count toward `very_old_tasks` and degrade health.
const VERY_OLD_TASK_AGE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize)]
pub struct TaskManagerStats {
    pub active_tasks: usize,
    pub total_created: u64,
    pub total_completed: u64,
    pub total_cancelled: u64,
    pub total_failed: u64,
    pub task_groups: usize,
    pub old_tasks: usize,
    pub very_old_tasks: usize,
    pub utilization: f64,
    pub capacity: usize,
    /// Last sample taken by the reaper, if it has run.
    pub memory_utilization: Option<f64>,
}

/// Outcome counts from [`TaskManager::await_completion`]. Tasks still
/// running at the deadline are counted as cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompletionSummary {
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub total: usize,
}

/// What a single reaper cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Records whose task ended without reporting, finalized as failed.
    pub reclaimed: usize,
    /// Tasks past their timeout that were asked to cancel.
    pub expired: usize,
    /// Tasks asked to cancel because of memory pressure.
    pub evicted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Tasks that were still tracked when stop began.
    pub cancelled: usize,
    /// Of those, how many were cleared without acknowledging.
    pub unacknowledged: usize,
}

#[derive(Default)]
struct TaskState {
    tasks: HashMap<TaskId, TaskRecord>,
    groups: HashMap<String, HashSet<TaskId>>,
    accepting: bool,
    total_created: u64,
    total_completed: u64,
    total_cancelled: u64,
    total_failed: u64,
    memory_utilization: Option<f64>,
    /// Submitters currently blocked on a full manager.
    admission_waiters: usize,
    /// Slots promised to those submitters by eviction rounds still winding down.
    admission_credit: usize,
}

impl TaskState {
    /// Take a record out of the map and its group, pruning empty groups.
    fn remove(&mut self, id: TaskId) -> Option<TaskRecord> {
        let record = self.tasks.remove(&id)?;
        if let Some(group) = &record.group {
            if let Some(members) = self.groups.get_mut(group) {
                members.remove(&id);
                if members.is_empty() {
                    self.groups.remove(group);
                }
            }
        }
        Some(record)
    }

    fn count(&mut self, exit: TaskExit) {
        match exit {
            TaskExit::Completed => self.total_completed += 1,
            TaskExit::Failed => self.total_failed += 1,
            TaskExit::Cancelled => self.total_cancelled += 1,
        }
    }

    /// Ask the oldest ⌈len/4⌉ tasks not already cancelling to cancel.
    fn select_evictions(&mut self) -> Vec<watch::Receiver<Option<TaskExit>>> {
        if self.tasks.is_empty() {
            return Vec::new();
        }
        let quota = self.tasks.len().div_ceil(4).max(1);

        let mut candidates: Vec<(Instant, TaskId)> = self
            .tasks
            .values()
            .filter(|record| !record.cancel_requested)
            .map(|record| (record.created_at, record.id))
            .collect();
        candidates.sort_unstable();

        let mut receivers = Vec::with_capacity(quota);
        for (_, id) in candidates.into_iter().take(quota) {
            if let Some(record) = self.tasks.get_mut(&id) {
                record.request_cancel();
                receivers.push(record.subscribe());
            }
        }
        receivers
    }

    /// Register a submitter blocked on capacity. A new eviction round is
    /// selected only when the rounds already in flight cannot cover every
    /// waiter. Returns the exits to wait on and how many tasks were newly
    /// asked to cancel.
    fn enter_admission(&mut self) -> (Vec<watch::Receiver<Option<TaskExit>>>, usize) {
        self.admission_waiters += 1;
        let mut selected = 0;
        if self.admission_credit < self.admission_waiters {
            selected = self.select_evictions().len();
            self.admission_credit += selected;
        }
        let receivers = self
            .tasks
            .values()
            .filter(|record| record.cancel_requested)
            .map(|record| record.subscribe())
            .collect();
        (receivers, selected)
    }

    fn leave_admission(&mut self) {
        self.admission_waiters = self.admission_waiters.saturating_sub(1);
        self.admission_credit = self.admission_credit.saturating_sub(1);
    }

    fn utilization(&self, capacity: usize) -> f64 {
        if capacity == 0 {
            return 1.0;
        }
        self.tasks.len() as f64 / capacity as f64
    }
}

struct Inner {
    config: TaskManagerConfig,
    state: Mutex<TaskState>,
    memory: Box<dyn MemoryProbe>,
    reaper: Mutex<Option<(JoinHandle<()>, Shutdown)>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Terminal transition reported by the task itself. No-op if another
    /// path already finalized the record.
    fn finish(&self, id: TaskId, exit: TaskExit) {
        let record = {
            let mut st = self.lock();
            let Some(record) = st.remove(id) else {
                return;
            };
            st.count(exit);
            record
        };

        metrics::record_task_event(exit.as_str());
        tracing::debug!(
            task_id = %id,
            task = %record.name,
            exit = exit.as_str(),
            elapsed_ms = record.age(Instant::now()).as_millis() as u64,
            "Task finished"
        );
        record.settle(exit);
    }
}

/// Bounded manager for background tasks. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    /// A manager sampling host memory. Accepts work immediately; call
    /// [`TaskManager::start`] to run the reaper.
    pub fn new(config: TaskManagerConfig) -> Self {
        Self::with_memory_probe(config, SystemMemoryProbe::new())
    }

    pub fn with_memory_probe(config: TaskManagerConfig, probe: impl MemoryProbe + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(TaskState {
                    accepting: true,
                    ..TaskState::default()
                }),
                memory: Box::new(probe),
                reaper: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.inner.lock()
    }

    pub(crate) fn downgrade(&self) -> WeakTaskManager {
        WeakTaskManager(Arc::downgrade(&self.inner))
    }

    /// Spawn `operation` as a tracked task.
    ///
    /// At capacity, the oldest quarter of tracked tasks is asked to cancel
    /// and given `eviction_grace` to wind down before the submission is
    /// rejected with [`TaskError::ResourceExhausted`].
    pub async fn submit<Fut, T, E>(
        &self,
        operation: Fut,
        options: TaskOptions,
    ) -> Result<TaskHandle<T, E>, TaskError<E>>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let capacity = self.inner.config.capacity;

        let (accepting, active) = {
            let st = self.lock();
            (st.accepting, st.tasks.len())
        };
        if !accepting {
            return Err(TaskError::ShuttingDown);
        }
        if active >= capacity {
            self.wait_for_capacity().await;
        }

        let mut st = self.lock();
        if !st.accepting {
            return Err(TaskError::ShuttingDown);
        }
        if st.tasks.len() >= capacity {
            drop(st);
            metrics::record_task_event("rejected");
            tracing::warn!(capacity, "Task rejected, capacity exhausted after eviction");
            return Err(TaskError::ResourceExhausted { capacity });
        }

        let id = TaskId::new();
        let name = options.name.unwrap_or_else(|| format!("task-{}", id));
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.inner.config.default_task_timeout());
        let cancel = CancellationToken::new();
        let (exit_tx, _) = watch::channel(None);

        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        // Spawned under the lock: the task cannot finalize before its record exists.
        let join = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(TaskError::Cancelled),
                outcome = AssertUnwindSafe(operation).catch_unwind() => match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(TaskError::Failed(e)),
                    Err(panic) => Err(TaskError::Panicked(panic_message(panic.as_ref()))),
                },
            };
            let exit = match &result {
                Ok(_) => TaskExit::Completed,
                Err(TaskError::Cancelled) => TaskExit::Cancelled,
                Err(_) => TaskExit::Failed,
            };
            inner.finish(id, exit);
            result
        });

        if let Some(group) = &options.group {
            st.groups.entry(group.clone()).or_default().insert(id);
        }
        st.tasks.insert(
            id,
            TaskRecord {
                id,
                name: name.clone(),
                group: options.group,
                created_at: Instant::now(),
                timeout,
                cleanup_hook: options.cleanup_hook,
                cancel: cancel.clone(),
                abort: join.abort_handle(),
                exit: exit_tx,
                cancel_requested: false,
            },
        );
        st.total_created += 1;
        let active = st.tasks.len();
        drop(st);

        metrics::record_task_event("submitted");
        tracing::debug!(task_id = %id, task = %name, active, "Task submitted");

        Ok(TaskHandle::new(id, join, cancel))
    }

    /// Request cancellation of one task and wait up to `timeout` for it to
    /// acknowledge. Returns false if the id is not tracked.
    pub async fn cancel(&self, id: TaskId, timeout: Duration) -> bool {
        let rx = {
            let mut st = self.lock();
            match st.tasks.get_mut(&id) {
                Some(record) => {
                    record.request_cancel();
                    record.subscribe()
                }
                None => return false,
            }
        };

        tracing::info!(task_id = %id, "Task cancellation requested");
        if tokio::time::timeout(timeout, wait_exit(rx)).await.is_err() {
            tracing::warn!(
                task_id = %id,
                timeout_ms = timeout.as_millis() as u64,
                "Task did not acknowledge cancellation in time"
            );
        }
        true
    }

    /// Cancel every task in `group` and wait up to `timeout` for them.
    /// The group is forgotten immediately. Returns how many were cancelled.
    pub async fn cancel_group(&self, group: &str, timeout: Duration) -> usize {
        let receivers: Vec<_> = {
            let mut st = self.lock();
            let Some(members) = st.groups.remove(group) else {
                return 0;
            };
            members
                .into_iter()
                .filter_map(|id| {
                    st.tasks.get_mut(&id).map(|record| {
                        record.request_cancel();
                        record.subscribe()
                    })
                })
                .collect()
        };

        let count = receivers.len();
        tracing::info!(group = %group, count, "Task group cancellation requested");

        let waits = join_all(receivers.into_iter().map(wait_exit));
        if tokio::time::timeout(timeout, waits).await.is_err() {
            tracing::warn!(
                group = %group,
                timeout_ms = timeout.as_millis() as u64,
                "Task group did not fully acknowledge cancellation in time"
            );
        }
        count
    }

    /// Wait for the currently tracked tasks (optionally one group) to
    /// finish. Tasks still running when `timeout` elapses are asked to
    /// cancel and counted as cancelled.
    pub async fn await_completion(
        &self,
        timeout: Option<Duration>,
        group: Option<&str>,
    ) -> CompletionSummary {
        let pending: Vec<(TaskId, watch::Receiver<Option<TaskExit>>)> = {
            let st = self.lock();
            match group {
                Some(group) => st
                    .groups
                    .get(group)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| st.tasks.get(id))
                    .map(|record| (record.id, record.subscribe()))
                    .collect(),
                None => st
                    .tasks
                    .values()
                    .map(|record| (record.id, record.subscribe()))
                    .collect(),
            }
        };

        // A timeout too large to represent is no deadline at all.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let waits = pending
            .into_iter()
            .map(|(id, rx)| async move { (id, until(deadline, wait_exit(rx)).await) });
        let results = join_all(waits).await;

        let mut summary = CompletionSummary {
            total: results.len(),
            ..CompletionSummary::default()
        };
        let mut stragglers = Vec::new();
        for (id, exit) in results {
            match exit {
                Some(TaskExit::Completed) => summary.completed += 1,
                Some(TaskExit::Failed) => summary.failed += 1,
                Some(TaskExit::Cancelled) => summary.cancelled += 1,
                None => {
                    summary.cancelled += 1;
                    stragglers.push(id);
                }
            }
        }

        if !stragglers.is_empty() {
            {
                let mut st = self.lock();
                for id in &stragglers {
                    if let Some(record) = st.tasks.get_mut(id) {
                        record.request_cancel();
                    }
                }
            }
            tracing::warn!(
                pending = stragglers.len(),
                group = group.unwrap_or("*"),
                "Tasks still running at completion deadline, cancellation requested"
            );
        }

        summary
    }

    pub fn stats(&self) -> TaskManagerStats {
        let now = Instant::now();
        let capacity = self.inner.config.capacity;
        let st = self.lock();

        let mut old_tasks = 0;
        let mut very_old_tasks = 0;
        for record in st.tasks.values() {
            let age = record.age(now);
            if age > OLD_TASK_AGE {
                old_tasks += 1;
            }
            if age > VERY_OLD_TASK_AGE {
                very_old_tasks += 1;
            }
        }

        TaskManagerStats {
            active_tasks: st.tasks.len(),
            total_created: st.total_created,
            total_completed: st.total_completed,
            total_cancelled: st.total_cancelled,
            total_failed: st.total_failed,
            task_groups: st.groups.len(),
            old_tasks,
            very_old_tasks,
            utilization: st.utilization(capacity),
            capacity,
            memory_utilization: st.memory_utilization,
        }
    }

    pub fn health_report(&self) -> TaskHealthReport {
        TaskHealthReport::from_stats(self.stats())
    }

    /// Tracked tasks, oldest first, optionally limited to one group.
    pub fn list_tasks(&self, group: Option<&str>) -> Vec<TaskInfo> {
        let now = Instant::now();
        let st = self.lock();
        let mut tasks: Vec<(Instant, TaskInfo)> = st
            .tasks
            .values()
            .filter(|record| group.is_none() || record.group.as_deref() == group)
            .map(|record| (record.created_at, record.info(now)))
            .collect();
        tasks.sort_by_key(|(created_at, info)| (*created_at, info.id));
        tasks.into_iter().map(|(_, info)| info).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    /// Accept submissions and run the reaper. Idempotent; must be called
    /// from within a Tokio runtime.
    pub fn start(&self) {
        self.lock().accepting = true;

        let mut reaper = self.inner.reaper.lock().unwrap_or_else(PoisonError::into_inner);
        if reaper
            .as_ref()
            .is_some_and(|(handle, _)| !handle.is_finished())
        {
            return;
        }

        let shutdown = Shutdown::new();
        let task = Reaper::new(self.downgrade(), self.inner.config.cleanup_interval());
        let handle = tokio::spawn(task.run(shutdown.subscribe()));
        *reaper = Some((handle, shutdown));

        tracing::info!(
            capacity = self.inner.config.capacity,
            cleanup_interval_secs = self.inner.config.cleanup_interval_secs,
            "Task manager started"
        );
    }

    /// Stop the reaper, refuse new work, cancel everything, and wait until
    /// `timeout` for tasks to acknowledge. Whatever is left is finalized as
    /// cancelled and logged. [`TaskManager::start`] re-opens the manager.
    pub async fn stop(&self, timeout: Duration) -> StopReport {
        let deadline = Instant::now().checked_add(timeout);

        let reaper = self
            .inner
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((handle, shutdown)) = reaper {
            shutdown.trigger();
            let abort = handle.abort_handle();
            if until(deadline, handle).await.is_none() {
                abort.abort();
                tracing::warn!("Task reaper did not stop before deadline, aborted");
            }
        }

        let receivers: Vec<_> = {
            let mut st = self.lock();
            st.accepting = false;
            st.tasks
                .values_mut()
                .map(|record| {
                    record.request_cancel();
                    record.subscribe()
                })
                .collect()
        };
        let cancelled = receivers.len();
        if cancelled > 0 {
            tracing::info!(count = cancelled, "Cancelling outstanding tasks");
        }
        let _ = until(deadline, join_all(receivers.into_iter().map(wait_exit))).await;

        let leftovers: Vec<TaskRecord> = {
            let mut st = self.lock();
            st.groups.clear();
            let leftovers: Vec<TaskRecord> = st.tasks.drain().map(|(_, record)| record).collect();
            st.total_cancelled += leftovers.len() as u64;
            leftovers
        };

        let unacknowledged = leftovers.len();
        for record in leftovers {
            tracing::warn!(
                task_id = %record.id,
                task = %record.name,
                "Task did not acknowledge cancellation before shutdown deadline"
            );
            metrics::record_task_event(TaskExit::Cancelled.as_str());
            record.settle(TaskExit::Cancelled);
        }

        metrics::record_task_gauges(0, 0.0);
        tracing::info!(cancelled, unacknowledged, "Task manager stopped");
        StopReport {
            cancelled,
            unacknowledged,
        }
    }

    /// One maintenance pass: reclaim records whose task vanished, cancel
    /// timed-out tasks, sample memory and evict under pressure, publish gauges.
    pub fn reap(&self) -> ReapReport {
        let now = Instant::now();

        let (orphans, expired) = {
            let mut st = self.lock();

            let orphan_ids: Vec<TaskId> = st
                .tasks
                .values()
                .filter(|record| record.is_finished())
                .map(|record| record.id)
                .collect();
            let orphans: Vec<TaskRecord> = orphan_ids.into_iter().filter_map(|id| st.remove(id)).collect();
            st.total_failed += orphans.len() as u64;

            let mut expired = Vec::new();
            for record in st.tasks.values_mut() {
                if !record.cancel_requested && record.is_expired(now) {
                    record.request_cancel();
                    expired.push((record.id, record.name.clone(), record.age(now)));
                }
            }
            (orphans, expired)
        };

        let reclaimed = orphans.len();
        for record in orphans {
            tracing::warn!(
                task_id = %record.id,
                task = %record.name,
                "Reclaimed task that exited without reporting"
            );
            metrics::record_task_event(TaskExit::Failed.as_str());
            record.settle(TaskExit::Failed);
        }

        for (id, name, age) in &expired {
            tracing::warn!(
                task_id = %id,
                task = %name,
                age_secs = age.as_secs(),
                "Task exceeded its timeout, cancellation requested"
            );
            metrics::record_task_event("timed_out");
        }

        let evicted = match self.inner.memory.utilization() {
            Ok(utilization) => {
                self.lock().memory_utilization = Some(utilization);
                metrics::record_memory_utilization(utilization);
                if utilization > self.inner.config.memory_utilization_threshold {
                    self.request_eviction("memory pressure").len()
                } else {
                    0
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Memory probe failed, skipping pressure check");
                0
            }
        };

        let (active, utilization) = {
            let st = self.lock();
            (st.tasks.len(), st.utilization(self.inner.config.capacity))
        };
        metrics::record_task_gauges(active, utilization);

        ReapReport {
            reclaimed,
            expired: expired.len(),
            evicted,
        }
    }

    /// Make room for one submission at capacity and give tasks winding down
    /// `eviction_grace` to exit. Concurrent submitters share eviction rounds.
    async fn wait_for_capacity(&self) {
        let (receivers, selected, tracked) = {
            let mut st = self.lock();
            let (receivers, selected) = st.enter_admission();
            (receivers, selected, st.tasks.len())
        };
        let _waiter = AdmissionWaiter(&self.inner);

        log_eviction("capacity", selected, tracked);
        if !receivers.is_empty() {
            let waits = join_all(receivers.into_iter().map(wait_exit));
            let _ = tokio::time::timeout(self.inner.config.eviction_grace(), waits).await;
        }
    }

    fn request_eviction(&self, reason: &'static str) -> Vec<watch::Receiver<Option<TaskExit>>> {
        let (receivers, tracked) = {
            let mut st = self.lock();
            let receivers = st.select_evictions();
            (receivers, st.tasks.len())
        };
        log_eviction(reason, receivers.len(), tracked);
        receivers
    }
}

/// Keeps a submitter counted as waiting for capacity until dropped.
struct AdmissionWaiter<'a>(&'a Inner);

impl Drop for AdmissionWaiter<'_> {
    fn drop(&mut self) {
        self.0.lock().leave_admission();
    }
}

fn log_eviction(reason: &'static str, evicted: usize, tracked: usize) {
    if evicted == 0 {
        return;
    }
    tracing::warn!(evicted, tracked, reason, "Emergency eviction of oldest tasks");
    metrics::record_task_events("evicted", evicted);
}

/// Wait for `future`, giving up at `deadline` if there is one.
async fn until<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("TaskManager")
            .field("capacity", &self.inner.config.capacity)
            .field("active_tasks", &st.tasks.len())
            .field("accepting", &st.accepting)
            .finish()
    }
}

/// Non-owning reference held by the reaper so it never keeps a dropped
/// manager alive.
pub(crate) struct WeakTaskManager(Weak<Inner>);

impl WeakTaskManager {
    pub(crate) fn upgrade(&self) -> Option<TaskManager> {
        self.0.upgrade().map(|inner| TaskManager { inner })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::memory::MemoryProbeError;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProbe(f64);

    impl MemoryProbe for FixedProbe {
        fn utilization(&self) -> Result<f64, MemoryProbeError> {
            Ok(self.0)
        }
    }

    fn manager(capacity: usize) -> TaskManager {
        TaskManager::with_memory_probe(
            TaskManagerConfig {
                capacity,
                ..TaskManagerConfig::default()
            },
            FixedProbe(0.1),
        )
    }

    async fn park() -> Result<(), io::Error> {
        std::future::pending().await
    }

    #[tokio::test]
    async fn test_submit_returns_value_and_untracks() {
        let tasks = manager(10);
        let handle = tasks
            .submit(async { Ok::<_, io::Error>(42) }, TaskOptions::named("answer"))
            .await
            .unwrap();
        assert_eq!(handle.await.unwrap(), 42);

        let stats = tasks.stats();
        assert_eq!(stats.active_tasks, 0);
        assert_eq!(stats.total_created, 1);
        assert_eq!(stats.total_completed, 1);
    }

    #[tokio::test]
    async fn test_failure_passes_through() {
        let tasks = manager(10);
        let handle = tasks
            .submit(
                async { Err::<(), _>(io::Error::new(io::ErrorKind::NotFound, "gone")) },
                TaskOptions::new(),
            )
            .await
            .unwrap();
        let err = handle.await.unwrap_err();
        assert_eq!(err.failed().map(|e| e.kind()), Some(io::ErrorKind::NotFound));
        assert_eq!(tasks.stats().total_failed, 1);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let tasks = manager(10);
        let exits = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&exits);
        let handle = tasks
            .submit(
                async {
                    if true {
                        panic!("worker blew up");
                    }
                    Ok::<(), io::Error>(())
                },
                TaskOptions::new().with_cleanup_hook(move |exit| {
                    seen.lock().unwrap().push(exit);
                    Ok(())
                }),
            )
            .await
            .unwrap();

        match handle.await {
            Err(TaskError::Panicked(message)) => assert!(message.contains("worker blew up")),
            other => panic!("expected panic error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(tasks.stats().total_failed, 1);
        assert_eq!(*exits.lock().unwrap(), vec![TaskExit::Failed]);
    }

    #[tokio::test]
    async fn test_cancel_by_id_runs_hook_once() {
        let tasks = manager(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = tasks
            .submit(
                park(),
                TaskOptions::named("parked").with_cleanup_hook(move |exit| {
                    assert_eq!(exit, TaskExit::Cancelled);
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await
            .unwrap();
        let id = handle.id();

        assert!(tasks.cancel(id, Duration::from_secs(1)).await);
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(!tasks.cancel(id, Duration::from_secs(1)).await);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = tasks.stats();
        assert_eq!(stats.total_cancelled, 1);
        assert_eq!(stats.active_tasks, 0);
    }

    #[tokio::test]
    async fn test_hook_error_does_not_disturb_bookkeeping() {
        let tasks = manager(10);
        let handle = tasks
            .submit(
                async { Ok::<_, io::Error>(()) },
                TaskOptions::new().with_cleanup_hook(|_| Err("hook failed".into())),
            )
            .await
            .unwrap();
        handle.await.unwrap();
        assert_eq!(tasks.stats().total_completed, 1);
    }

    #[tokio::test]
    async fn test_cancel_group() {
        let tasks = manager(10);
        let mut handles = Vec::new();
        for _ in 0..3 {
            handles.push(tasks.submit(park(), TaskOptions::new().with_group("session-a")).await.unwrap());
        }
        let other = tasks.submit(park(), TaskOptions::new().with_group("session-b")).await.unwrap();
        assert_eq!(tasks.stats().task_groups, 2);

        assert_eq!(tasks.cancel_group("session-a", Duration::from_secs(1)).await, 3);
        for handle in handles {
            assert!(handle.await.unwrap_err().is_cancelled());
        }

        let stats = tasks.stats();
        assert_eq!(stats.active_tasks, 1);
        assert_eq!(stats.task_groups, 1);
        assert_eq!(tasks.list_tasks(Some("session-b"))[0].id, other.id());
        assert_eq!(tasks.cancel_group("session-a", Duration::from_secs(1)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_quarter() {
        let tasks = manager(4);
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(tasks.submit(park(), TaskOptions::new()).await.unwrap());
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        let newest = tasks.submit(park(), TaskOptions::new()).await.unwrap();

        let oldest = handles.remove(0);
        assert!(oldest.await.unwrap_err().is_cancelled());
        let stats = tasks.stats();
        assert_eq!(stats.active_tasks, 4);
        assert_eq!(stats.total_cancelled, 1);
        assert!(tasks.list_tasks(None).iter().any(|info| info.id == newest.id()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resource_exhausted_when_eviction_is_ignored() {
        let tasks = TaskManager::with_memory_probe(
            TaskManagerConfig {
                capacity: 1,
                eviction_grace_ms: 10,
                ..TaskManagerConfig::default()
            },
            FixedProbe(0.1),
        );

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let _stuck = tasks
            .submit(
                async move {
                    let _ = started_tx.send(());
                    // Blocks the worker, so cancellation cannot be observed.
                    std::thread::sleep(Duration::from_millis(300));
                    Ok::<_, io::Error>(())
                },
                TaskOptions::new(),
            )
            .await
            .unwrap();
        started_rx.await.unwrap();

        let err = tasks
            .submit(async { Ok::<_, io::Error>(()) }, TaskOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_resource_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_completion_summarizes() {
        let tasks = manager(10);
        let delay = || tokio::time::sleep(Duration::from_millis(10));
        for _ in 0..2 {
            tasks
                .submit(
                    async move {
                        delay().await;
                        Ok::<_, io::Error>(())
                    },
                    TaskOptions::new().with_group("g"),
                )
                .await
                .unwrap();
        }
        tasks
            .submit(
                async move {
                    delay().await;
                    Err::<(), _>(io::Error::other("nope"))
                },
                TaskOptions::new().with_group("g"),
            )
            .await
            .unwrap();
        let _outside = tasks.submit(park(), TaskOptions::new()).await.unwrap();

        let summary = tasks.await_completion(None, Some("g")).await;
        assert_eq!(
            summary,
            CompletionSummary {
                completed: 2,
                cancelled: 0,
                failed: 1,
                total: 3
            }
        );
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_completion_deadline_cancels_stragglers() {
        let tasks = manager(10);
        let quick = tasks
            .submit(
                async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, io::Error>(())
                },
                TaskOptions::new(),
            )
            .await
            .unwrap();
        let slow = tasks.submit(park(), TaskOptions::new()).await.unwrap();

        let summary = tasks.await_completion(Some(Duration::from_secs(1)), None).await;
        assert_eq!(
            summary,
            CompletionSummary {
                completed: 1,
                cancelled: 1,
                failed: 0,
                total: 2
            }
        );
        quick.await.unwrap();
        assert!(slow.await.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_cancels_timed_out_tasks() {
        let tasks = manager(10);
        let handle = tasks
            .submit(park(), TaskOptions::new().with_timeout(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(tasks.reap().expired, 0);
        tokio::time::advance(Duration::from_secs(2)).await;

        let report = tasks.reap();
        assert_eq!(report.expired, 1);
        assert!(handle.await.unwrap_err().is_cancelled());
        // Asked once; a second pass finds nothing new.
        assert_eq!(tasks.reap().expired, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_task_counters() {
        let tasks = manager(10);
        let _handle = tasks.submit(park(), TaskOptions::new()).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        let stats = tasks.stats();
        assert_eq!((stats.old_tasks, stats.very_old_tasks), (1, 0));
        assert!(tasks.health_report().healthy);

        tokio::time::advance(Duration::from_secs(240)).await;
        let stats = tasks.stats();
        assert_eq!((stats.old_tasks, stats.very_old_tasks), (1, 1));
        assert!(!tasks.health_report().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_pressure_evicts() {
        let tasks = TaskManager::with_memory_probe(
            TaskManagerConfig {
                capacity: 100,
                memory_utilization_threshold: 0.85,
                ..TaskManagerConfig::default()
            },
            FixedProbe(0.95),
        );
        let mut handles = Vec::new();
        for _ in 0..8 {
            handles.push(tasks.submit(park(), TaskOptions::new()).await.unwrap());
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        let report = tasks.reap();
        assert_eq!(report.evicted, 2);
        assert_eq!(tasks.stats().memory_utilization, Some(0.95));

        let mut handles = handles.into_iter();
        assert!(handles.next().unwrap().await.unwrap_err().is_cancelled());
        assert!(handles.next().unwrap().await.unwrap_err().is_cancelled());
        assert_eq!(tasks.len(), 6);
    }

    #[tokio::test]
    async fn test_stop_then_restart() {
        let tasks = manager(10);
        tasks.start();
        let handle = tasks.submit(park(), TaskOptions::new()).await.unwrap();

        let report = tasks.stop(Duration::from_secs(1)).await;
        assert_eq!(
            report,
            StopReport {
                cancelled: 1,
                unacknowledged: 0
            }
        );
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(tasks.is_empty());

        let err = tasks
            .submit(async { Ok::<_, io::Error>(()) }, TaskOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::ShuttingDown));

        tasks.start();
        assert!(tasks.is_accepting());
        let handle = tasks
            .submit(async { Ok::<_, io::Error>(7) }, TaskOptions::new())
            .await
            .unwrap();
        assert_eq!(handle.await.unwrap(), 7);
        tasks.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_runs_on_interval() {
        let tasks = TaskManager::with_memory_probe(
            TaskManagerConfig {
                cleanup_interval_secs: 1,
                ..TaskManagerConfig::default()
            },
            FixedProbe(0.1),
        );
        tasks.start();
        let handle = tasks
            .submit(park(), TaskOptions::new().with_timeout(Duration::from_secs(2)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(tasks.stats().memory_utilization.is_some());
        tasks.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_list_tasks_filters_by_group() {
        let tasks = manager(10);
        let _a = tasks.submit(park(), TaskOptions::named("a").with_group("x")).await.unwrap();
        let _b = tasks.submit(park(), TaskOptions::named("b")).await.unwrap();

        assert_eq!(tasks.list_tasks(None).len(), 2);
        let grouped = tasks.list_tasks(Some("x"));
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].name, "a");
        tasks.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submits_share_eviction_rounds() {
        let tasks = manager(8);
        let mut handles = Vec::new();
        for _ in 0..8 {
            handles.push(tasks.submit(park(), TaskOptions::new()).await.unwrap());
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        let (a, b, c, d) = tokio::join!(
            tasks.submit(park(), TaskOptions::new()),
            tasks.submit(park(), TaskOptions::new()),
            tasks.submit(park(), TaskOptions::new()),
            tasks.submit(park(), TaskOptions::new()),
        );
        let accepted = [a, b, c, d].into_iter().filter(Result::is_ok).count();
        assert_eq!(accepted, 4);

        let stats = tasks.stats();
        assert_eq!(stats.total_cancelled, 4);
        assert_eq!(stats.active_tasks, 8);

        let survivors = handles.split_off(4);
        for handle in handles {
            assert!(handle.await.unwrap_err().is_cancelled());
        }
        for handle in &survivors {
            assert!(!handle.is_finished());
        }
        tasks.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_submits_each_evict_once() {
        let tasks = TaskManager::with_memory_probe(
            TaskManagerConfig {
                capacity: 2,
                eviction_grace_ms: 10,
                ..TaskManagerConfig::default()
            },
            FixedProbe(0.1),
        );
        let first = tasks.submit(park(), TaskOptions::new()).await.unwrap();
        tokio::time::advance(Duration::from_millis(1)).await;
        let second = tasks.submit(park(), TaskOptions::new()).await.unwrap();

        tokio::time::advance(Duration::from_millis(1)).await;

        // Each sequential submission at capacity gets its own round.
        let _third = tasks.submit(park(), TaskOptions::new()).await.unwrap();
        assert!(first.await.unwrap_err().is_cancelled());
        tokio::time::advance(Duration::from_millis(1)).await;
        let _fourth = tasks.submit(park(), TaskOptions::new()).await.unwrap();
        assert!(second.await.unwrap_err().is_cancelled());
        assert_eq!(tasks.stats().total_cancelled, 2);
        tasks.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_hook_panic_does_not_disturb_bookkeeping() {
        let tasks = manager(10);
        let handle = tasks
            .submit(
                async { Ok::<_, io::Error>(5) },
                TaskOptions::new().with_cleanup_hook(|_| panic!("hook blew up")),
            )
            .await
            .unwrap();
        assert_eq!(handle.await.unwrap(), 5);

        let stats = tasks.stats();
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(stats.active_tasks, 0);

        let handle = tasks
            .submit(async { Ok::<_, io::Error>(6) }, TaskOptions::new())
            .await
            .unwrap();
        assert_eq!(handle.await.unwrap(), 6);
    }

    struct PanicsOnceProbe(AtomicUsize);

    impl MemoryProbe for PanicsOnceProbe {
        fn utilization(&self) -> Result<f64, MemoryProbeError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("memory sample failed");
            }
            Ok(0.2)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_retries_after_panicking_cycle() {
        let tasks = TaskManager::with_memory_probe(
            TaskManagerConfig {
                cleanup_interval_secs: 1,
                ..TaskManagerConfig::default()
            },
            PanicsOnceProbe(AtomicUsize::new(0)),
        );
        tasks.start();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(tasks.stats().memory_utilization, None);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tasks.stats().memory_utilization, Some(0.2));
        tasks.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_unrepresentable_timeouts_wait_without_deadline() {
        let tasks = manager(10);
        tasks
            .submit(async { Ok::<_, io::Error>(()) }, TaskOptions::new())
            .await
            .unwrap();
        let summary = tasks.await_completion(Some(Duration::MAX), None).await;
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.total, 1);

        let _parked = tasks.submit(park(), TaskOptions::new()).await.unwrap();
        let report = tasks.stop(Duration::from_secs(u64::MAX)).await;
        assert_eq!(
            report,
            StopReport {
                cancelled: 1,
                unacknowledged: 0
            }
        );
    }
}
