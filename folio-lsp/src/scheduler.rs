//! Dependency-aware task scheduler.
//!
//! Submission deduplicates through the store's job collection: the first
//! submitter of a task creates its job and queue entry, every further
//! submitter before completion subscribes to the same completion handle,
//! and exactly one execution happens. Unscheduled, uncompleted dependencies
//! are submitted recursively.
//!
//! The queue is a binary heap over a deliberately partial order: cancelled
//! entries sink below live ones, a direct dependency rises above its
//! dependent, and every unrelated pair compares equal. Only direct
//! dependency membership is consulted; transitive chains stay unordered.
//!
//! Popped units of work run as their own tasks so an execution that awaits
//! an external call never blocks the drain loop; a dependent's work is
//! gated on its dependencies' handles instead of queue position alone.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use folio_analysis::{
    offline_passes, validate_record_keys, KeyValidator, RecordKeyCheck,
};
use folio_store::{
    CompletionHandle, Job, JobHandle, StoreError, TaskId, TaskOperation, TaskTarget,
};
use lsp_types::Diagnostic;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::server::LspClient;
use crate::state::{Core, SharedCore};

/// A queued task with the dependency set its priority is judged by.
#[derive(Debug, Clone)]
struct Entry {
    task: TaskId,
    deps: HashSet<TaskId>,
}

/// What `pop` hands to the drain loop.
#[derive(Debug)]
struct Popped {
    task: TaskId,
    deps: HashSet<TaskId>,
    cancelled: bool,
}

/// Binary heap over the partial priority order, plus the pending-cancel
/// marks.
#[derive(Debug, Default)]
struct TaskQueue {
    heap: Vec<Entry>,
    cancelled: HashSet<TaskId>,
}

impl TaskQueue {
    fn push(&mut self, task: TaskId, deps: HashSet<TaskId>) {
        self.heap.push(Entry { task, deps });
        self.sift_up(self.heap.len() - 1);
    }

    /// Pops a maximal entry. A pending cancel mark is consumed and reported
    /// to the caller.
    fn pop(&mut self) -> Option<Popped> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let entry = self.heap.pop()?;
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        let cancelled = self.cancelled.remove(&entry.task);
        Some(Popped {
            task: entry.task,
            deps: entry.deps,
            cancelled,
        })
    }

    /// Marks a still-queued task cancelled and re-sinks it, since its
    /// priority just dropped. No effect once popped.
    fn cancel(&mut self, task: TaskId) -> bool {
        let Some(idx) = self.heap.iter().position(|entry| entry.task == task) else {
            return false;
        };
        self.cancelled.insert(task);
        self.sift_down(idx);
        true
    }

    /// Clears a pending cancel mark (a task resubmitted before its
    /// cancelled entry was popped becomes live again).
    fn revive(&mut self, task: TaskId) {
        if self.cancelled.remove(&task) {
            if let Some(idx) = self.heap.iter().position(|entry| entry.task == task) {
                self.sift_up(idx);
            }
        }
    }

    /// The stated comparator: cancelled below live; a direct dependency
    /// above its dependent; unrelated pairs equal. Not a total order.
    fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        let a_cancelled = self.cancelled.contains(&a.task);
        let b_cancelled = self.cancelled.contains(&b.task);
        match (a_cancelled, b_cancelled) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        if b.deps.contains(&a.task) {
            return Ordering::Greater;
        }
        if a.deps.contains(&b.task) {
            return Ordering::Less;
        }
        Ordering::Equal
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.compare(&self.heap[idx], &self.heap[parent]) == Ordering::Greater {
                self.heap.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = idx * 2 + 1;
            let right = idx * 2 + 2;
            let mut largest = idx;
            if left < self.heap.len()
                && self.compare(&self.heap[left], &self.heap[largest]) == Ordering::Greater
            {
                largest = left;
            }
            if right < self.heap.len()
                && self.compare(&self.heap[right], &self.heap[largest]) == Ordering::Greater
            {
                largest = right;
            }
            if largest == idx {
                break;
            }
            self.heap.swap(idx, largest);
            idx = largest;
        }
    }
}

struct SchedulerInner {
    core: SharedCore,
    validator: Arc<dyn KeyValidator>,
    client: Arc<dyn LspClient>,
    validate_record_keys: bool,
    queue: Mutex<TaskQueue>,
    notify: Notify,
}

/// Handle to the scheduler; clones share the queue and drain loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Builds the scheduler and spawns its drain loop.
    pub fn spawn(
        core: SharedCore,
        validator: Arc<dyn KeyValidator>,
        client: Arc<dyn LspClient>,
        validate_record_keys: bool,
    ) -> Self {
        let inner = Arc::new(SchedulerInner {
            core,
            validator,
            client,
            validate_record_keys,
            queue: Mutex::new(TaskQueue::default()),
            notify: Notify::new(),
        });
        let drain = inner.clone();
        tokio::spawn(async move {
            drain_loop(drain).await;
        });
        Self { inner }
    }

    /// Submits a task, returning the handle that settles when its analysis
    /// finishes. Concurrent submitters of the same task share one handle
    /// and observe exactly one execution.
    pub async fn submit(&self, task: TaskId) -> Result<CompletionHandle, StoreError> {
        let handle = {
            let mut core = self.inner.core.lock().await;
            let mut queue = self.inner.queue.lock();
            submit_inner(&mut core, &mut queue, task)?
        };
        self.inner.notify.notify_one();
        Ok(handle)
    }

    /// Marks a pending job cancelled. Once the job has been popped and
    /// begun executing this has no effect; there is no preemption.
    pub fn cancel(&self, task: TaskId) -> bool {
        self.inner.queue.lock().cancel(task)
    }
}

fn submit_inner(
    core: &mut Core,
    queue: &mut TaskQueue,
    task: TaskId,
) -> Result<CompletionHandle, StoreError> {
    if let Some(job) = core.store.job_for_task(task) {
        let handle = job.handle.subscribe();
        // A cancel mark that has not been consumed yet is withdrawn; the
        // queued entry is live again and dedupe holds.
        queue.revive(task);
        return Ok(handle);
    }

    let entity = core.store.tasks.expect(task)?.clone();
    for dep in &entity.dependencies {
        let dep_entity = core.store.tasks.expect(*dep)?;
        if dep_entity.last_completed.is_none() && core.store.job_for_task(*dep).is_none() {
            submit_inner(core, queue, *dep)?;
        }
    }

    let owner = JobHandle::new();
    let handle = owner.subscribe();
    core.store.jobs.insert(|id| Job {
        id,
        task,
        handle: owner,
    })?;
    queue.push(task, entity.dependencies.iter().copied().collect());
    Ok(handle)
}

async fn drain_loop(inner: Arc<SchedulerInner>) {
    loop {
        inner.notify.notified().await;
        loop {
            let popped = inner.queue.lock().pop();
            let Some(popped) = popped else { break };

            if popped.cancelled {
                // Never executed; the job is dropped and its handle stays
                // unsettled.
                let mut core = inner.core.lock().await;
                if let Some(job) = core.store.job_for_task(popped.task) {
                    let job_id = job.id;
                    core.store.jobs.remove(job_id);
                }
                continue;
            }

            let gates: Vec<CompletionHandle> = {
                let core = inner.core.lock().await;
                popped
                    .deps
                    .iter()
                    .filter_map(|dep| core.store.job_for_task(*dep))
                    .map(|job| job.handle.subscribe())
                    .collect()
            };

            let exec = inner.clone();
            tokio::spawn(async move {
                execute(exec, popped.task, gates).await;
            });
        }
    }
}

/// The audit payload computed under the lock, before any external call.
enum Prepared {
    Audit {
        doc: folio_store::DocumentId,
        uri: String,
        version: i32,
        diagnostics: Vec<Diagnostic>,
        pending: Vec<RecordKeyCheck>,
    },
    Index,
}

async fn execute(inner: Arc<SchedulerInner>, task: TaskId, gates: Vec<CompletionHandle>) {
    // Dependencies are guaranteed to complete before this unit of work runs.
    for gate in gates {
        let _ = gate.settled().await;
    }

    let prepared = {
        let mut core = inner.core.lock().await;
        match prepare(&mut core, task) {
            Ok(prepared) => prepared,
            Err(error) => {
                tracing::error!(%task, %error, "unit of work aborted");
                abandon_job(&mut core, task);
                return;
            }
        }
    };

    // External validation happens outside the lock so unrelated documents
    // keep flowing while this execution waits.
    let (publish, extra) = match &prepared {
        Prepared::Audit { pending, .. } if inner.validate_record_keys => {
            let extra = validate_record_keys(inner.validator.as_ref(), pending).await;
            (true, extra)
        }
        Prepared::Audit { .. } => (true, Vec::new()),
        Prepared::Index => (false, Vec::new()),
    };

    let outcome = {
        let mut core = inner.core.lock().await;
        finish(&mut core, task, prepared, extra)
    };

    match outcome {
        Ok(Some((uri, version, diagnostics))) if publish => {
            match lsp_types::Url::parse(&uri) {
                Ok(url) => {
                    inner
                        .client
                        .publish_diagnostics(url, diagnostics, Some(version))
                        .await;
                }
                Err(error) => tracing::warn!(%uri, %error, "diagnostics not published"),
            }
        }
        Ok(_) => {}
        Err(error) => tracing::error!(%task, %error, "unit of work failed to persist"),
    }
}

fn prepare(core: &mut Core, task: TaskId) -> Result<Prepared, StoreError> {
    let entity = core.store.tasks.expect(task)?.clone();
    match (entity.operation, entity.target) {
        (TaskOperation::AuditDocument, TaskTarget::Document(doc)) => {
            let report = offline_passes(&mut core.store, &mut core.queries, &mut core.index, doc)?;
            let document = core.store.documents.expect(doc)?;
            Ok(Prepared::Audit {
                doc,
                uri: document.uri.clone(),
                version: document.version(),
                diagnostics: report.diagnostics,
                pending: report.pending,
            })
        }
        (TaskOperation::IndexWorkspace, TaskTarget::Workspace(ws)) => {
            core.index.outline(&mut core.store, &mut core.queries, ws)?;
            core.index
                .references_by_key(&core.store, &mut core.queries, ws)?;
            core.index
                .references_by_citekey(&core.store, &mut core.queries, ws)?;
            core.index
                .sections_by_citekey(&core.store, &mut core.queries, ws)?;
            Ok(Prepared::Index)
        }
        (operation, target) => Err(StoreError::ConsistencyViolation {
            collection: "tasks",
            key: format!("operation {operation:?} does not fit target {target:?}"),
        }),
    }
}

/// Persists results, stamps the task, settles and removes the job.
fn finish(
    core: &mut Core,
    task: TaskId,
    prepared: Prepared,
    extra: Vec<Diagnostic>,
) -> Result<Option<(String, i32, Vec<Diagnostic>)>, StoreError> {
    let publish = match prepared {
        Prepared::Audit {
            doc,
            uri,
            version,
            mut diagnostics,
            ..
        } => {
            diagnostics.extend(extra);
            core.store
                .documents
                .update(doc, |document| document.diagnostics = diagnostics.clone())?;
            Some((uri, version, diagnostics))
        }
        Prepared::Index => None,
    };

    core.store
        .tasks
        .update(task, |entity| entity.last_completed = Some(Utc::now()))?;

    if let Some(job) = core.store.job_for_task(task) {
        let job_id = job.id;
        let handle = job.handle.clone();
        core.store.jobs.remove(job_id);
        handle.complete();
    }
    Ok(publish)
}

/// Drops a job without settling it (abort path).
fn abandon_job(core: &mut Core, task: TaskId) {
    if let Some(job) = core.store.job_for_task(task) {
        let job_id = job.id;
        core.store.jobs.remove(job_id);
    }
}
