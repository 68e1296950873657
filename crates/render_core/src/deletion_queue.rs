//! Deferred deletion of device objects
//!
//! Resources register a teardown closure the moment they are created. The
//! closure captures only what is needed to free the object (raw handles and
//! the device), never the owning wrapper, so dropping the wrapper and
//! freeing the device object are decoupled. The render context flushes a
//! queue only at a point where no GPU work can still reference its objects.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::device::ResourceKind;

/// A queued teardown for one device object
pub struct DeletionTask {
    kind: ResourceKind,
    label: String,
    run: Box<dyn FnOnce() + Send>,
    settled: Option<Box<dyn Fn() -> bool + Send>>,
}

impl DeletionTask {
    /// Wrap a teardown closure
    pub fn new(kind: ResourceKind, label: impl Into<String>, run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind,
            label: label.into(),
            run: Box::new(run),
            settled: None,
        }
    }

    /// Let the queue drop this task unrun once `settled` reports true,
    /// i.e. once the object was freed some other way
    #[must_use]
    pub fn with_settled(mut self, settled: impl Fn() -> bool + Send + 'static) -> Self {
        self.settled = Some(Box::new(settled));
        self
    }

    /// Whether the object was already freed elsewhere
    pub fn is_settled(&self) -> bool {
        self.settled.as_ref().is_some_and(|settled| settled())
    }

    /// Kind of the object this task frees
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Debug label of the object
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for DeletionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionTask")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Append-only list of teardown tasks, executed newest first
pub struct DeletionQueue {
    name: String,
    tasks: Mutex<Vec<DeletionTask>>,
    flushing: AtomicBool,
}

impl DeletionQueue {
    /// Create an empty queue. The name only shows up in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Mutex::new(Vec::new()),
            flushing: AtomicBool::new(false),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a teardown. Safe to call from any thread.
    pub fn push(
        &self,
        kind: ResourceKind,
        label: impl Into<String>,
        run: impl FnOnce() + Send + 'static,
    ) {
        self.push_task(DeletionTask::new(kind, label, run));
    }

    /// Register an already built task.
    ///
    /// Tasks whose object was already freed through another queue are
    /// pruned here, so a long-lived queue does not grow with churn.
    pub fn push_task(&self, task: DeletionTask) {
        log::trace!("Queue '{}' <- {} '{}'", self.name, task.kind, task.label);
        let mut tasks = self.tasks.lock();
        tasks.retain(|queued| !queued.is_settled());
        tasks.push(task);
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Kinds of the queued tasks in registration order
    pub fn pending_kinds(&self) -> Vec<ResourceKind> {
        self.tasks.lock().iter().map(DeletionTask::kind).collect()
    }

    /// Run every queued task, most recently pushed first.
    ///
    /// The caller must guarantee that no submitted GPU work references any
    /// queued object. Tasks pushed while the flush runs land in the next
    /// flush. A panicking task aborts the process: the device is in an
    /// unknown state at that point.
    pub(crate) fn flush(&self) -> usize {
        let was_flushing = self.flushing.swap(true, Ordering::AcqRel);
        assert!(!was_flushing, "deletion queue '{}' flushed reentrantly", self.name);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let count = tasks.len();
        if count > 0 {
            log::debug!("Flushing {count} deletion task(s) from '{}'", self.name);
        }

        for task in tasks.into_iter().rev() {
            let DeletionTask { kind, label, run, .. } = task;
            log::trace!("Destroying {kind} '{label}'");
            if panic::catch_unwind(AssertUnwindSafe(run)).is_err() {
                log::error!(
                    "Deletion task for {kind} '{label}' panicked in queue '{}'; aborting",
                    self.name
                );
                std::process::abort();
            }
        }

        self.flushing.store(false, Ordering::Release);
        count
    }
}

impl std::fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("name", &self.name)
            .field("pending", &self.len())
            .finish()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        let pending = self.tasks.get_mut().len();
        if pending > 0 {
            log::warn!(
                "Deletion queue '{}' dropped with {pending} pending task(s); flushing now",
                self.name
            );
            self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recording_queue() -> (DeletionQueue, Arc<Mutex<Vec<u32>>>) {
        (DeletionQueue::new("test"), Arc::new(Mutex::new(Vec::new())))
    }

    #[test]
    fn test_flush_runs_newest_first_and_empties() {
        let (queue, log) = recording_queue();
        for i in 0..5 {
            let log = Arc::clone(&log);
            queue.push(ResourceKind::Buffer, format!("b{i}"), move || log.lock().push(i));
        }
        assert_eq!(queue.len(), 5);

        assert_eq!(queue.flush(), 5);
        assert_eq!(*log.lock(), vec![4, 3, 2, 1, 0]);
        assert!(queue.is_empty());
        assert_eq!(queue.flush(), 0);
    }

    #[test]
    fn test_tasks_pushed_during_flush_wait_for_the_next_one() {
        let queue = Arc::new(DeletionQueue::new("nested"));
        let ran = Arc::new(AtomicBool::new(false));
        {
            let queue2 = Arc::clone(&queue);
            let ran = Arc::clone(&ran);
            queue.push(ResourceKind::Image, "outer", move || {
                queue2.push(ResourceKind::ImageView, "inner", move || {
                    ran.store(true, Ordering::SeqCst);
                });
            });
        }
        queue.flush();
        assert_eq!(queue.len(), 1);
        assert!(!ran.load(Ordering::SeqCst));
        queue.flush();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(DeletionQueue::new("mt"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        queue.push(ResourceKind::Buffer, "b", || {});
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 200);
        assert_eq!(queue.flush(), 200);
    }

    #[test]
    fn test_settled_tasks_are_pruned_on_push() {
        let (queue, log) = recording_queue();
        let freed = Arc::new(AtomicBool::new(false));
        {
            let freed = Arc::clone(&freed);
            let log = Arc::clone(&log);
            queue.push_task(
                DeletionTask::new(ResourceKind::Buffer, "moved", move || log.lock().push(1))
                    .with_settled(move || freed.load(Ordering::Acquire)),
            );
        }
        queue.push(ResourceKind::Buffer, "kept", || {});
        assert_eq!(queue.len(), 2);

        freed.store(true, Ordering::Release);
        queue.push(ResourceKind::Buffer, "later", || {});
        assert_eq!(queue.len(), 2);
        queue.flush();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_drop_flushes_leftovers() {
        let (queue, log) = recording_queue();
        let log2 = Arc::clone(&log);
        queue.push(ResourceKind::Fence, "f", move || log2.lock().push(7));
        drop(queue);
        assert_eq!(*log.lock(), vec![7]);
    }
}
