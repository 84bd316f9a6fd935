use crate::logic::thread::LogicHandle;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A unit of deferred work executed on the owning logic thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Anything with its own job queue that can be scheduled on a logic thread.
/// Game objects and the object registry both implement this.
pub trait JobRunner: Send + Sync {
    fn job_queue(&self) -> &JobQueue;
}

/// Per-owner single-consumer job queue with a scheduling latch.
///
/// `processing` guarantees at most one logic thread drains the queue at a
/// time. `marked_for_delete` is a one-way latch: once set, new posts are
/// refused and the current drain stops executing further jobs; the owner is
/// destroyed when its last reference drops after that drain.
pub struct JobQueue {
    jobs: SegQueue<Job>,
    processing: AtomicBool,
    marked_for_delete: AtomicBool,
    thread: Mutex<LogicHandle>,
}

impl JobQueue {
    #[inline]
    pub fn new(thread: LogicHandle) -> JobQueue {
        JobQueue {
            jobs: SegQueue::new(),
            processing: AtomicBool::new(false),
            marked_for_delete: AtomicBool::new(false),
            thread: Mutex::new(thread),
        }
    }

    /// Enqueues a job and schedules `this` on its logic thread if nobody
    /// else already did. Returns false when the owner is marked for delete;
    /// a refused job is never executed.
    pub fn post(&self, job: Job, this: Arc<dyn JobRunner>) -> bool {
        self.jobs.push(job);

        if self.marked_for_delete.load(Ordering::Acquire) {
            return false;
        }

        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.thread.lock().schedule(this);
        }

        true
    }

    /// Drains the queue on the current logic thread.
    ///
    /// Two complications are handled explicitly. A job may migrate the
    /// owner to another logic thread; the drain detects the change after
    /// each job, re-schedules the owner over there with the processing
    /// latch still set, and returns - the new thread owns the remaining
    /// work. And after the latch is cleared, the queue length is rechecked
    /// so a job enqueued between the last pop and the clear is never
    /// stranded.
    pub fn flush(&self, this: &Arc<dyn JobRunner>) {
        let origin = self.thread.lock().clone();

        while !self.marked_for_delete.load(Ordering::Acquire) {
            let job = match self.jobs.pop() {
                Some(job) => job,
                None => break,
            };

            job();

            let current = self.thread.lock().clone();
            if !LogicHandle::same(&origin, &current) {
                current.schedule(this.clone());
                return;
            }
        }

        self.processing.store(false, Ordering::Release);

        // Lost wakeup prevention.
        if !self.jobs.is_empty()
            && !self.marked_for_delete.load(Ordering::Acquire)
            && self
                .processing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.thread.lock().schedule(this.clone());
        }
    }

    /// One-way latch; posts are refused from here on.
    #[inline]
    pub fn mark_for_delete(&self) {
        self.marked_for_delete.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_marked_for_delete(&self) -> bool {
        self.marked_for_delete.load(Ordering::Acquire)
    }

    /// Retargets the owner to another logic thread. Called from a job
    /// running on the current thread; the in-progress drain picks the
    /// change up and hands the owner over.
    #[inline]
    pub fn set_thread(&self, thread: LogicHandle) {
        *self.thread.lock() = thread;
    }

    #[inline]
    pub fn thread(&self) -> LogicHandle {
        self.thread.lock().clone()
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::thread::LogicThread;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        queue: JobQueue,
        runs: AtomicUsize,
    }

    impl Counter {
        fn new(thread: LogicHandle) -> Arc<Counter> {
            Arc::new(Counter {
                queue: JobQueue::new(thread),
                runs: AtomicUsize::new(0),
            })
        }
    }

    impl JobRunner for Counter {
        fn job_queue(&self) -> &JobQueue {
            &self.queue
        }
    }

    fn drain(thread: &LogicHandle) {
        while let Some(runner) = thread.pop_ready() {
            runner.job_queue().flush(&runner);
        }
    }

    #[test]
    fn test_post_runs_once() {
        let thread = LogicThread::new("test", Default::default(), None).handle();
        let counter = Counter::new(thread.clone());

        let target = counter.clone();
        let posted = counter.queue.post(
            Box::new(move || {
                target.runs.fetch_add(1, Ordering::AcqRel);
            }),
            counter.clone(),
        );

        assert!(posted);
        drain(&thread);
        assert_eq!(counter.runs.load(Ordering::Acquire), 1);

        // Nothing left scheduled.
        assert!(thread.pop_ready().is_none());
        assert_eq!(counter.queue.pending(), 0);
    }

    #[test]
    fn test_posts_preserve_order() {
        let thread = LogicThread::new("test", Default::default(), None).handle();
        let counter = Counter::new(thread.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            counter.queue.post(
                Box::new(move || {
                    order.lock().push(i);
                }),
                counter.clone(),
            );
        }

        drain(&thread);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_marked_for_delete_refuses_posts() {
        let thread = LogicThread::new("test", Default::default(), None).handle();
        let counter = Counter::new(thread.clone());

        counter.queue.mark_for_delete();

        let target = counter.clone();
        let posted = counter.queue.post(
            Box::new(move || {
                target.runs.fetch_add(1, Ordering::AcqRel);
            }),
            counter.clone(),
        );

        assert!(!posted);
        drain(&thread);
        // The refused job never ran.
        assert_eq!(counter.runs.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_drain_stops_at_delete_mark() {
        let thread = LogicThread::new("test", Default::default(), None).handle();
        let counter = Counter::new(thread.clone());

        // First job marks the owner; the second must never run.
        let marker = counter.clone();
        counter.queue.post(Box::new(move || marker.queue.mark_for_delete()), counter.clone());

        let target = counter.clone();
        counter.queue.post(
            Box::new(move || {
                target.runs.fetch_add(1, Ordering::AcqRel);
            }),
            counter.clone(),
        );

        drain(&thread);
        assert_eq!(counter.runs.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_post_during_drain_still_runs() {
        let thread = LogicThread::new("test", Default::default(), None).handle();
        let counter = Counter::new(thread.clone());

        // A job posted while the drain is in progress loses the scheduling
        // CAS; the drain loop or the post-clear recheck must pick it up.
        let outer = counter.clone();
        counter.queue.post(
            Box::new(move || {
                let inner = outer.clone();
                let posted = outer.queue.post(
                    Box::new(move || {
                        inner.runs.fetch_add(1, Ordering::AcqRel);
                    }),
                    outer.clone(),
                );
                assert!(posted);
            }),
            counter.clone(),
        );

        drain(&thread);
        assert_eq!(counter.runs.load(Ordering::Acquire), 1);
        assert_eq!(counter.queue.pending(), 0);
        assert!(!counter.queue.processing.load(Ordering::Acquire));
    }

    #[test]
    fn test_migration_reschedules_on_new_thread() {
        let thread_a = LogicThread::new("a", Default::default(), None).handle();
        let thread_b = LogicThread::new("b", Default::default(), None).handle();
        let counter = Counter::new(thread_a.clone());

        // Job 1 migrates the owner, job 2 must execute on thread B.
        let mover = counter.clone();
        let target_b = thread_b.clone();
        counter.queue.post(
            Box::new(move || {
                mover.queue.set_thread(target_b.clone());
            }),
            counter.clone(),
        );

        let target = counter.clone();
        counter.queue.post(
            Box::new(move || {
                target.runs.fetch_add(1, Ordering::AcqRel);
            }),
            counter.clone(),
        );

        // Drain A: the first job runs, the migration is detected, and the
        // owner moves to B's ready queue with the latch still set.
        drain(&thread_a);
        assert_eq!(counter.runs.load(Ordering::Acquire), 0);
        assert!(counter.queue.processing.load(Ordering::Acquire));
        assert!(thread_a.pop_ready().is_none());

        // Drain B: the remaining job executes there.
        drain(&thread_b);
        assert_eq!(counter.runs.load(Ordering::Acquire), 1);
        assert!(!counter.queue.processing.load(Ordering::Acquire));
    }
}
