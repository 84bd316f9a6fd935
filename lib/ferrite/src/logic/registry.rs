use crate::logic::job::{JobQueue, JobRunner};
use crate::logic::object::{DynJob, GameObject, Sn};
use crate::logic::thread::LogicHandle;
use flint::logging;
use hashbrown::HashMap;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Global addressable map from serial number to game object.
///
/// The registry is itself a job object bound to the dedicated core logic
/// thread: registration, removal and forwarding are queued jobs, so the
/// table is only ever touched by that one thread and needs no lock.
/// Serial-number generation is a bare atomic and safe from any thread.
pub struct ObjectRegistry {
    self_ref: Weak<ObjectRegistry>,
    queue: JobQueue,
    next_sn: AtomicU64,
    table: UnsafeCell<HashMap<Sn, Arc<GameObject>>>,
    log: logging::Logger,
}

unsafe impl Sync for ObjectRegistry {}

impl JobRunner for ObjectRegistry {
    fn job_queue(&self) -> &JobQueue {
        &self.queue
    }
}

impl ObjectRegistry {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        core_thread: LogicHandle,
        log: L,
    ) -> Arc<ObjectRegistry> {
        Arc::new_cyclic(|weak: &Weak<ObjectRegistry>| ObjectRegistry {
            self_ref: weak.clone(),
            queue: JobQueue::new(core_thread),
            next_sn: AtomicU64::new(1),
            table: UnsafeCell::new(HashMap::new()),
            log: logging::child(log),
        })
    }

    #[inline]
    fn arc(&self) -> Arc<ObjectRegistry> {
        self.self_ref.upgrade().expect("Registry used after teardown")
    }

    /// Monotonic, process-unique serial number. Safe from any thread.
    #[inline]
    pub fn generate_sn(&self) -> Sn {
        self.next_sn.fetch_add(1, Ordering::AcqRel)
    }

    /// Posts a job that runs with exclusive access to the table on the
    /// core thread.
    fn post_table<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut HashMap<Sn, Arc<GameObject>>) + Send + 'static,
    {
        let this = self.arc();
        self.queue.post(
            Box::new(move || {
                // Serialized by the registry's own job drain.
                let table = unsafe { &mut *this.table.get() };
                job(table);
            }),
            self.arc(),
        )
    }

    /// Publishes an object. Called at the end of scene enter, so observers
    /// can never address a half-initialized entity.
    pub fn register(&self, obj: Arc<GameObject>) {
        let log = self.log.clone();
        self.post_table(move |table| {
            logging::trace!(log, "object registered"; "context" => "register", "sn" => obj.sn());
            table.insert(obj.sn(), obj);
        });
    }

    pub fn unregister(&self, sn: Sn) {
        let log = self.log.clone();
        self.post_table(move |table| {
            logging::trace!(log, "object unregistered"; "context" => "unregister", "sn" => sn);
            table.remove(&sn);
        });
    }

    /// Forwards a job to the addressed object. The job is dropped when the
    /// serial number is no longer registered. The registry never executes
    /// the job itself; it always goes through the target's own queue, so
    /// per-object single-threaded execution holds.
    pub fn post_to(&self, sn: Sn, job: DynJob) {
        self.post_table(move |table| {
            if let Some(obj) = table.get(&sn) {
                obj.post(job);
            }
        });
    }

    /// Queries a snapshot of whether `sn` is currently registered; the
    /// answer arrives through `callback` on the core thread.
    pub fn query<F: FnOnce(bool) + Send + 'static>(&self, sn: Sn, callback: F) {
        self.post_table(move |table| callback(table.contains_key(&sn)));
    }
}
