use crate::logic::event::Event;
use crate::logic::job::{JobQueue, JobRunner};
use crate::logic::registry::ObjectRegistry;
use crate::logic::scene::Scene;
use crate::logic::thread::LogicHandle;
use flint::logging;
use parking_lot::Mutex;
use std::any::Any;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Process-wide monotonic serial number; the address of a game object for
/// cross-thread messaging.
pub type Sn = u64;

/// Entity behavior implemented by the game layer. Hooks run on the owning
/// logic thread: lifecycle hooks inside the object's job drain, the update
/// hooks from the scene's frame loop.
pub trait GameLogic: Send + 'static {
    fn as_any(&mut self) -> &mut dyn Any;

    /// Current world position, sampled when the object enters a scene.
    fn position(&self) -> (f32, f32) {
        (0.0, 0.0)
    }

    fn on_enter(&mut self, _obj: &GameObject) {}
    fn on_exit(&mut self, _obj: &GameObject) {}
    fn on_fixed_update(&mut self, _obj: &GameObject) {}
    fn on_update(&mut self, _obj: &GameObject) {}
    fn on_appear(&mut self, _obj: &GameObject, _peers: &[Sn]) {}
    fn on_disappear(&mut self, _obj: &GameObject, _peers: &[Sn]) {}
}

/// A job with access to the owning object's state.
pub type DynJob = Box<dyn FnOnce(&mut dyn GameLogic, &GameObject) + Send + 'static>;

/// A schedulable game entity: a job queue plus the boxed game state it
/// serializes access to.
///
/// State access discipline: jobs run under the queue's processing latch,
/// scene update hooks run on the owning logic thread between drains. Both
/// paths are confined to one thread at any given time, which is what the
/// manual `Sync` below relies on.
pub struct GameObject {
    self_ref: Weak<GameObject>,
    sn: Sn,
    queue: JobQueue,
    state: UnsafeCell<Box<dyn GameLogic>>,
    scene: Mutex<Option<Arc<Scene>>>,
    registry: Arc<ObjectRegistry>,
    /// Fires inside the destroy job, before the object unregisters.
    pub before_destroy: Event,
    log: logging::Logger,
}

unsafe impl Sync for GameObject {}

impl JobRunner for GameObject {
    fn job_queue(&self) -> &JobQueue {
        &self.queue
    }
}

impl GameObject {
    /// Allocates a fully constructed object bound to a logic thread. The
    /// object is not in any scene and not registered yet; `Scene::spawn`
    /// is the factory that makes it live.
    pub(crate) fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        state: Box<dyn GameLogic>,
        thread: LogicHandle,
        registry: Arc<ObjectRegistry>,
        log: L,
    ) -> Arc<GameObject> {
        let sn = registry.generate_sn();
        let log = logging::child(log);

        Arc::new_cyclic(|weak: &Weak<GameObject>| GameObject {
            self_ref: weak.clone(),
            sn,
            queue: JobQueue::new(thread),
            state: UnsafeCell::new(state),
            scene: Mutex::new(None),
            registry,
            before_destroy: Event::new(),
            log,
        })
    }

    #[inline]
    fn arc(&self) -> Arc<GameObject> {
        self.self_ref.upgrade().expect("Game object used after destruction")
    }

    #[inline]
    pub fn sn(&self) -> Sn {
        self.sn
    }

    #[inline]
    pub fn scene(&self) -> Option<Arc<Scene>> {
        self.scene.lock().clone()
    }

    #[inline]
    pub(crate) fn set_scene(&self, scene: Option<Arc<Scene>>) {
        *self.scene.lock() = scene;
    }

    #[inline]
    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    #[inline]
    pub fn is_marked_for_delete(&self) -> bool {
        self.queue.is_marked_for_delete()
    }

    /// Posts a job with access to the object's state. Returns false when
    /// the object is marked for delete.
    pub fn post(&self, job: DynJob) -> bool {
        let this = self.arc();
        self.queue.post(
            Box::new(move || {
                // The drain's processing latch makes this access exclusive.
                let state = unsafe { &mut *this.state.get() };
                job(state.as_mut(), &this);
            }),
            self.arc(),
        )
    }

    /// State access for the scene frame loop. Caller must be the owning
    /// logic thread.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn state_mut(&self) -> &mut dyn GameLogic {
        (*self.state.get()).as_mut()
    }

    /// Migrates the object to another scene. Two jobs: the first exits the
    /// current scene and retargets the job queue, which makes the drain
    /// hand the object over; the second runs on the new thread and enters
    /// the new scene.
    pub fn move_to_scene(&self, new_scene: &Arc<Scene>) {
        let this = self.arc();
        let target = new_scene.clone();
        self.queue.post(
            Box::new(move || {
                let same = this.scene().map_or(false, |scene| Arc::ptr_eq(&scene, &target));
                if same {
                    return;
                }

                if let Some(current) = this.scene() {
                    current.exit(&this);
                }

                this.queue.set_thread(target.thread());
            }),
            self.arc(),
        );

        let this = self.arc();
        let target = new_scene.clone();
        self.queue.post(
            Box::new(move || {
                target.enter(&this);
            }),
            self.arc(),
        );
    }

    /// Posts the destruction job: exit the scene, fire the destroy event,
    /// unregister, then mark for delete. The drainer drops the last
    /// transient reference after the drain; posters never destroy.
    pub fn destroy(&self) {
        let this = self.arc();
        self.queue.post(
            Box::new(move || {
                logging::debug!(this.log, "destroying object";
                                "context" => "destroy", "sn" => this.sn);

                if let Some(scene) = this.scene() {
                    scene.exit(&this);
                }

                this.before_destroy.invoke();
                this.registry.unregister(this.sn);
                this.queue.mark_for_delete();
            }),
            self.arc(),
        );
    }
}

/// Typed handle to a game object. The only way for outside code to touch
/// the state is to post through it.
pub struct ObjectRef<T: GameLogic> {
    obj: Arc<GameObject>,
    _marker: PhantomData<fn(T)>,
}

impl<T: GameLogic> Clone for ObjectRef<T> {
    fn clone(&self) -> ObjectRef<T> {
        ObjectRef {
            obj: self.obj.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: GameLogic> ObjectRef<T> {
    pub(crate) fn new(obj: Arc<GameObject>) -> ObjectRef<T> {
        ObjectRef { obj, _marker: PhantomData }
    }

    #[inline]
    pub fn sn(&self) -> Sn {
        self.obj.sn()
    }

    #[inline]
    pub fn object(&self) -> &Arc<GameObject> {
        &self.obj
    }

    /// Posts a job that receives the concrete state type.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut T, &GameObject) + Send + 'static,
    {
        self.obj.post(Box::new(move |state, obj| match state.as_any().downcast_mut::<T>() {
            Some(state) => job(state, obj),
            None => debug_assert!(false, "Object state type mismatch"),
        }))
    }

    #[inline]
    pub fn move_to_scene(&self, scene: &Arc<Scene>) {
        self.obj.move_to_scene(scene);
    }

    #[inline]
    pub fn destroy(&self) {
        self.obj.destroy();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::logic::thread::LogicThread;

    pub(crate) struct NullLogic;

    impl GameLogic for NullLogic {
        fn as_any(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// A detached object for unit tests that only need the shell.
    pub(crate) fn bare_object() -> (LogicThread, Arc<GameObject>) {
        let thread = LogicThread::new("test", Default::default(), None);
        let registry = ObjectRegistry::new(thread.handle(), None);
        let obj = GameObject::new(Box::new(NullLogic), thread.handle(), registry, None);
        (thread, obj)
    }

    #[test]
    fn test_sn_is_assigned_at_construction() {
        let thread = LogicThread::new("test", Default::default(), None);
        let registry = ObjectRegistry::new(thread.handle(), None);

        let a = GameObject::new(Box::new(NullLogic), thread.handle(), registry.clone(), None);
        let b = GameObject::new(Box::new(NullLogic), thread.handle(), registry, None);

        assert!(b.sn() > a.sn());
    }

    #[test]
    fn test_post_refused_after_delete_mark() {
        let (_thread, obj) = bare_object();
        obj.job_queue().mark_for_delete();

        assert!(!obj.post(Box::new(|_, _| {})));
        assert!(obj.is_marked_for_delete());
    }
}
