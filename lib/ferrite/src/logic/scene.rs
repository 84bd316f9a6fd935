use crate::logic::aoi::AoiGrid;
use crate::logic::job::JobRunner;
use crate::logic::object::{GameLogic, GameObject, ObjectRef, Sn};
use crate::logic::registry::ObjectRegistry;
use crate::logic::thread::LogicHandle;
use flint::logging;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// World bounds and interest grid parameters of one scene.
#[derive(Debug, Copy, Clone)]
pub struct SceneConfig {
    pub min_x: f32,
    pub min_z: f32,
    pub max_x: f32,
    pub max_z: f32,
    pub cell_size: f32,
    pub hysteresis: f32,
}

impl Default for SceneConfig {
    fn default() -> SceneConfig {
        SceneConfig {
            min_x: 0.0,
            min_z: 0.0,
            max_x: 1000.0,
            max_z: 1000.0,
            cell_size: 100.0,
            hysteresis: 10.0,
        }
    }
}

struct SceneState {
    objects: Vec<Arc<GameObject>>,
    by_sn: HashMap<Sn, Arc<GameObject>>,
    grid: AoiGrid,
}

/// A container of game objects sharing one logic thread and one interest
/// grid. Membership and the grid are only mutated from the owning thread;
/// cross-object notifications leave through the targets' job queues.
pub struct Scene {
    self_ref: Weak<Scene>,
    thread: LogicHandle,
    registry: Arc<ObjectRegistry>,
    state: Mutex<SceneState>,
    log: logging::Logger,
}

impl Scene {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        thread: LogicHandle,
        registry: Arc<ObjectRegistry>,
        config: SceneConfig,
        log: L,
    ) -> Arc<Scene> {
        let grid = AoiGrid::new(
            config.min_x,
            config.min_z,
            config.max_x,
            config.max_z,
            config.cell_size,
            config.hysteresis,
        );

        Arc::new_cyclic(|weak: &Weak<Scene>| Scene {
            self_ref: weak.clone(),
            thread,
            registry,
            state: Mutex::new(SceneState {
                objects: Vec::new(),
                by_sn: HashMap::new(),
                grid,
            }),
            log: logging::child(log),
        })
    }

    #[inline]
    fn arc(&self) -> Arc<Scene> {
        self.self_ref.upgrade().expect("Scene used after teardown")
    }

    #[inline]
    pub fn thread(&self) -> LogicHandle {
        self.thread.clone()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn contains(&self, sn: Sn) -> bool {
        self.state.lock().by_sn.contains_key(&sn)
    }

    /// The factory: allocates the object fully, then posts a one-shot
    /// enter job to its queue. The object becomes observable to other
    /// threads only once enter publishes it to the registry.
    pub fn spawn<T: GameLogic>(&self, state: T) -> ObjectRef<T> {
        let obj = GameObject::new(
            Box::new(state),
            self.thread.clone(),
            self.registry.clone(),
            &self.log,
        );

        let scene = self.arc();
        let target = obj.clone();
        obj.job_queue().post(
            Box::new(move || {
                scene.enter(&target);
            }),
            obj.clone(),
        );

        ObjectRef::new(obj)
    }

    /// Adds the object to the scene: membership, back-pointer, enter hook,
    /// interest grid, and only then registry publication, in that order.
    /// Runs on the scene's logic thread inside the object's job drain.
    pub fn enter(&self, obj: &Arc<GameObject>) {
        let sn = obj.sn();

        {
            let mut state = self.state.lock();
            if state.by_sn.contains_key(&sn) {
                logging::warn!(self.log, "object already in scene";
                               "context" => "enter", "sn" => sn);
                return;
            }
            state.objects.push(obj.clone());
            state.by_sn.insert(sn, obj.clone());
        }

        obj.set_scene(Some(self.arc()));

        // Inside the object's drain on the owning thread.
        let (x, z) = {
            let state = unsafe { obj.state_mut() };
            state.on_enter(obj);
            state.position()
        };

        let appeared = self.state.lock().grid.insert(sn, x, z);

        logging::debug!(self.log, "object entered scene";
                        "context" => "enter",
                        "sn" => sn,
                        "visible" => appeared.len());

        if !appeared.is_empty() {
            self.route(obj, appeared, true);
        }

        self.registry.register(obj.clone());
    }

    /// Removes the object: exit hook, interest grid withdrawal, cleared
    /// back-pointer, membership removal.
    pub fn exit(&self, obj: &GameObject) {
        let sn = obj.sn();

        if !self.state.lock().by_sn.contains_key(&sn) {
            obj.set_scene(None);
            return;
        }

        {
            let state = unsafe { obj.state_mut() };
            state.on_exit(obj);
        }

        let disappeared = self.state.lock().grid.remove(sn);
        if !disappeared.is_empty() {
            self.route(obj, disappeared, false);
        }

        obj.set_scene(None);

        let mut state = self.state.lock();
        state.objects.retain(|other| other.sn() != sn);
        state.by_sn.remove(&sn);

        logging::debug!(self.log, "object left scene"; "context" => "exit", "sn" => sn);
    }

    /// Pushes a position change into the interest grid and routes the
    /// resulting appear/disappear deltas. Call from the owning thread only
    /// (components do, from their fixed update).
    pub fn update_position(&self, obj: &GameObject, x: f32, z: f32) {
        let delta = self.state.lock().grid.update(obj.sn(), x, z);

        if let Some(delta) = delta {
            if !delta.appeared.is_empty() {
                self.route(obj, delta.appeared, true);
            }
            if !delta.disappeared.is_empty() {
                self.route(obj, delta.disappeared, false);
            }
        }
    }

    /// Current nine-cell neighborhood of a position.
    pub fn nearby(&self, x: f32, z: f32, exclude: Sn) -> Vec<Sn> {
        self.state.lock().grid.nearby(x, z, exclude)
    }

    /// Symmetric delta routing: the moving object learns about the whole
    /// set, every member of the set learns about the moving object. All
    /// notifications travel as jobs, so each target observes them on its
    /// own thread in its own order.
    fn route(&self, obj: &GameObject, peers: Vec<Sn>, appear: bool) {
        let sn = obj.sn();

        let peer_list = peers.clone();
        obj.post(Box::new(move |state, obj| {
            if appear {
                state.on_appear(obj, &peer_list);
            } else {
                state.on_disappear(obj, &peer_list);
            }
        }));

        let state = self.state.lock();
        for peer_sn in peers {
            if let Some(peer) = state.by_sn.get(&peer_sn) {
                peer.post(Box::new(move |state, obj| {
                    if appear {
                        state.on_appear(obj, &[sn]);
                    } else {
                        state.on_disappear(obj, &[sn]);
                    }
                }));
            }
        }
    }

    /// One fixed tick over the scene's objects. Runs on the owning logic
    /// thread; the member list is snapshotted so hooks may enter or exit
    /// objects mid-iteration.
    pub(crate) fn fixed_update(&self) {
        let objects: Vec<_> = self.state.lock().objects.clone();
        for obj in objects.iter() {
            let state = unsafe { obj.state_mut() };
            state.on_fixed_update(obj);
        }
    }

    /// One per-frame update over the scene's objects.
    pub(crate) fn update(&self) {
        let objects: Vec<_> = self.state.lock().objects.clone();
        for obj in objects.iter() {
            let state = unsafe { obj.state_mut() };
            state.on_update(obj);
        }
    }
}
