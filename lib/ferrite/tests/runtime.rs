//! End-to-end scenarios for the logic runtime: object lifecycle, scene
//! migration across live logic threads, registry addressing and interest
//! notifications.

use ferrite::prelude::*;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

#[derive(Debug, PartialEq, Eq)]
enum Note {
    Job(&'static str, ThreadId),
    Appear(Sn, Vec<Sn>),
    Disappear(Sn, Vec<Sn>),
    Exited,
}

struct Probe {
    x: i32,
    tx: mpsc::Sender<Note>,
}

impl Probe {
    fn new(tx: mpsc::Sender<Note>) -> Probe {
        Probe { x: 0, tx }
    }
}

impl GameLogic for Probe {
    fn as_any(&mut self) -> &mut dyn Any {
        self
    }

    fn on_exit(&mut self, _obj: &GameObject) {
        let _ = self.tx.send(Note::Exited);
    }

    fn on_appear(&mut self, obj: &GameObject, peers: &[Sn]) {
        let mut peers = peers.to_vec();
        peers.sort_unstable();
        let _ = self.tx.send(Note::Appear(obj.sn(), peers));
    }

    fn on_disappear(&mut self, obj: &GameObject, peers: &[Sn]) {
        let mut peers = peers.to_vec();
        peers.sort_unstable();
        let _ = self.tx.send(Note::Disappear(obj.sn(), peers));
    }
}

fn wait_until<F: FnMut() -> bool>(mut probe: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    probe()
}

#[test]
fn test_scene_migration() {
    let runtime = Runtime::new(RuntimeConfig { logic_threads: 2, ..Default::default() }, None);
    runtime.start();

    let scene_1 = runtime.create_scene(0, SceneConfig::default());
    let scene_2 = runtime.create_scene(1, SceneConfig::default());

    let (tx, rx) = mpsc::channel();
    let obj = scene_1.spawn(Probe::new(tx));
    let sn = obj.sn();

    // J1 before the move, J2 after; both through the same queue.
    obj.post(|state: &mut Probe, _obj| {
        state.x = 1;
        let _ = state.tx.send(Note::Job("j1", std::thread::current().id()));
    });
    obj.move_to_scene(&scene_2);
    obj.post(|state: &mut Probe, _obj| {
        assert_eq!(state.x, 1, "J1 must run before J2");
        state.x = 2;
        let _ = state.tx.send(Note::Job("j2", std::thread::current().id()));
    });

    let first = rx.recv_timeout(Duration::from_secs(2)).expect("J1 never ran");
    let second = loop {
        // The exit notification interleaves; skip it.
        match rx.recv_timeout(Duration::from_secs(2)).expect("J2 never ran") {
            Note::Exited => continue,
            note => break note,
        }
    };

    let (tag_1, thread_1) = match first {
        Note::Job(tag, thread) => (tag, thread),
        other => panic!("Unexpected note {:?}", other),
    };
    let (tag_2, thread_2) = match second {
        Note::Job(tag, thread) => (tag, thread),
        other => panic!("Unexpected note {:?}", other),
    };

    assert_eq!(tag_1, "j1");
    assert_eq!(tag_2, "j2");
    assert_ne!(thread_1, thread_2, "J2 must run on the new logic thread");

    // The object ends up in the second scene exactly once.
    assert!(wait_until(
        || scene_2.contains(sn) && !scene_1.contains(sn),
        Duration::from_secs(2)
    ));
    assert_eq!(scene_2.object_count(), 1);
    assert_eq!(scene_1.object_count(), 0);

    runtime.stop();
}

#[test]
fn test_appear_notifications_are_symmetric() {
    let runtime = Runtime::new(RuntimeConfig::default(), None);
    runtime.start();

    let scene = runtime.create_scene(
        0,
        SceneConfig { cell_size: 10.0, hysteresis: 1.0, ..Default::default() },
    );

    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();

    let a = scene.spawn(Probe::new(tx_a));
    assert!(wait_until(|| scene.contains(a.sn()), Duration::from_secs(2)));

    // B spawns next to A: both sides get an appear for the other.
    let b = scene.spawn(Probe::new(tx_b));

    let note_b = rx_b.recv_timeout(Duration::from_secs(2)).expect("B got no appear");
    assert_eq!(note_b, Note::Appear(b.sn(), vec![a.sn()]));

    let note_a = rx_a.recv_timeout(Duration::from_secs(2)).expect("A got no appear");
    assert_eq!(note_a, Note::Appear(a.sn(), vec![b.sn()]));

    runtime.stop();
}

#[test]
fn test_position_updates_route_disappear() {
    let runtime = Runtime::new(RuntimeConfig::default(), None);
    runtime.start();

    let scene = runtime.create_scene(
        0,
        SceneConfig {
            min_x: 0.0,
            min_z: 0.0,
            max_x: 100.0,
            max_z: 100.0,
            cell_size: 10.0,
            hysteresis: 1.0,
        },
    );

    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();

    let a = scene.spawn(Probe::new(tx_a));
    assert!(wait_until(|| scene.contains(a.sn()), Duration::from_secs(2)));
    let b = scene.spawn(Probe::new(tx_b));
    assert!(wait_until(|| scene.contains(b.sn()), Duration::from_secs(2)));

    // Drain the mutual appear notifications.
    let _ = rx_a.recv_timeout(Duration::from_secs(2)).unwrap();
    let _ = rx_b.recv_timeout(Duration::from_secs(2)).unwrap();

    // A walks far away; both sides observe the disappear.
    let sn_b = b.sn();
    a.post(move |_state: &mut Probe, obj| {
        let scene = obj.scene().expect("A must be in a scene");
        scene.update_position(obj, 55.0, 55.0);
    });

    let note_a = rx_a.recv_timeout(Duration::from_secs(2)).expect("A got no disappear");
    assert_eq!(note_a, Note::Disappear(a.sn(), vec![sn_b]));
    let note_b = rx_b.recv_timeout(Duration::from_secs(2)).expect("B got no disappear");
    assert_eq!(note_b, Note::Disappear(sn_b, vec![a.sn()]));

    runtime.stop();
}

#[test]
fn test_destroy_lifecycle() {
    let runtime = Runtime::new(RuntimeConfig::default(), None);
    runtime.start();

    let scene = runtime.create_scene(0, SceneConfig::default());

    let (tx, rx) = mpsc::channel();
    let obj = scene.spawn(Probe::new(tx));
    let sn = obj.sn();

    assert!(wait_until(|| scene.contains(sn), Duration::from_secs(2)));

    let destroyed = Arc::new(AtomicBool::new(false));
    let flag = destroyed.clone();
    let _token = obj.object().before_destroy.subscribe(move || {
        flag.store(true, Ordering::Release);
    });

    obj.destroy();

    // Exit hook ran, scene membership gone, destroy event fired.
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Note::Exited);
    assert!(wait_until(|| scene.object_count() == 0, Duration::from_secs(2)));
    assert!(wait_until(|| destroyed.load(Ordering::Acquire), Duration::from_secs(2)));

    // The registry forgets the serial number.
    let (qtx, qrx) = mpsc::channel();
    assert!(wait_until(
        || {
            let qtx = qtx.clone();
            runtime.registry().query(sn, move |present| {
                let _ = qtx.send(present);
            });
            match qrx.recv_timeout(Duration::from_secs(1)) {
                Ok(present) => !present,
                Err(_) => false,
            }
        },
        Duration::from_secs(2)
    ));

    // Posts are refused once the delete mark lands.
    assert!(wait_until(|| obj.object().is_marked_for_delete(), Duration::from_secs(2)));
    assert!(!obj.post(|_state: &mut Probe, _obj| {}));

    runtime.stop();
}

#[test]
fn test_registry_post_to_addresses_objects() {
    let runtime = Runtime::new(RuntimeConfig::default(), None);
    runtime.start();

    let scene = runtime.create_scene(0, SceneConfig::default());

    let (tx, rx) = mpsc::channel();
    let obj = scene.spawn(Probe::new(tx));
    let sn = obj.sn();
    assert!(wait_until(|| scene.contains(sn), Duration::from_secs(2)));

    runtime.registry().post_to(
        sn,
        Box::new(|state, _obj| {
            let state = state.as_any().downcast_mut::<Probe>().expect("Wrong state type");
            let _ = state.tx.send(Note::Job("routed", std::thread::current().id()));
        }),
    );

    match rx.recv_timeout(Duration::from_secs(2)).expect("Routed job never ran") {
        Note::Job("routed", _) => {}
        other => panic!("Unexpected note {:?}", other),
    }

    runtime.stop();
}
