use crate::logic::clock;
use crate::logic::job::JobRunner;
use crate::logic::scene::Scene;
use crossbeam::queue::SegQueue;
use flint::logging;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Logic thread pacing parameters.
#[derive(Debug, Copy, Clone)]
pub struct LogicConfig {
    /// Fixed-update integration period.
    pub fixed_step: Duration,
    /// Per-frame sleep budget.
    pub target_frame: Duration,
}

impl Default for LogicConfig {
    fn default() -> LogicConfig {
        LogicConfig {
            fixed_step: Duration::from_millis(20),
            target_frame: Duration::from_micros(16_660),
        }
    }
}

/// Fixed-step accumulator. The number of ticks produced for a given delta
/// sequence is deterministic, and a tick never observes a partial step.
pub struct FixedStep {
    step: Duration,
    accum: Duration,
}

impl FixedStep {
    #[inline]
    pub fn new(step: Duration) -> FixedStep {
        FixedStep { step, accum: Duration::from_secs(0) }
    }

    /// Adds `dt` to the accumulator and returns the number of whole fixed
    /// steps now due.
    pub fn advance(&mut self, dt: Duration) -> u32 {
        self.accum += dt;

        let mut ticks = 0;
        while self.accum >= self.step {
            self.accum -= self.step;
            ticks += 1;
        }

        ticks
    }
}

/// Shared state of one logic thread: its ready queue of scheduled job
/// objects, the scenes it owns, and the running latch.
pub struct LogicCore {
    name: String,
    config: LogicConfig,
    ready: SegQueue<Arc<dyn JobRunner>>,
    scenes: Mutex<Vec<Arc<Scene>>>,
    running: AtomicBool,
    log: logging::Logger,
}

/// Cloneable reference to a logic thread, used as the scheduling target of
/// job queues. Identity comparison decides migration.
#[derive(Clone)]
pub struct LogicHandle(Arc<LogicCore>);

impl LogicHandle {
    /// Enqueues a job object for draining on this thread.
    #[inline]
    pub fn schedule(&self, runner: Arc<dyn JobRunner>) {
        self.0.ready.push(runner);
    }

    #[inline]
    pub fn pop_ready(&self) -> Option<Arc<dyn JobRunner>> {
        self.0.ready.pop()
    }

    /// Two handles are the same thread when they share the core.
    #[inline]
    pub fn same(a: &LogicHandle, b: &LogicHandle) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn fixed_step(&self) -> Duration {
        self.0.config.fixed_step
    }

    pub fn add_scene(&self, scene: Arc<Scene>) {
        self.0.scenes.lock().push(scene);
    }

    pub fn remove_scene(&self, scene: &Arc<Scene>) {
        self.0.scenes.lock().retain(|s| !Arc::ptr_eq(s, scene));
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.0.running.load(Ordering::Acquire)
    }
}

/// A cooperative logic thread: drains scheduled job objects, runs
/// fixed-step updates at the configured rate and one per-frame update per
/// iteration over its scenes, then sleeps to the frame target.
pub struct LogicThread {
    handle: LogicHandle,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LogicThread {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        name: &str,
        config: LogicConfig,
        log: L,
    ) -> LogicThread {
        let core = Arc::new(LogicCore {
            name: name.to_string(),
            config,
            ready: SegQueue::new(),
            scenes: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            log: logging::child(log),
        });

        LogicThread {
            handle: LogicHandle(core),
            worker: Mutex::new(None),
        }
    }

    #[inline]
    pub fn handle(&self) -> LogicHandle {
        self.handle.clone()
    }

    /// Starts the cooperative loop. Idempotent: a running thread stays
    /// running.
    pub fn start(&self) {
        let core = &(self.handle.0);
        if core.running.swap(true, Ordering::AcqRel) {
            return;
        }

        logging::info!(core.log, "logic thread starting";
                       "context" => "start",
                       "thread" => %core.name,
                       "fixed_step" => ?core.config.fixed_step);

        let core = core.clone();
        let worker = thread::Builder::new()
            .name(format!("logic-{}", core.name))
            .spawn(move || Self::run(core))
            .expect("Error spawning logic thread");

        *self.worker.lock() = Some(worker);
    }

    /// Clears the running latch and joins. The loop performs one final
    /// drain before exiting so destruction jobs are honored.
    pub fn stop(&self) {
        self.handle.0.running.store(false, Ordering::Release);

        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }

    fn run(core: Arc<LogicCore>) {
        clock::reset(core.config.fixed_step);
        let mut pacer = FixedStep::new(core.config.fixed_step);
        let mut last = Instant::now();

        while core.running.load(Ordering::Acquire) {
            let now = Instant::now();
            let dt = now - last;
            last = now;
            clock::publish(dt);

            // 1. Drain scheduled job objects.
            while let Some(runner) = core.ready.pop() {
                runner.job_queue().flush(&runner);
            }

            // 2. Fixed-step updates.
            let scenes: Vec<_> = core.scenes.lock().clone();
            let ticks = pacer.advance(dt);
            for _ in 0..ticks {
                for scene in scenes.iter() {
                    scene.fixed_update();
                }
            }

            // 3. Per-frame update, exactly once per iteration.
            for scene in scenes.iter() {
                scene.update();
            }

            // 4. Sleep until the next frame boundary.
            let elapsed = now.elapsed();
            if elapsed < core.config.target_frame {
                thread::sleep(core.config.target_frame - elapsed);
            }
        }

        // Final drain so pending destruction jobs run before the thread
        // goes away.
        while let Some(runner) = core.ready.pop() {
            runner.job_queue().flush(&runner);
        }

        logging::info!(core.log, "logic thread stopped"; "context" => "run", "thread" => %core.name);
    }
}

impl Drop for LogicThread {
    fn drop(&mut self) {
        self.stop();
    }
}
