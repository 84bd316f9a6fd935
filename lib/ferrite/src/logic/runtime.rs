use crate::logic::registry::ObjectRegistry;
use crate::logic::scene::{Scene, SceneConfig};
use crate::logic::thread::{LogicConfig, LogicHandle, LogicThread};
use flint::logging;
use std::sync::Arc;

/// Logic runtime sizing.
#[derive(Debug, Copy, Clone)]
pub struct RuntimeConfig {
    /// Number of worker logic threads (the dedicated core thread for the
    /// registry is extra).
    pub logic_threads: usize,
    pub logic: LogicConfig,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            logic_threads: 2,
            logic: LogicConfig::default(),
        }
    }
}

/// Process-level owner of the logic side: the worker logic threads, the
/// dedicated core thread, and the object registry living on it. Explicit
/// start and stop; nothing is constructed lazily.
pub struct Runtime {
    core_thread: LogicThread,
    workers: Vec<LogicThread>,
    registry: Arc<ObjectRegistry>,
    log: logging::Logger,
}

impl Runtime {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(config: RuntimeConfig, log: L) -> Runtime {
        let log = logging::child(log);

        let core_thread = LogicThread::new("core", config.logic, &log);
        let workers: Vec<_> = (0..config.logic_threads.max(1))
            .map(|i| LogicThread::new(&format!("worker-{}", i), config.logic, &log))
            .collect();

        let registry = ObjectRegistry::new(core_thread.handle(), &log);

        Runtime {
            core_thread,
            workers,
            registry,
            log,
        }
    }

    pub fn start(&self) {
        logging::info!(self.log, "starting logic runtime";
                       "context" => "start",
                       "workers" => self.workers.len());

        self.core_thread.start();
        for worker in self.workers.iter() {
            worker.start();
        }
    }

    /// Stops the workers first so their final drains can still post
    /// unregister jobs, then the core thread drains those and exits.
    pub fn stop(&self) {
        for worker in self.workers.iter() {
            worker.stop();
        }
        self.core_thread.stop();

        logging::info!(self.log, "logic runtime stopped"; "context" => "stop");
    }

    #[inline]
    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    #[inline]
    pub fn logic_count(&self) -> usize {
        self.workers.len()
    }

    #[inline]
    pub fn logic(&self, index: usize) -> LogicHandle {
        self.workers[index].handle()
    }

    #[inline]
    pub fn core(&self) -> LogicHandle {
        self.core_thread.handle()
    }

    /// Creates a scene owned by the given logic thread and hands it to
    /// that thread's frame loop.
    pub fn create_scene(&self, thread_index: usize, config: SceneConfig) -> Arc<Scene> {
        let handle = self.workers[thread_index].handle();
        let scene = Scene::new(handle.clone(), self.registry.clone(), config, &self.log);
        handle.add_scene(scene.clone());
        scene
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}
