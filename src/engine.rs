use spdlog::{debug, error};
use std::hint::spin_loop;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::thread;
use std::time::Duration;

const SPIN_STEPS: u32 = 64;
const YIELD_STEPS: u32 = 1024;

struct Worker {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Owns polling worker threads.
///
/// A worker repeatedly calls its runnable, which returns whether it did any
/// work. Idle workers back off from spinning to yielding to short sleeps.
/// Shutdown stops workers one at a time in the order they were started, and
/// each worker keeps calling its runnable until it reports no work, so
/// upstream workers finish draining before downstream ones stop.
pub struct WorkerEngine {
    workers: Vec<Worker>,
    idle_sleep: Duration,
    pin_cores: bool,
}

impl WorkerEngine {
    pub fn new(idle_sleep: Duration) -> Self {
        Self {
            workers: vec![],
            idle_sleep,
            pin_cores: false,
        }
    }

    pub fn set_pin_cores(&mut self, pin_cores: bool) {
        self.pin_cores = pin_cores;
    }

    pub fn run_worker(
        &mut self,
        name: impl Into<String>,
        mut runnable: impl FnMut() -> bool + Send + 'static,
    ) {
        let name = name.into();
        let worker_id = self.workers.len();
        let running = Arc::new(AtomicBool::new(true));
        let idle_sleep = self.idle_sleep;
        let pin_cores = self.pin_cores;

        let thread_running = running.clone();
        let thread_name = name.clone();
        let handle = thread::spawn(move || {
            if pin_cores {
                if let Some(core_ids) = core_affinity::get_core_ids() {
                    if let Some(core_id) = core_ids.get(worker_id % core_ids.len()) {
                        core_affinity::set_for_current(*core_id);
                    }
                }
            }

            let mut idle_steps = 0u32;
            while thread_running.load(Acquire) {
                if runnable() {
                    idle_steps = 0;
                    continue;
                }
                idle_steps = idle_steps.saturating_add(1);
                if idle_steps <= SPIN_STEPS {
                    spin_loop();
                } else if idle_steps <= YIELD_STEPS {
                    thread::yield_now();
                } else {
                    thread::sleep(idle_sleep);
                }
            }

            // Drain whatever is still queued.
            while runnable() {}
            debug!("[Worker:{}] stopped", thread_name);
        });

        self.workers.push(Worker {
            name,
            running,
            handle: Some(handle),
        });
    }

    /// True if a worker exited on its own, which only happens on panic.
    pub fn is_any_worker_panicked(&self) -> bool {
        self.workers.iter().any(|w| {
            w.running.load(Acquire) && w.handle.as_ref().is_some_and(|h| h.is_finished())
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops, drains and joins every worker in start order.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.running.store(false, Release);
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    error!("[Worker:{}] panicked", worker.name);
                }
            }
        }
    }
}

impl Drop for WorkerEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
