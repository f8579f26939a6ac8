//! Worker pool bridging foreign threads into the graph.
//!
//! Graph mutations must not be made by a thread that already holds a graph
//! or node lock. [`AsyncEngine::wait_job`] lets setup code (or any thread
//! that is not a worker) run a closure on a pool thread and block for its
//! result; fire-and-forget work goes through [`AsyncEngine::submit`].
//!
//! The engine is an ordinary value owned by the application. Its lifecycle is
//! `idle → running → shut down`; the thread count can only be changed while
//! idle.
//!
//! ```
//! use conduit_core::jobs::AsyncEngine;
//!
//! let engine = AsyncEngine::with_threads(2).unwrap();
//! let answer = engine.wait_job(|| 6 * 7).unwrap();
//! assert_eq!(answer, 42);
//! engine.shutdown();
//! ```

use std::cell::Cell;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

enum Phase {
    Idle,
    Running {
        sender: Sender<Job>,
        workers: Vec<JoinHandle<()>>,
    },
    ShutDown,
}

struct Inner {
    threads: usize,
    phase: Phase,
}

/// Pool of worker threads fed by a FIFO job queue.
pub struct AsyncEngine {
    inner: Mutex<Inner>,
}

impl AsyncEngine {
    /// An idle engine sized to the machine's available parallelism.
    pub fn new() -> Self {
        let threads = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            inner: Mutex::new(Inner {
                threads,
                phase: Phase::Idle,
            }),
        }
    }

    /// An idle engine with `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let engine = Self::new();
        engine.set_threads(threads)?;
        Ok(engine)
    }

    /// Changes the worker count. Fails once the engine has started.
    pub fn set_threads(&self, threads: usize) -> Result<()> {
        if threads == 0 {
            return Err(Error::Runtime("the job engine needs at least one thread".into()));
        }
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Idle => {
                inner.threads = threads;
                Ok(())
            }
            Phase::Running { .. } => Err(Error::Runtime(
                "cannot change the thread count of a running job engine".into(),
            )),
            Phase::ShutDown => Err(Error::Runtime("job engine is shut down".into())),
        }
    }

    /// Configured worker count.
    pub fn threads(&self) -> usize {
        self.inner.lock().threads
    }

    /// True between [`start`](Self::start) and [`shutdown`](Self::shutdown).
    pub fn is_running(&self) -> bool {
        matches!(self.inner.lock().phase, Phase::Running { .. })
    }

    /// Spawns the workers. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Running { .. } => return Ok(()),
            Phase::ShutDown => return Err(Error::Runtime("job engine is shut down".into())),
            Phase::Idle => {}
        }

        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(inner.threads);
        for index in 0..inner.threads {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("conduit-worker-{index}"))
                .spawn(move || worker_loop(receiver));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    drop(sender);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(Error::Runtime(format!("failed to spawn worker thread: {err}")));
                }
            }
        }
        tracing::debug!(threads = inner.threads, "job engine started");
        inner.phase = Phase::Running { sender, workers };
        Ok(())
    }

    /// Queues `job` on the pool, starting the engine if needed.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.start()?;
        let inner = self.inner.lock();
        let Phase::Running { sender, .. } = &inner.phase else {
            return Err(Error::Runtime("job engine is shut down".into()));
        };
        sender
            .send(Box::new(job))
            .map_err(|_| Error::Runtime("job queue is closed".into()))
    }

    /// Runs `job` on a worker and blocks until it returns its value.
    ///
    /// Called from a worker thread, runs `job` inline so a job may itself
    /// wait on jobs without exhausting the pool.
    ///
    /// # Panics
    ///
    /// Resumes the panic of `job` on the calling thread.
    pub fn wait_job<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if ON_WORKER.get() {
            return Ok(job());
        }
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.submit(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = sender.send(outcome);
        })?;
        match receiver.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(Error::Runtime("job was dropped before it ran".into())),
        }
    }

    /// Runs every queued job, then joins the workers. Idempotent.
    pub fn shutdown(&self) {
        let phase = std::mem::replace(&mut self.inner.lock().phase, Phase::ShutDown);
        let Phase::Running { sender, workers } = phase else {
            return;
        };
        drop(sender);
        let me = thread::current().id();
        for worker in workers {
            if worker.thread().id() == me {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("job worker exited by panic");
            }
        }
        tracing::debug!("job engine shut down");
    }
}

impl Default for AsyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AsyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for AsyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        let phase = match inner.phase {
            Phase::Idle => "idle",
            Phase::Running { .. } => "running",
            Phase::ShutDown => "shut down",
        };
        f.debug_struct("AsyncEngine")
            .field("threads", &inner.threads)
            .field("phase", &phase)
            .finish()
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    ON_WORKER.set(true);
    while let Ok(job) = receiver.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(worker = ?thread::current().name(), "job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_threads_is_rejected() {
        assert!(AsyncEngine::with_threads(0).is_err());
        assert!(AsyncEngine::new().threads() >= 1);
    }

    #[test]
    fn thread_count_is_frozen_once_running() {
        let engine = AsyncEngine::with_threads(2).unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        assert!(matches!(engine.set_threads(4), Err(Error::Runtime(_))));
        assert_eq!(engine.threads(), 2);
    }

    #[test]
    fn submit_starts_lazily_and_shutdown_drains() {
        let engine = AsyncEngine::with_threads(3).unwrap();
        assert!(!engine.is_running());
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let count = Arc::clone(&count);
            engine
                .submit(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        engine.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 100);
        assert!(engine.submit(|| {}).is_err());
        assert!(engine.start().is_err());
    }

    #[test]
    fn nested_wait_runs_inline() {
        let engine = Arc::new(AsyncEngine::with_threads(1).unwrap());
        let inner = Arc::clone(&engine);
        let value = engine
            .wait_job(move || inner.wait_job(|| 5).unwrap() + 1)
            .unwrap();
        assert_eq!(value, 6);
    }

    #[test]
    fn panics_resume_on_the_caller_and_the_pool_survives() {
        let engine = AsyncEngine::with_threads(1).unwrap();
        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.wait_job(|| -> u8 { panic!("job failed") })
        }));
        assert!(caught.is_err());
        assert_eq!(engine.wait_job(|| "still here").unwrap(), "still here");
    }
}
