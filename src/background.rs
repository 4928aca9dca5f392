//! Deferred mark-sweep.
//!
//! By default a generation is swept on the thread whose action may have
//! orphaned a cycle. While background processing is enabled those sweeps
//! are queued instead, and run by whoever calls [`process`] or by a
//! [`Worker`] thread.
//!
//! ```
//! use cyptr::background;
//!
//! background::enable();
//! // ... drop cycles; their sweeps are queued ...
//! background::process(false, 0);
//! background::disable();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::thread::JoinHandle;

use log::debug;

use crate::error::{Error, Result};
use crate::impl_::background as background_impl;

/// Install the background queue. Returns false if it was already enabled.
pub fn enable() -> bool {
    background_impl::enable()
}

/// Drain the queue, sweeping everything still pending, and uninstall it.
///
/// Returns the number of sweeps the queue ran while it was enabled,
/// including those run by a worker thread.
pub fn disable() -> usize {
    background_impl::disable()
}

pub fn is_enabled() -> bool {
    background_impl::instance().is_some()
}

/// Number of generations waiting to be swept.
pub fn pending() -> usize {
    background_impl::instance().map_or(0, |background| background.pending())
}

/// Sweep one queued generation. With `wait`, blocks until there is work or
/// background processing is disabled. Returns whether a sweep ran.
pub fn process_one(wait: bool) -> bool {
    match background_impl::instance() {
        Some(background) => background.process_one(wait),
        None => false,
    }
}

/// Run up to `count` queued sweeps (`0` for no limit) and return how many
/// ran.
pub fn process(wait: bool, count: usize) -> usize {
    match background_impl::instance() {
        Some(background) => background.process(wait, count),
        None => 0,
    }
}

/// Run `k`, holding back the sweeps it requests on this thread until the
/// outermost `batch` returns. Each affected generation is then swept once.
///
/// Every dropped handle to a value still referenced through an edge costs a
/// sweep of its whole generation, so walking a large structure with a
/// cursor handle is quadratic when sweeps run inline. Wrapping the walk in
/// `batch` makes it linear:
///
/// ```
/// use cyptr::{background, Cyptr, Edge};
///
/// struct List {
///     next: Edge<List>,
/// }
///
/// let head = Cyptr::new_cyclic(|node| List { next: Edge::new(node) });
/// let mut tail = head.clone();
/// for _ in 0..100 {
///     let node = Cyptr::new_cyclic(|node| List { next: Edge::new(node) });
///     tail.next.set(Some(&node)).unwrap();
///     tail = node;
/// }
/// let len = background::batch(|| {
///     let mut len = 0;
///     let mut cursor = head.next.get().unwrap();
///     while let Some(node) = cursor {
///         len += 1;
///         cursor = node.next.get().unwrap();
///     }
///     len
/// });
/// assert_eq!(len, 100);
/// ```
///
/// While background processing is enabled, requests go to the queue as
/// usual, which already sweeps each generation once per pass.
pub fn batch<R, K: FnOnce() -> R>(k: K) -> R {
    background_impl::batch(k)
}

/// Settings for the [`Worker`] thread.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub name: String,
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> WorkerConfig {
        WorkerConfig {
            name: "cyptr-background".to_string(),
            stack_size: None,
        }
    }
}

impl WorkerConfig {
    pub fn name<NAME: ToString>(mut self, name: NAME) -> WorkerConfig {
        self.name = name.to_string();
        self
    }

    pub fn stack_size(mut self, stack_size: usize) -> WorkerConfig {
        self.stack_size = Some(stack_size);
        self
    }
}

static WORKER_RUNNING: AtomicBool = AtomicBool::new(false);

/// A dedicated thread running queued sweeps until it is dropped.
///
/// Starting a worker enables background processing. Dropping it disables
/// background processing, which drains the queue, and joins the thread. At
/// most one worker exists at a time. If background processing is disabled
/// elsewhere while the worker runs, its thread exits early.
pub struct Worker {
    handle: Option<JoinHandle<usize>>,
}

impl Worker {
    pub fn start() -> Result<Worker> {
        Worker::with_config(WorkerConfig::default())
    }

    pub fn with_config(config: WorkerConfig) -> Result<Worker> {
        if WORKER_RUNNING.swap(true, Ordering::AcqRel) {
            return Err(Error::WorkerRunning);
        }
        let (background, _) = background_impl::install();
        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        match builder.spawn(move || background.process(true, 0)) {
            Ok(handle) => {
                debug!("background worker {} started", config.name);
                Ok(Worker {
                    handle: Some(handle),
                })
            }
            Err(err) => {
                WORKER_RUNNING.store(false, Ordering::Release);
                Err(Error::Spawn(err))
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        background_impl::disable();
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(swept) => debug!("background worker stopped after {} sweeps", swept),
                Err(_) => debug!("background worker panicked"),
            }
        }
        WORKER_RUNNING.store(false, Ordering::Release);
    }
}
