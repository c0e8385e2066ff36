//! Safe asynchronous dispatch
//!
//! Every stateful actor in the transport layer (connection, server, client,
//! device) runs its mutations on a [`Lane`]: a logical serial queue over the
//! shared [`Dispatcher`] worker pool. Jobs posted to one lane execute one at
//! a time in post order; jobs on different lanes run in parallel across the
//! pool threads.
//!
//! I/O threads never touch actor state directly. They are handed callbacks
//! built with [`wrap`], which hold a weak reference to the owning actor:
//! invoking the callback checks liveness first, then re-enters the owner's
//! lane. An actor destroyed with I/O still in flight therefore receives no
//! further callbacks - the completions are discarded.
//!
//! The dispatcher is an explicit handle owned by the caller. Dropping it
//! stops the workers; jobs posted after shutdown are silently discarded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum PoolTask {
    Run(Job),
    Shutdown,
}

/// Shared worker pool executing lane jobs.
///
/// A cheap cloneable handle; the pool stops when the last clone is dropped.
#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<PoolTask>,
    _guard: Arc<PoolGuard>,
}

impl Dispatcher {
    /// Start a pool with the given number of worker threads (at least one)
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (tx, rx) = crossbeam_channel::unbounded::<PoolTask>();

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("dispatch-{}", i))
                .spawn(move || worker_loop(rx))?;
            workers.push(handle);
        }

        log::debug!("Dispatcher started with {} worker threads", threads);
        Ok(Self {
            tx: tx.clone(),
            _guard: Arc::new(PoolGuard { tx, workers }),
        })
    }

    /// Create a new serial lane over this pool
    pub fn lane(&self) -> Lane {
        Lane {
            inner: Arc::new(LaneInner {
                pool: self.tx.clone(),
                state: Mutex::new(LaneState {
                    queue: VecDeque::new(),
                    active: false,
                }),
            }),
        }
    }
}

struct PoolGuard {
    tx: Sender<PoolTask>,
    workers: Vec<JoinHandle<()>>,
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.tx.send(PoolTask::Shutdown);
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        log::debug!("Dispatcher stopped");
    }
}

fn worker_loop(rx: Receiver<PoolTask>) {
    loop {
        match rx.recv() {
            Ok(PoolTask::Run(job)) => job(),
            Ok(PoolTask::Shutdown) | Err(_) => break,
        }
    }
}

/// Serial execution lane: jobs run one at a time, in post order
#[derive(Clone)]
pub struct Lane {
    inner: Arc<LaneInner>,
}

struct LaneInner {
    pool: Sender<PoolTask>,
    state: Mutex<LaneState>,
}

struct LaneState {
    queue: VecDeque<Job>,
    // a drain task for this lane is scheduled or running
    active: bool,
}

impl Lane {
    /// Enqueue a job. Returns immediately; the job runs later on a pool
    /// worker, after every job posted to this lane before it.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.queue.push_back(Box::new(job));
        if !state.active {
            state.active = true;
            let inner = Arc::clone(&self.inner);
            // send failure means the pool is gone; the job stays queued and
            // is dropped with the lane
            let _ = self.inner.pool.send(PoolTask::Run(Box::new(move || drain(inner))));
        }
    }
}

fn drain(inner: Arc<LaneInner>) {
    loop {
        let job = {
            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.queue.pop_front() {
                Some(job) => job,
                None => {
                    state.active = false;
                    return;
                }
            }
        };
        job();
    }
}

/// Schedule an operation bound to `owner` on its lane.
///
/// The job holds only a weak reference; if the owner is destroyed before the
/// job runs, the job is a silent no-op.
pub fn post<T, F>(lane: &Lane, owner: &Arc<T>, op: F)
where
    T: Send + Sync + 'static,
    F: FnOnce(&Arc<T>) + Send + 'static,
{
    let weak = Arc::downgrade(owner);
    lane.post(move || {
        if let Some(owner) = weak.upgrade() {
            op(&owner);
        }
    });
}

/// Build a callback safe to hand to an I/O thread.
///
/// Liveness is checked at invocation time, not at wrap time: a dead owner
/// makes the invocation a no-op, a live one re-enters the owner's lane so
/// `op` never runs on the I/O thread itself. The posted job upgrades the
/// weak reference again before running, so an owner destroyed between
/// invocation and execution is never dereferenced.
pub fn wrap<T, A, F>(lane: &Lane, owner: &Arc<T>, op: F) -> impl Fn(A) + Send + Sync + Clone + 'static
where
    T: Send + Sync + 'static,
    A: Send + 'static,
    F: Fn(&Arc<T>, A) + Send + Sync + 'static,
{
    let lane = lane.clone();
    let weak = Arc::downgrade(owner);
    let op = Arc::new(op);
    move |arg: A| {
        if weak.strong_count() == 0 {
            return;
        }
        let weak = Weak::clone(&weak);
        let op = Arc::clone(&op);
        lane.post(move || {
            if let Some(owner) = weak.upgrade() {
                op(&owner, arg);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_lane_runs_jobs_in_post_order() {
        let dispatcher = Dispatcher::new(4).unwrap();
        let lane = dispatcher.lane();
        let (tx, rx) = crossbeam_channel::unbounded();

        for i in 0..100usize {
            let tx = tx.clone();
            lane.post(move || {
                let _ = tx.send(i);
            });
        }

        let got: Vec<usize> = rx.iter().take(100).collect();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_lane_never_overlaps_jobs() {
        let dispatcher = Dispatcher::new(4).unwrap();
        let lane = dispatcher.lane();
        let in_lane = Arc::new(AtomicBool::new(false));
        let overlap = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::unbounded();

        for _ in 0..50 {
            let in_lane = Arc::clone(&in_lane);
            let overlap = Arc::clone(&overlap);
            let tx = tx.clone();
            lane.post(move || {
                if in_lane.swap(true, Ordering::SeqCst) {
                    overlap.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_micros(200));
                in_lane.store(false, Ordering::SeqCst);
                let _ = tx.send(());
            });
        }

        for _ in 0..50 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(!overlap.load(Ordering::SeqCst));
    }

    #[test]
    fn test_lanes_run_independently() {
        let dispatcher = Dispatcher::new(2).unwrap();
        let blocked_lane = dispatcher.lane();
        let free_lane = dispatcher.lane();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        // occupy one worker until released
        blocked_lane.post(move || {
            let _ = release_rx.recv();
        });
        free_lane.post(move || {
            let _ = done_tx.send(());
        });

        // the free lane must make progress while the other lane is parked
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_post_skips_owner_destroyed_before_execution() {
        let dispatcher = Dispatcher::new(2).unwrap();
        let lane = dispatcher.lane();
        let hits = Arc::new(AtomicUsize::new(0));
        let owner = Arc::new(());
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        // park the lane so the owner can be destroyed before the job runs
        lane.post(move || {
            let _ = release_rx.recv();
        });

        let weak_hits = Arc::clone(&hits);
        post(&lane, &owner, move |_| {
            weak_hits.fetch_add(1, Ordering::SeqCst);
        });

        drop(owner);
        release_tx.send(()).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wrap_suppresses_callbacks_after_owner_destroyed() {
        let dispatcher = Dispatcher::new(2).unwrap();
        let lane = dispatcher.lane();
        let hits = Arc::new(AtomicUsize::new(0));
        let owner = Arc::new(());

        let wrapped_hits = Arc::clone(&hits);
        let callback = wrap(&lane, &owner, move |_, _arg: u32| {
            wrapped_hits.fetch_add(1, Ordering::SeqCst);
        });

        callback(1);
        wait_for(|| hits.load(Ordering::SeqCst) == 1);

        drop(owner);
        callback(2);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached within timeout");
    }
}
