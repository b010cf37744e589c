//! Bounded worker pool
//!
//! An unbounded queue feeds a dispatcher task. The dispatcher takes one of
//! `workers` semaphore permits per task and spawns the task holding that
//! permit, so at most `workers` tasks run at once while the queue absorbs
//! bursts. Admission control is advisory: [`WorkerPool::can_add_task`] tells
//! callers whether the queue is short enough to take more work, but
//! [`WorkerPool::add_task`] never refuses a task for load reasons.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::task::Task;

/// Executes one task inside a worker slot
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: Task);
}

/// State shared between the pool handle, the dispatcher and the workers
struct PoolState {
    max_queued: usize,
    /// Tasks sitting in the queue, not yet picked up by the dispatcher
    queued: AtomicUsize,
    /// Queued plus running tasks
    pending: AtomicUsize,
    idle: Notify,
    semaphore: Arc<Semaphore>,
}

impl PoolState {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Fixed-size pool of concurrent task executors
pub struct WorkerPool {
    workers: usize,
    state: Arc<PoolState>,
    queue_tx: mpsc::UnboundedSender<Task>,
    stopping: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start a pool with `workers` concurrent slots.
    ///
    /// `max_queued` is the queue length above which [`can_add_task`]
    /// reports false.
    ///
    /// [`can_add_task`]: WorkerPool::can_add_task
    pub fn start(workers: usize, max_queued: usize, handler: Arc<dyn TaskHandler>) -> Self {
        let workers = workers.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let state = Arc::new(PoolState {
            max_queued,
            queued: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            semaphore: Arc::new(Semaphore::new(workers)),
        });

        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&state),
            handler,
            queue_rx,
            shutdown_rx,
        ));

        info!("Worker pool started (workers={}, max_queued={})", workers, max_queued);

        Self {
            workers,
            state,
            queue_tx,
            stopping: AtomicBool::new(false),
            shutdown_tx,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Whether more work can be accepted without growing the queue past its
    /// threshold
    pub fn can_add_task(&self) -> bool {
        !self.is_stopping() && self.state.queued.load(Ordering::SeqCst) < self.state.max_queued
    }

    /// Enqueue a task. Never blocks.
    ///
    /// Returns false, discarding the task, once stopping has begun.
    pub fn add_task(&self, task: Task) -> bool {
        if self.is_stopping() {
            return false;
        }

        self.state.pending.fetch_add(1, Ordering::SeqCst);
        self.state.queued.fetch_add(1, Ordering::SeqCst);

        if let Err(mpsc::error::SendError(task)) = self.queue_tx.send(task) {
            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            self.state.finish_one();
            debug!("Worker pool closed, dropping task for {}", task.request_url());
            return false;
        }
        true
    }

    /// Wait until no task is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            if self.state.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting tasks, discard the queue and wait for running tasks.
    ///
    /// Safe to call more than once. Must not be awaited from inside a task
    /// handler, which would wait on its own slot.
    pub async fn stop(&self) {
        self.close();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!("Worker pool dispatcher failed: {}", e);
            }
        }

        let all = u32::try_from(self.workers).unwrap_or(u32::MAX);
        if self.state.semaphore.acquire_many(all).await.is_err() {
            warn!("Worker pool semaphore closed during stop");
        }

        info!("Worker pool stopped");
    }

    /// Signal shutdown without waiting
    pub fn close(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Tasks waiting in the queue
    pub fn queued_tasks(&self) -> usize {
        self.state.queued.load(Ordering::SeqCst)
    }

    /// Tasks currently running
    pub fn active_workers(&self) -> usize {
        self.workers
            .saturating_sub(self.state.semaphore.available_permits())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

async fn dispatch(
    state: Arc<PoolState>,
    handler: Arc<dyn TaskHandler>,
    mut queue_rx: mpsc::UnboundedReceiver<Task>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let task = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            task = queue_rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        state.queued.fetch_sub(1, Ordering::SeqCst);

        let permit = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                state.finish_one();
                break;
            }
            permit = Arc::clone(&state.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    state.finish_one();
                    break;
                }
            },
        };

        let handler = Arc::clone(&handler);
        let worker_state = Arc::clone(&state);
        tokio::spawn(async move {
            let url = task.request_url().to_string();

            if let Err(panic) = AssertUnwindSafe(handler.handle(task)).catch_unwind().await {
                error!("Worker panicked while caching {}: {}", url, panic_message(&*panic));
            }

            drop(permit);
            worker_state.finish_one();
        });
    }

    queue_rx.close();
    let mut discarded = 0usize;
    while let Ok(task) = queue_rx.try_recv() {
        debug!("Discarding queued task for {}", task.request_url());
        state.queued.fetch_sub(1, Ordering::SeqCst);
        state.finish_one();
        discarded += 1;
    }
    if discarded > 0 {
        info!("Worker pool discarded {} queued tasks", discarded);
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
