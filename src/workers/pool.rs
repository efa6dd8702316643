use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::metrics::FEED_CORE_METRICS;

/// Work performed by every worker of a pool, one item at a time
#[async_trait]
pub trait WorkHandler<T>: Send + Sync + 'static {
    async fn handle(&self, worker_id: usize, item: T);
}

/// Worker handles and the cancel signal, guarded by their own lock.
///
/// The lock is never held while workers are joined.
struct Lifecycle {
    stopping: bool,
    handles: Vec<JoinHandle<()>>,
    cancel_tx: Option<watch::Sender<bool>>,
}

/// Fixed-size pool of tokio workers draining one bounded queue.
///
/// The queue exists from construction, so items can be submitted before the
/// workers start. `try_submit` never blocks: a full queue rejects the item.
pub struct WorkerPool<T: Send + 'static> {
    name: String,
    capacity: usize,
    worker_count: usize,
    sender: RwLock<mpsc::Sender<T>>,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    /// Buffered items, counted across queue swaps
    depth: Arc<AtomicUsize>,
    /// True from `start` until every worker has been joined
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(name: impl Into<String>, capacity: usize, worker_count: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            name: name.into(),
            capacity,
            worker_count: worker_count.max(1),
            sender: RwLock::new(sender),
            receiver: Arc::new(Mutex::new(receiver)),
            depth: Arc::new(AtomicUsize::new(0)),
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                stopping: false,
                handles: Vec::new(),
                cancel_tx: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Items currently buffered, including those left behind a closed queue
    pub fn queue_len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Workers are alive. Stays true while a shutdown drains the queue.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueue without waiting. Fails with `QueueFull` or `QueueClosed`.
    pub fn try_submit(&self, item: T) -> Result<()> {
        // Counted before the send so a fast worker never sees a negative depth
        self.depth.fetch_add(1, Ordering::SeqCst);
        let result = self.sender.read().try_send(item);
        match result {
            Ok(()) => {
                record_depth(&self.name, &self.depth);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                self.reject("full");
                Err(AppError::QueueFull {
                    queue: self.name.clone(),
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                self.reject("closed");
                Err(AppError::QueueClosed(self.name.clone()))
            }
        }
    }

    /// Enqueue, waiting up to `timeout` for a free slot.
    ///
    /// For background callers only; the wait keeps the queue open, so a
    /// concurrent shutdown finishes no later than `timeout` after it.
    pub async fn submit_timeout(&self, item: T, timeout: Duration) -> Result<()> {
        let sender = self.sender.read().clone();
        self.depth.fetch_add(1, Ordering::SeqCst);

        match sender.send_timeout(item, timeout).await {
            Ok(()) => {
                record_depth(&self.name, &self.depth);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                self.reject("timeout");
                Err(AppError::Timeout(format!(
                    "queue '{}' stayed full for {}ms",
                    self.name,
                    timeout.as_millis()
                )))
            }
            Err(SendTimeoutError::Closed(_)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                self.reject("closed");
                Err(AppError::QueueClosed(self.name.clone()))
            }
        }
    }

    /// Spawn the workers. Fails if they are running or still draining.
    ///
    /// A pool that was shut down starts again on a fresh queue.
    pub async fn start<H: WorkHandler<T>>(&self, handler: Arc<H>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_running() {
            return Err(AppError::Lifecycle(format!(
                "worker pool '{}' already running",
                self.name
            )));
        }

        if self.sender.read().is_closed() {
            let (sender, receiver) = mpsc::channel(self.capacity);
            *self.receiver.lock().await = receiver;
            *self.sender.write() = sender;
            self.depth.store(0, Ordering::SeqCst);
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        lifecycle.handles = (0..self.worker_count)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    queue: self.name.clone(),
                    receiver: Arc::clone(&self.receiver),
                    depth: Arc::clone(&self.depth),
                    cancel_rx: cancel_rx.clone(),
                    handler: Arc::clone(&handler),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        lifecycle.cancel_tx = Some(cancel_tx);
        lifecycle.stopping = false;
        self.running.store(true, Ordering::SeqCst);

        info!(
            queue = %self.name,
            workers = self.worker_count,
            capacity = self.capacity,
            "🚀 Worker pool started"
        );

        Ok(())
    }

    /// Close the queue, let workers drain buffered items, then join them.
    /// No-op when not running or when another stop is already joining.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(handles) = self.begin_stop(false).await else {
            debug!(queue = %self.name, "Worker pool already stopped");
            return Ok(());
        };

        self.finish_stop(handles).await;
        info!(queue = %self.name, "🛑 Worker pool stopped");
        Ok(())
    }

    /// Signal workers to stop at their next receive and discard buffered
    /// items. Returns how many were discarded.
    ///
    /// Also cuts short a shutdown that is still draining; that shutdown then
    /// does the joining. No-op when not running.
    pub async fn cancel(&self) -> Result<usize> {
        let Some(handles) = self.begin_stop(true).await else {
            return Ok(0);
        };

        let discarded = self.finish_stop(handles).await;
        warn!(queue = %self.name, discarded, "Worker pool cancelled");
        Ok(discarded)
    }

    /// Mark the pool as stopping and take the worker handles. Returns `None`
    /// when there is nothing for this caller to join.
    async fn begin_stop(&self, cancel: bool) -> Option<Vec<JoinHandle<()>>> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !self.is_running() {
            return None;
        }

        if cancel {
            if let Some(cancel_tx) = lifecycle.cancel_tx.as_ref() {
                let _ = cancel_tx.send(true);
            }
        }
        if lifecycle.stopping {
            return None;
        }

        lifecycle.stopping = true;
        // Workers drain what is buffered and exit once the queue reports closed
        self.close_queue();
        Some(std::mem::take(&mut lifecycle.handles))
    }

    /// Join the workers without holding the lifecycle lock, then discard
    /// whatever a cancel left behind
    async fn finish_stop(&self, handles: Vec<JoinHandle<()>>) -> usize {
        let results = futures::future::join_all(handles).await;
        for result in results {
            if let Err(e) = result {
                error!(queue = %self.name, error = %e, "Worker task ended abnormally");
            }
        }

        let mut discarded = 0usize;
        {
            let mut receiver = self.receiver.lock().await;
            while receiver.try_recv().is_ok() {
                discarded += 1;
                self.depth.fetch_sub(1, Ordering::SeqCst);
            }
        }
        record_depth(&self.name, &self.depth);

        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.cancel_tx = None;
        lifecycle.stopping = false;
        self.running.store(false, Ordering::SeqCst);

        discarded
    }

    /// Drop the only live sender. Later submissions see a closed queue.
    fn close_queue(&self) {
        let (closed, _) = mpsc::channel(1);
        *self.sender.write() = closed;
    }

    fn reject(&self, reason: &str) {
        FEED_CORE_METRICS
            .queue_rejections
            .with_label_values(&[&self.name, reason])
            .inc();
    }
}

fn record_depth(queue: &str, depth: &AtomicUsize) {
    FEED_CORE_METRICS
        .queue_depth
        .with_label_values(&[queue])
        .set(depth.load(Ordering::SeqCst) as f64);
}

struct Worker<T, H> {
    id: usize,
    queue: String,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    depth: Arc<AtomicUsize>,
    cancel_rx: watch::Receiver<bool>,
    handler: Arc<H>,
}

impl<T: Send + 'static, H: WorkHandler<T>> Worker<T, H> {
    async fn run(mut self) {
        debug!(queue = %self.queue, worker_id = self.id, "Worker started");

        loop {
            let item = tokio::select! {
                biased;
                changed = self.cancel_rx.changed() => {
                    if changed.is_err() || *self.cancel_rx.borrow() {
                        break;
                    }
                    continue;
                }
                item = next_item(&self.receiver) => item,
            };

            let Some(item) = item else {
                break;
            };
            self.depth.fetch_sub(1, Ordering::SeqCst);
            record_depth(&self.queue, &self.depth);

            let start = Instant::now();
            self.handler.handle(self.id, item).await;
            FEED_CORE_METRICS
                .worker_item_duration
                .with_label_values(&[&self.queue])
                .observe(start.elapsed().as_secs_f64());
        }

        debug!(queue = %self.queue, worker_id = self.id, "Worker exited");
    }
}

async fn next_item<T>(receiver: &Mutex<mpsc::Receiver<T>>) -> Option<T> {
    receiver.lock().await.recv().await
}
