//! Bounded, cooperatively scheduled worker pool with delayed submission.
//!
//! The dispatcher is memory-only: every durable fact lives in the database,
//! and a restart recovers by rescanning non-terminal contents. Workers take
//! one job at a time and run it to completion; a job that suspends on I/O
//! ties up its worker, so the pool is sized generously.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::jobs::{Job, JobContext};

struct ScheduledJob {
    due: Instant,
    job: Job,
}

impl PartialEq for ScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for ScheduledJob {}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    // Reversed so the binary heap pops the earliest due time first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.due.cmp(&self.due)
    }
}

struct Inner {
    ready: Mutex<VecDeque<Job>>,
    delayed: Mutex<BinaryHeap<ScheduledJob>>,
    notify: Notify,
    workers: AtomicUsize,
    in_flight: AtomicUsize,
    accepting: AtomicBool,
    promoter_started: AtomicBool,
    max_workers: usize,
    ctx: OnceLock<Arc<JobContext>>,
}

impl Inner {
    fn queue_len(&self) -> usize {
        self.ready.lock().unwrap().len() + self.delayed.lock().unwrap().len()
    }
}

/// Cheap clonable handle onto the shared pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(max_workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                ready: Mutex::new(VecDeque::new()),
                delayed: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                workers: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                accepting: AtomicBool::new(true),
                promoter_started: AtomicBool::new(false),
                max_workers,
                ctx: OnceLock::new(),
            }),
        }
    }

    /// Attach the shared job context. Must happen before `start`.
    pub fn bind(&self, ctx: Arc<JobContext>) {
        let _ = self.inner.ctx.set(ctx);
    }

    /// Enqueue without waking any additional workers.
    pub fn add_job(&self, job: Job) {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            warn!(job = %job.kind(), "dispatcher is shutting down, job refused");
            return;
        }
        self.inner.ready.lock().unwrap().push_back(job);
        self.inner.notify.notify_one();
    }

    /// Enqueue and make sure at least `n` workers are consuming.
    pub fn add_job_and_dispatch(&self, job: Job, n: usize) {
        self.add_job(job);
        self.start(n);
    }

    /// Hold a job until `delay` has passed, then promote it to the ready
    /// queue. Used for retry backoff.
    pub fn schedule(&self, job: Job, delay: Duration) {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            warn!(job = %job.kind(), "dispatcher is shutting down, delayed job refused");
            return;
        }
        self.inner.delayed.lock().unwrap().push(ScheduledJob {
            due: Instant::now() + delay,
            job,
        });
        self.ensure_promoter();
    }

    /// Ensure at least `n` workers are running, capped at the configured
    /// maximum. Calling with `n` at or below the running fleet is a no-op.
    pub fn start(&self, n: usize) {
        self.ensure_promoter();
        let target = n.min(self.inner.max_workers);
        loop {
            let running = self.inner.workers.load(Ordering::SeqCst);
            if running >= target {
                break;
            }
            if self
                .inner
                .workers
                .compare_exchange(running, running + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(worker_loop(inner, running));
            }
        }
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue_len()
    }

    pub fn running_workers(&self) -> usize {
        self.inner.workers.load(Ordering::SeqCst)
    }

    /// Refuse new submissions and wait for the backlog to drain, up to
    /// `grace`. Jobs still pending afterwards are abandoned; the startup
    /// recovery scan picks their contents up again.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!("dispatcher shutting down, draining up to {:?}", grace);
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.inner.queue_len() == 0 && self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                info!("dispatcher drained cleanly");
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        warn!(
            abandoned = self.inner.queue_len(),
            in_flight = self.inner.in_flight.load(Ordering::SeqCst),
            "dispatcher grace period expired, abandoning remaining jobs"
        );
        false
    }

    fn ensure_promoter(&self) {
        if self.inner.promoter_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(promoter_loop(Arc::clone(&self.inner)));
    }
}

/// Moves delayed jobs whose due time has passed onto the ready queue.
async fn promoter_loop(inner: Arc<Inner>) {
    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;

        let now = Instant::now();
        let mut promoted = Vec::new();
        {
            let mut delayed = inner.delayed.lock().unwrap();
            while delayed.peek().map(|s| s.due <= now).unwrap_or(false) {
                promoted.push(delayed.pop().unwrap().job);
            }
        }

        if !promoted.is_empty() {
            debug!(count = promoted.len(), "promoting delayed jobs");
            let mut ready = inner.ready.lock().unwrap();
            for job in promoted {
                ready.push_back(job);
                inner.notify.notify_one();
            }
        }

        if !inner.accepting.load(Ordering::SeqCst) && inner.queue_len() == 0 {
            break;
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, worker_id: usize) {
    let ctx = loop {
        if let Some(ctx) = inner.ctx.get() {
            break Arc::clone(ctx);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    debug!(worker_id, "dispatch worker started");

    loop {
        let job = inner.ready.lock().unwrap().pop_front();
        match job {
            Some(job) => {
                inner.in_flight.fetch_add(1, Ordering::SeqCst);
                let kind = job.kind();
                let content_id = job.content_id();
                if let Err(e) = job.run(&ctx).await {
                    warn!(worker_id, job = %kind, content_id, error = %e, "job failed");
                    if let Some(content_id) = content_id {
                        let pool = ctx.pool.clone();
                        let message = e.to_string();
                        let recorded = tokio::task::spawn_blocking(move || {
                            crate::db::record_content_message(&pool, content_id, &message)
                        })
                        .await;
                        if let Ok(Err(e)) = recorded {
                            error!(content_id, error = %e, "failed to record job error");
                        }
                    }
                }
                inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            None => {
                if !inner.accepting.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                }
            }
        }
    }

    inner.workers.fetch_sub(1, Ordering::SeqCst);
    debug!(worker_id, "dispatch worker stopped");
}
