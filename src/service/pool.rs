//! Fixed-width worker pool on plain OS threads.
//!
//! Jobs run in submission order, at most `width` at a time. Each job hands
//! back a [`Ticket`] that can be waited on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Completion handle of a submitted job
#[derive(Debug, Clone)]
pub struct Ticket {
    done: Arc<(Mutex<bool>, Condvar)>,
}

impl Ticket {
    fn new() -> Self {
        Self {
            done: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Block until the job has run (or was dropped unrun).
    pub fn wait(&self) {
        let (lock, cvar) = &*self.done;
        let mut done = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !*done {
            done = cvar.wait(done).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn is_done(&self) -> bool {
        *self.done.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn signal(&self) {
        let (lock, cvar) = &*self.done;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }
}

/// Settles a job's bookkeeping however the job ends: normally, by panic, or
/// by being dropped from a closed queue.
struct Completion {
    outstanding: Arc<AtomicUsize>,
    ticket: Ticket,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.ticket.signal();
    }
}

pub struct WorkerPool {
    name: String,
    width: usize,
    outstanding: Arc<AtomicUsize>,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: &str, width: usize) -> Self {
        let width = width.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..width)
            .map(|i| {
                let receiver = Arc::clone(&receiver);
                let pool = name.to_string();
                thread::Builder::new()
                    .name(format!("{}-{}", name, i))
                    .spawn(move || worker_loop(&pool, receiver))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!(pool = %name, error = %e, "Failed to spawn worker thread");
                    None
                }
            })
            .collect();

        Self {
            name: name.to_string(),
            width,
            outstanding: Arc::new(AtomicUsize::new(0)),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Jobs queued or running
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Enqueue `job`. After [`shutdown`](Self::shutdown) the job is dropped
    /// unrun and its ticket is already settled.
    pub fn submit<F>(&self, job: F) -> Ticket
    where
        F: FnOnce() + Send + 'static,
    {
        let ticket = Ticket::new();
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let completion = Completion {
            outstanding: Arc::clone(&self.outstanding),
            ticket: ticket.clone(),
        };

        let wrapped: Job = Box::new(move || {
            let _completion = completion;
            job();
        });

        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        match sender.as_ref() {
            // A failed send hands the job back, dropping its completion
            Some(tx) => {
                let _ = tx.send(wrapped);
            }
            None => debug!(pool = %self.name, "Pool shut down, job dropped"),
        }
        ticket
    }

    /// Close the queue and wait for the workers to drain it.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let workers: Vec<_> = self.workers.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                error!(pool = %self.name, "Worker thread panicked");
            }
        }
    }
}

fn worker_loop(pool: &str, receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let rx = receiver.lock().unwrap_or_else(|e| e.into_inner());
            rx.recv()
        };
        let Ok(job) = job else {
            debug!(pool, "Queue closed, worker exiting");
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(pool, "Job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_width_bounds_concurrency() {
        let pool = WorkerPool::new("test", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tickets: Vec<Ticket> = (0..6)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for t in &tickets {
            t.wait();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_submission_order_within_pool() {
        let pool = WorkerPool::new("ordered", 1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let tickets: Vec<Ticket> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                pool.submit(move || order.lock().unwrap().push(i))
            })
            .collect();
        tickets.last().unwrap().wait();
        for t in &tickets {
            assert!(t.is_done());
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_outstanding_counts_queued_and_running() {
        let pool = WorkerPool::new("busy", 1);
        let gate = Arc::new((Mutex::new(false), Condvar::new()));

        let blocker = {
            let gate = Arc::clone(&gate);
            pool.submit(move || {
                let (lock, cvar) = &*gate;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
            })
        };
        let queued = pool.submit(|| {});
        assert_eq!(pool.outstanding(), 2);

        *gate.0.lock().unwrap() = true;
        gate.1.notify_all();
        blocker.wait();
        queued.wait();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_panicking_job_settles_ticket() {
        let pool = WorkerPool::new("panics", 1);
        let ticket = pool.submit(|| panic!("boom"));
        ticket.wait();
        assert_eq!(pool.outstanding(), 0);

        // The worker survives
        let after = pool.submit(|| {});
        after.wait();
    }

    #[test]
    fn test_submit_after_shutdown() {
        let pool = WorkerPool::new("closed", 1);
        pool.shutdown();
        let ticket = pool.submit(|| panic!("must not run"));
        assert!(ticket.is_done());
        assert_eq!(pool.outstanding(), 0);
    }
}
