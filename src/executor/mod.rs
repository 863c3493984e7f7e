//! Single-threaded event bases and the pool that hands them out.
//!
//! An [EventBase] owns one OS thread running a cooperative scheduler. Every
//! transport is bound to exactly one event base for its entire lifetime, and
//! all I/O for that transport happens on the base's thread. Concurrency across
//! connections comes from running multiple event bases, typically via an
//! [EventBasePool].

use log::warn;
use std::future::Future;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single-threaded cooperative reactor with run-in-its-own-thread primitives.
///
/// Jobs and spawned futures are processed in FIFO order on the base's thread;
/// a job posted while another is running executes after the current turn.
pub struct EventBase {
    job_tx: mpsc::UnboundedSender<Job>,
    thread_id: ThreadId,
}

impl EventBase {
    /// Creates a new EventBase backed by a dedicated named thread.
    pub fn new(name: &str) -> Result<Arc<Self>, Error> {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (id_tx, id_rx) = std::sync::mpsc::channel();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ = id_tx.send(thread::current().id());

                let local = tokio::task::LocalSet::new();
                local.block_on(&runtime, async move {
                    while let Some(job) = job_rx.recv().await {
                        job();
                    }
                });
            })?;

        let thread_id = id_rx.recv().map_err(|_| {
            Error::new(
                ErrorKind::Other,
                "event base thread exited during startup".to_string(),
            )
        })?;

        Ok(Arc::new(Self { job_tx, thread_id }))
    }

    /// Returns true when the caller is already running on this base's thread.
    pub fn in_event_base_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Schedules a closure to run on this base after the current turn.
    pub fn run_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.job_tx.send(Box::new(f)).is_err() {
            warn!("event base is gone, dropping loop callback");
        }
    }

    /// Spawns a future onto this base without waiting for it.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let result = self.job_tx.send(Box::new(move || {
            tokio::task::spawn_local(future);
        }));
        if result.is_err() {
            warn!("event base is gone, dropping spawned task");
        }
    }

    /// Schedules a future onto this base and blocks the caller until it has
    /// run, returning its output.
    ///
    /// Callers already on the base's thread should prefer running inline; see
    /// [EventBase::in_event_base_thread].
    pub async fn run_and_wait<F, T>(&self, future: F) -> Result<T, Error>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.job_tx
            .send(Box::new(move || {
                tokio::task::spawn_local(async move {
                    let _ = done_tx.send(future.await);
                });
            }))
            .map_err(|_| {
                Error::new(ErrorKind::BrokenPipe, "event base is gone".to_string())
            })?;

        done_rx.await.map_err(|_| {
            Error::new(
                ErrorKind::BrokenPipe,
                "event base dropped the scheduled task".to_string(),
            )
        })
    }
}

/// A fixed set of event bases handed out round-robin, one accepted connection
/// (or outgoing connect) at a time.
pub struct EventBasePool {
    bases: Vec<Arc<EventBase>>,
    next: AtomicUsize,
}

impl EventBasePool {
    /// Creates a pool of `size` event bases.
    pub fn new(size: usize) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "event base pool requires at least one thread".to_string(),
            ));
        }

        let mut bases = Vec::with_capacity(size);
        for i in 0..size {
            bases.push(EventBase::new(&format!("event-base-{}", i))?);
        }
        Ok(Self {
            bases,
            next: AtomicUsize::new(0),
        })
    }

    /// Returns the number of event bases in the pool.
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Returns true if the pool holds no event bases.
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Picks the next event base, round-robin.
    pub fn next_base(&self) -> Arc<EventBase> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.bases.len();
        self.bases[i].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_base_run_and_wait() -> anyhow::Result<()> {
        let base = EventBase::new("test-base")?;
        let value = base.run_and_wait(async move { 41 + 1 }).await?;
        assert_eq!(42, value);
        Ok(())
    }

    #[tokio::test]
    async fn test_event_base_thread_affinity() -> anyhow::Result<()> {
        let base = EventBase::new("test-affinity")?;
        assert!(!base.in_event_base_thread());

        let base2 = base.clone();
        let on_base = base
            .run_and_wait(async move { base2.in_event_base_thread() })
            .await?;
        assert!(on_base);
        Ok(())
    }

    #[tokio::test]
    async fn test_event_base_jobs_run_in_order() -> anyhow::Result<()> {
        let base = EventBase::new("test-order")?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..8 {
            let tx = tx.clone();
            base.run_in_loop(move || {
                let _ = tx.send(i);
            });
        }

        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!((0..8).collect::<Vec<_>>(), seen);
        Ok(())
    }

    #[tokio::test]
    async fn test_event_base_pool_round_robin() -> anyhow::Result<()> {
        let pool = EventBasePool::new(2)?;
        assert_eq!(2, pool.len());
        let a = pool.next_base();
        let b = pool.next_base();
        let c = pool.next_base();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        Ok(())
    }
}
