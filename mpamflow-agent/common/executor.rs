//! One worker thread per CPU
//!
//! Work that has to touch an MSC from a particular CPU is shipped to that
//! CPU's worker and the caller blocks until it has run. Workers only ever
//! run leaf jobs: they never start a broadcast or take the hotplug lock, so
//! a caller holding either can wait on them safely.

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

use crate::common::affinity::{current_cpu, AffinityGuard};
use crate::common::cpumask::CpuMask;
use crate::error::{MpamError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static ON_EXECUTOR: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is one of the per-CPU workers
pub fn on_executor() -> bool {
    ON_EXECUTOR.with(|c| c.get())
}

pub struct CoreExecutors {
    inboxes: RwLock<HashMap<u32, mpsc::UnboundedSender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    remote_calls: AtomicU64,
}

impl CoreExecutors {
    /// Start a worker for every CPU in `cpus`
    pub fn spawn(cpus: &CpuMask, pin: bool) -> Result<Self> {
        let mut inboxes = HashMap::new();
        let mut threads = Vec::new();

        for cpu in cpus.iter() {
            let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
            let handle = std::thread::Builder::new()
                .name(format!("mpam-cpu{cpu}"))
                .spawn(move || {
                    let _affinity = AffinityGuard::pin_or_bind(cpu, pin);
                    ON_EXECUTOR.with(|c| c.set(true));

                    while let Some(job) = rx.blocking_recv() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!("Job on CPU {} panicked", cpu);
                        }
                    }
                    tracing::debug!("Executor for CPU {} stopped", cpu);
                })?;
            inboxes.insert(cpu, tx);
            threads.push(handle);
        }

        tracing::info!("Started {} per-CPU executors", threads.len());

        Ok(Self {
            inboxes: RwLock::new(inboxes),
            threads: Mutex::new(threads),
            remote_calls: AtomicU64::new(0),
        })
    }

    /// Run `f` on `cpu` and wait for its result
    ///
    /// Runs inline when the caller is already bound to `cpu`. Must not be
    /// called from inside an async task, the wait blocks the thread.
    pub fn run_on<R, F>(&self, cpu: u32, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if current_cpu() == Some(cpu) {
            return Ok(f());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(f());
        });

        {
            let inboxes = self.inboxes.read();
            let inbox = inboxes
                .get(&cpu)
                .ok_or_else(|| MpamError::Executor(format!("No executor for CPU {cpu}")))?;
            inbox
                .send(job)
                .map_err(|_| MpamError::Executor(format!("Executor for CPU {cpu} is gone")))?;
        }
        self.remote_calls.fetch_add(1, Ordering::Relaxed);

        reply_rx
            .blocking_recv()
            .map_err(|_| MpamError::Executor(format!("CPU {cpu} dropped the job")))
    }

    /// Number of jobs dispatched to another CPU so far
    pub fn remote_calls(&self) -> u64 {
        self.remote_calls.load(Ordering::Relaxed)
    }

    pub fn cpus(&self) -> CpuMask {
        self.inboxes.read().keys().copied().collect()
    }

    /// Stop all workers and wait for them
    pub fn shutdown(&self) {
        self.inboxes.write().clear();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl Drop for CoreExecutors {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_on_binds_target_cpu() {
        let executors = CoreExecutors::spawn(&CpuMask::first_n(4), false).unwrap();

        for cpu in 0..4 {
            let seen = executors.run_on(cpu, current_cpu).unwrap();
            assert_eq!(seen, Some(cpu));
        }
        assert_eq!(executors.remote_calls(), 4);
        assert!(executors.run_on(2, on_executor).unwrap());
    }

    #[test]
    fn test_run_on_local_cpu_is_inline() {
        let executors = CoreExecutors::spawn(&CpuMask::first_n(2), false).unwrap();
        let _guard = AffinityGuard::bind(1);

        let thread = executors
            .run_on(1, || std::thread::current().id())
            .unwrap();
        assert_eq!(thread, std::thread::current().id());
        assert_eq!(executors.remote_calls(), 0);
    }

    #[test]
    fn test_unknown_cpu_and_panics() {
        let executors = CoreExecutors::spawn(&CpuMask::first_n(1), false).unwrap();

        assert!(matches!(
            executors.run_on(7, || ()),
            Err(MpamError::Executor(_))
        ));
        assert!(executors.run_on(0, || -> u32 { panic!("boom") }).is_err());
        // The worker survives a panicking job
        assert_eq!(executors.run_on(0, || 42).unwrap(), 42);

        executors.shutdown();
        assert!(executors.run_on(0, || ()).is_err());
    }
}
