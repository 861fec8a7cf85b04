//! Long-lived execution collaborators shared by every block
//!
//! `ExecutionEnv` bundles what does not change between blocks: the VM, the
//! precompiled registry, the conflict-field source, thread pools and the
//! configuration. Block contexts and factories hold it behind an `Arc`.

use super::precompiled::PrecompiledRegistry;
use crate::adapters::DeclaredConflictFields;
use crate::config::ExecutorConfig;
use crate::domain::errors::ExecuteError;
use crate::ports::outbound::{ConflictFieldProvider, ContractVm};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{info, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct WorkerQueue {
    jobs: VecDeque<Job>,
    /// Threads parked waiting for a job
    idle: usize,
    shutdown: bool,
}

struct WorkerShared {
    queue: Mutex<WorkerQueue>,
    available: Condvar,
    live: AtomicUsize,
    started: AtomicUsize,
    keep_idle: usize,
}

/// Threads running worker-pool units.
///
/// A suspended unit keeps its thread blocked until it is resumed, so a job
/// never waits for a thread: it goes to an idle thread or a new one. Up to
/// `keep_idle` finished threads stay parked for reuse.
pub struct WorkerThreads {
    shared: Arc<WorkerShared>,
}

impl WorkerThreads {
    pub fn new(keep_idle: usize) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                queue: Mutex::new(WorkerQueue::default()),
                available: Condvar::new(),
                live: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                keep_idle: keep_idle.max(1),
            }),
        }
    }

    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> Result<(), ExecuteError> {
        let mut queue = self.shared.queue.lock();
        if queue.idle > queue.jobs.len() {
            queue.jobs.push_back(Box::new(job));
            self.shared.available.notify_one();
            return Ok(());
        }
        drop(queue);

        let shared = self.shared.clone();
        let id = shared.started.fetch_add(1, Ordering::Relaxed);
        shared.live.fetch_add(1, Ordering::AcqRel);
        let spawned = thread::Builder::new()
            .name(format!("qc12-worker-{id}"))
            .spawn(move || {
                job();
                Self::work(&shared);
                shared.live.fetch_sub(1, Ordering::AcqRel);
            });

        match spawned {
            Ok(_) => {
                trace!(thread = id, "Worker thread started");
                Ok(())
            }
            Err(e) => {
                self.shared.live.fetch_sub(1, Ordering::AcqRel);
                Err(ExecuteError::InvalidState(format!("worker thread: {e}")))
            }
        }
    }

    fn work(shared: &WorkerShared) {
        let mut queue = shared.queue.lock();
        loop {
            if let Some(job) = queue.jobs.pop_front() {
                MutexGuard::unlocked(&mut queue, job);
            } else if queue.shutdown || queue.idle >= shared.keep_idle {
                return;
            } else {
                queue.idle += 1;
                shared.available.wait(&mut queue);
                queue.idle -= 1;
            }
        }
    }

    /// Threads currently alive, busy or idle.
    pub fn threads(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }
}

impl Drop for WorkerThreads {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.available.notify_all();
    }
}

/// Thread pools of one executor.
///
/// Flow driving and DAG nodes share the `flow` pool; worker-pool units run
/// on `worker` threads, which grow with the number of suspended units.
pub struct ExecutorPools {
    flow: ThreadPool,
    worker: WorkerThreads,
}

impl ExecutorPools {
    pub fn new(config: &ExecutorConfig) -> Result<Self, ExecuteError> {
        let flow = ThreadPoolBuilder::new()
            .num_threads(config.dag_threads.max(1))
            .thread_name(|i| format!("qc12-flow-{i}"))
            .build()
            .map_err(|e| ExecuteError::InvalidState(format!("flow pool: {e}")))?;
        let worker = WorkerThreads::new(config.worker_pool_threads);

        info!(
            flow_threads = flow.current_num_threads(),
            idle_worker_threads = config.worker_pool_threads.max(1),
            "Executor thread pools started"
        );

        Ok(Self { flow, worker })
    }

    pub fn flow(&self) -> &ThreadPool {
        &self.flow
    }

    pub fn worker(&self) -> &WorkerThreads {
        &self.worker
    }
}

pub struct ExecutionEnv {
    config: ExecutorConfig,
    vm: Arc<dyn ContractVm>,
    precompiled: Arc<PrecompiledRegistry>,
    conflict_fields: Arc<dyn ConflictFieldProvider>,
    pools: Arc<ExecutorPools>,
}

impl ExecutionEnv {
    /// Environment with no precompiles, conflict fields read from each
    /// contract's declared ABI.
    pub fn new(config: ExecutorConfig, vm: Arc<dyn ContractVm>) -> Result<Self, ExecuteError> {
        let pools = Arc::new(ExecutorPools::new(&config)?);
        let conflict_fields = Arc::new(DeclaredConflictFields::new(config.abi_cache_capacity));

        Ok(Self {
            config,
            vm,
            precompiled: Arc::new(PrecompiledRegistry::new()),
            conflict_fields,
            pools,
        })
    }

    pub fn with_precompiled(mut self, precompiled: PrecompiledRegistry) -> Self {
        self.precompiled = Arc::new(precompiled);
        self
    }

    pub fn with_conflict_fields(mut self, provider: Arc<dyn ConflictFieldProvider>) -> Self {
        self.conflict_fields = provider;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn vm(&self) -> &Arc<dyn ContractVm> {
        &self.vm
    }

    pub fn precompiled(&self) -> &PrecompiledRegistry {
        &self.precompiled
    }

    pub fn conflict_fields(&self) -> &dyn ConflictFieldProvider {
        self.conflict_fields.as_ref()
    }

    pub fn pools(&self) -> &ExecutorPools {
        &self.pools
    }
}
