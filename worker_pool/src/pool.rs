use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use message_model::{BaseTask, CoreError, TaskId, TaskOptions};
use parking_lot::Mutex;
use task_executor::Executor;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::spawn::{SpawnedWorker, WorkerSpawner};

/// A pool services exactly one workload class (a specific connection plugin, or the special
/// `content` class). `max_workers` bounds how many worker processes it will ever have alive at
/// once; `supports_concurrent_tasks` controls whether a worker is handed back to the idle set
/// immediately after a task is dispatched (true — used for async connection plugins multiplexing
/// many tasks over one transport) or held until that task's terminal result arrives (false —
/// used for CPU-bound, one-task-at-a-time work like content generation).
#[derive(Clone)]
pub struct PoolConfig {
    pub workload_class: String,
    pub max_workers: usize,
    pub supports_concurrent_tasks: bool,
}

struct PoolState {
    config: PoolConfig,
    spawner: Arc<dyn WorkerSpawner>,
    executor: Executor,
    /// Gates how many worker slots may be in use at once; a slot is "in use" from the moment a
    /// task acquires it until it is released, whether or not a process has actually been spawned
    /// for it yet.
    capacity: Semaphore,
    /// Ids of already-spawned, currently-idle workers, used as a LIFO stack: popping an empty
    /// stack (but a held capacity permit) means "spawn a new worker for this slot".
    idle_ids: Mutex<Vec<String>>,
    workers: Mutex<HashMap<String, SpawnedWorker>>,
    requested_tasks: Mutex<HashMap<TaskId, String>>,
    relayed_tasks: Mutex<HashMap<TaskId, String>>,
    result_tx: Mutex<Option<mpsc::UnboundedSender<(String, BaseTask)>>>,
}

/// A pool of isolated worker processes all servicing one workload class, fed by a task queue and
/// draining results into an outbound channel a `TaskManager` consumes.
pub struct WorkerPool {
    config: PoolConfig,
    state: Arc<PoolState>,
    task_tx: mpsc::UnboundedSender<BaseTask>,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(String, BaseTask)>>,
    task_queue_task: JoinHandle<()>,
    response_task: JoinHandle<()>,
}

impl WorkerPool {
    pub fn start(config: PoolConfig, spawner: Arc<dyn WorkerSpawner>, executor: Executor) -> WorkerPool {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let state = Arc::new(PoolState {
            capacity: Semaphore::new(config.max_workers),
            idle_ids: Mutex::new(Vec::new()),
            workers: Mutex::new(HashMap::new()),
            requested_tasks: Mutex::new(HashMap::new()),
            relayed_tasks: Mutex::new(HashMap::new()),
            result_tx: Mutex::new(Some(result_tx)),
            config: config.clone(),
            spawner,
            executor: executor.clone(),
        });

        let task_queue_task = executor.native_spawn(run_task_queue(state.clone(), task_rx));
        let response_task = executor.native_spawn(run_response_task(state.clone(), result_rx, outbound_tx));

        WorkerPool {
            config,
            state,
            task_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            task_queue_task,
            response_task,
        }
    }

    pub fn workload_class(&self) -> &str {
        &self.config.workload_class
    }

    /// Enqueues a task for this pool to dispatch. Fails only if the pool has already been
    /// stopped.
    pub fn queue(&self, task: BaseTask) -> Result<(), CoreError> {
        self.task_tx
            .send(task)
            .map_err(|_| CoreError::Fatal(format!("{} pool's task queue is closed", self.config.workload_class)))
    }

    /// Awaits the next `(workload_class, task)` this pool has produced: either a terminal
    /// response to a task it was given, or a sub-request a worker spontaneously emitted that
    /// needs dispatch elsewhere.
    pub async fn recv(&self) -> Option<(String, BaseTask)> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Sends `ShutdownWorkerRequest` to every live worker, then waits (up to a bounded timeout)
    /// for both background tasks and every worker process to exit. An overrun is logged and
    /// leaked rather than blocked on indefinitely, matching this implementation's documented
    /// shutdown-timeout policy.
    pub async fn stop(self, drain: bool) {
        if drain {
            log::debug!(
                "{} pool stop(drain=true) requested; in-flight completion is handled the same as a normal stop in this implementation",
                self.config.workload_class
            );
        }

        let workers: HashMap<String, SpawnedWorker> = std::mem::take(&mut *self.state.workers.lock());
        for worker in workers.values() {
            let _ = worker.send(BaseTask::ShutdownWorkerRequest {
                id: Uuid::new_v4(),
                options: TaskOptions::new(),
            });
        }

        drop(self.task_tx);
        self.state.result_tx.lock().take();

        const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task_queue_task).await.is_err() {
            log::warn!(
                "{} pool's task-queue task did not exit within the shutdown timeout; leaking it",
                self.config.workload_class
            );
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.response_task).await.is_err() {
            log::warn!(
                "{} pool's response task did not exit within the shutdown timeout; leaking it",
                self.config.workload_class
            );
        }

        for (id, worker) in workers {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, worker.join()).await.is_err() {
                log::warn!("worker {id} did not exit within the shutdown timeout; leaking it");
            }
        }
    }
}

async fn acquire_worker(state: &Arc<PoolState>) -> Result<String, CoreError> {
    let permit = state
        .capacity
        .acquire()
        .await
        .map_err(|_| CoreError::Fatal("pool capacity semaphore was closed".to_string()))?;
    permit.forget();

    if let Some(id) = state.idle_ids.lock().pop() {
        return Ok(id);
    }

    let result_tx = state
        .result_tx
        .lock()
        .clone()
        .ok_or_else(|| CoreError::Fatal("pool is shutting down".to_string()))?;
    let worker = state.spawner.spawn(&state.executor, result_tx).await?;
    let id = worker.id.clone();
    state.workers.lock().insert(id.clone(), worker);
    Ok(id)
}

fn release_worker(state: &Arc<PoolState>, id: String) {
    state.idle_ids.lock().push(id);
    state.capacity.add_permits(1);
}

fn deliver_to_worker(state: &PoolState, worker_id: &str, task: BaseTask) {
    let workers = state.workers.lock();
    match workers.get(worker_id) {
        Some(worker) => {
            if let Err(err) = worker.send(task) {
                log::error!("{} pool failed delivering to worker {worker_id}: {err}", state.config.workload_class);
            }
        }
        None => log::error!(
            "{} pool has no record of worker {worker_id}; dropping message",
            state.config.workload_class
        ),
    }
}

async fn run_task_queue(state: Arc<PoolState>, mut task_rx: mpsc::UnboundedReceiver<BaseTask>) {
    while let Some(task) = task_rx.recv().await {
        let task_id = task.task_id();

        if let Some(worker_id) = state.relayed_tasks.lock().remove(&task_id) {
            deliver_to_worker(&state, &worker_id, task);
            continue;
        }

        let worker_id = match acquire_worker(&state).await {
            Ok(id) => id,
            Err(err) => {
                log::error!("{} pool could not acquire a worker for task {task_id}: {err}", state.config.workload_class);
                continue;
            }
        };

        deliver_to_worker(&state, &worker_id, task);
        state.requested_tasks.lock().insert(task_id, worker_id.clone());
        if state.config.supports_concurrent_tasks {
            release_worker(&state, worker_id);
        }
    }
}

async fn run_response_task(
    state: Arc<PoolState>,
    mut result_rx: mpsc::UnboundedReceiver<(String, BaseTask)>,
    outbound_tx: mpsc::UnboundedSender<(String, BaseTask)>,
) {
    while let Some((worker_id, task)) = result_rx.recv().await {
        let task_id = task.task_id();

        if let Some(target_worker_id) = state.relayed_tasks.lock().remove(&task_id) {
            deliver_to_worker(&state, &target_worker_id, task);
            continue;
        }

        if state.requested_tasks.lock().remove(&task_id).is_some() {
            if !state.config.supports_concurrent_tasks {
                release_worker(&state, worker_id);
            }
            if outbound_tx.send((state.config.workload_class.clone(), task)).is_err() {
                log::warn!(
                    "{} pool's outbound channel closed while delivering a terminal result",
                    state.config.workload_class
                );
            }
            continue;
        }

        state.relayed_tasks.lock().insert(task_id, worker_id);
        if outbound_tx.send((state.config.workload_class.clone(), task)).is_err() {
            log::warn!(
                "{} pool's outbound channel closed while relaying a sub-request",
                state.config.workload_class
            );
        }
    }
}
