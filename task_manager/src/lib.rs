//! The top-level dispatcher: classifies incoming task requests, routes them to a per-workload
//! `WorkerPool` (creating pools lazily), reassembles responses, and correlates worker-originated
//! sub-requests back to their originating pool.

mod spawner_factory;

pub use spawner_factory::{PoolSpawnerFactory, SubprocessPoolSpawnerFactory};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use message_model::{BaseTask, CoreError, TaskId};
use parking_lot::Mutex;
use task_executor::Executor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use worker_pool::{PoolConfig, WorkerPool};

/// Tunable pool-sizing knobs the reference CLI surfaces via `Config` (§4.8); `get_pool_for_task`
/// only ever produces the two workload classes described in the component design (`content`, or
/// `connection-<plugin>`), so these are the only two numbers a caller can move.
#[derive(Clone, Copy, Debug)]
pub struct TaskManagerConfig {
    pub content_max_workers: usize,
    pub connection_max_workers: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> TaskManagerConfig {
        TaskManagerConfig {
            content_max_workers: 10,
            connection_max_workers: 1,
        }
    }
}

struct PoolEntry {
    pool: Arc<WorkerPool>,
    forwarder: JoinHandle<()>,
}

pub struct TaskManager {
    executor: Executor,
    config: TaskManagerConfig,
    spawner_factory: Arc<dyn PoolSpawnerFactory>,
    pools: Mutex<HashMap<String, PoolEntry>>,
    /// Ids originated directly by the caller (via `queue(.., track=true)`); their terminal
    /// result is returned from `get()` rather than being re-dispatched.
    running_tasks: Mutex<HashSet<TaskId>>,
    /// Ids the manager has relayed to a different pool than the one that produced them, mapped
    /// to the *originating* pool's workload class so the eventual response can be routed back.
    relayed_tasks: Mutex<HashMap<TaskId, String>>,
    result_tx: mpsc::UnboundedSender<(String, BaseTask)>,
    result_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(String, BaseTask)>>,
}

impl TaskManager {
    pub fn new(executor: Executor, spawner_factory: Arc<dyn PoolSpawnerFactory>) -> TaskManager {
        Self::with_config(executor, spawner_factory, TaskManagerConfig::default())
    }

    pub fn with_config(
        executor: Executor,
        spawner_factory: Arc<dyn PoolSpawnerFactory>,
        config: TaskManagerConfig,
    ) -> TaskManager {
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        TaskManager {
            executor,
            config,
            spawner_factory,
            pools: Mutex::new(HashMap::new()),
            running_tasks: Mutex::new(HashSet::new()),
            relayed_tasks: Mutex::new(HashMap::new()),
            result_tx,
            result_rx: tokio::sync::Mutex::new(result_rx),
        }
    }

    /// Classifies `task` into its workload class and `PoolConfig`. `ContentDescriptorRequest`
    /// always goes to the CPU-bound `content` class; every other request goes to a
    /// `connection-<plugin>` class whose single worker multiplexes many concurrent tasks over
    /// one transport. Response variants never reach this function.
    fn pool_config_for(&self, task: &BaseTask) -> Result<PoolConfig, CoreError> {
        if matches!(task, BaseTask::ContentDescriptorRequest { .. }) {
            return Ok(PoolConfig {
                workload_class: "content".to_string(),
                max_workers: self.config.content_max_workers,
                supports_concurrent_tasks: false,
            });
        }

        let options = task.options().ok_or_else(|| {
            CoreError::Fatal("cannot select a pool for a response variant".to_string())
        })?;
        let connection = options.connection_plugin().ok_or_else(|| {
            CoreError::ValidationError(
                "task options have no connection plugin; cannot select a workload class".to_string(),
            )
        })?;

        Ok(PoolConfig {
            workload_class: format!("connection-{connection}"),
            max_workers: self.config.connection_max_workers,
            supports_concurrent_tasks: true,
        })
    }

    /// Returns the pool for `workload_class`, spawning it (and its forwarding task, which
    /// drains the pool's outbound channel into the manager's central result channel) on first
    /// use.
    fn pool_for(&self, config: PoolConfig) -> Arc<WorkerPool> {
        let mut pools = self.pools.lock();
        if let Some(entry) = pools.get(&config.workload_class) {
            return entry.pool.clone();
        }

        let spawner = self.spawner_factory.spawner_for(&config.workload_class);
        let workload_class = config.workload_class.clone();
        let pool = Arc::new(WorkerPool::start(config, spawner, self.executor.to_borrowed()));

        let forwarding_pool = pool.clone();
        let result_tx = self.result_tx.clone();
        let forwarder = self.executor.native_spawn(async move {
            while let Some((workload_class, task)) = forwarding_pool.recv().await {
                if result_tx.send((workload_class, task)).is_err() {
                    break;
                }
            }
        });

        pools.insert(
            workload_class,
            PoolEntry {
                pool: pool.clone(),
                forwarder,
            },
        );
        pool
    }

    /// Enqueues `task` for dispatch to the pool its workload class selects (creating the pool
    /// on demand). If `track` is set, the id is marked as caller-owned: its terminal result will
    /// be returned from `get()` rather than treated as a sub-request needing re-dispatch.
    pub fn queue(&self, task: BaseTask, track: bool) -> Result<(), CoreError> {
        let task_id = task.task_id();
        let config = self.pool_config_for(&task)?;
        let pool = self.pool_for(config);
        pool.queue(task)?;
        if track {
            self.running_tasks.lock().insert(task_id);
        }
        Ok(())
    }

    /// Awaits the next caller-owned terminal result. Internally drains the central result
    /// channel, silently re-dispatching any worker-originated sub-request to the pool its
    /// workload class selects, and routing the eventual response back to whichever pool
    /// originated it. Returns `None` once every pool's outbound channel has closed.
    pub async fn get(&self) -> Option<BaseTask> {
        loop {
            let (workload_class, task) = self.result_rx.lock().await.recv().await?;
            let task_id = task.task_id();

            if self.running_tasks.lock().contains(&task_id) {
                return Some(task);
            }

            if let Some(origin_class) = self.relayed_tasks.lock().remove(&task_id) {
                self.route_to_pool(&origin_class, task);
                continue;
            }

            self.relayed_tasks.lock().insert(task_id, workload_class);
            if let Err(err) = self.queue(task, false) {
                log::error!("failed to re-dispatch sub-request {task_id}: {err}");
            }
        }
    }

    fn route_to_pool(&self, workload_class: &str, task: BaseTask) {
        let pool = self.pools.lock().get(workload_class).map(|entry| entry.pool.clone());
        match pool {
            Some(pool) => {
                if let Err(err) = pool.queue(task) {
                    log::error!("failed routing a response back to pool {workload_class}: {err}");
                }
            }
            None => log::error!(
                "no pool {workload_class} is live to receive a relayed response for task {}",
                task.task_id()
            ),
        }
    }

    /// Marks `task_id` as no longer caller-owned. Callers should invoke this once they've
    /// consumed the terminal result `get()` returned for it.
    pub fn finish(&self, task_id: TaskId) {
        self.running_tasks.lock().remove(&task_id);
    }

    /// Stops every pool: sends `ShutdownWorkerRequest` into every worker, waits for each pool's
    /// forwarding task and background tasks to exit, and joins every worker process.
    pub async fn shutdown(&self) {
        let entries: Vec<PoolEntry> = std::mem::take(&mut *self.pools.lock()).into_values().collect();
        for entry in entries {
            entry.forwarder.abort();
            let _ = entry.forwarder.await;
            match Arc::try_unwrap(entry.pool) {
                Ok(pool) => pool.stop(false).await,
                Err(_) => log::warn!("a pool still has outstanding references at shutdown; leaking it"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use message_model::{read_framed, write_framed, PluginKind, TaskOptions, Value};
    use uuid::Uuid;
    use worker_pool::{SpawnedWorker, WorkerSpawner};

    /// Drives a real `worker::run_worker_loop` over an in-memory duplex for every spawned
    /// worker, so the manager's pool-selection and relay logic can be exercised without forking
    /// the controller binary.
    struct InProcessSpawnerFactory {
        blob_store: blob_store::BlobStore,
    }

    struct InProcessSpawner {
        blob_store: blob_store::BlobStore,
    }

    #[async_trait]
    impl WorkerSpawner for InProcessSpawner {
        async fn spawn(
            &self,
            executor: &Executor,
            result_tx: mpsc::UnboundedSender<(String, BaseTask)>,
        ) -> Result<SpawnedWorker, CoreError> {
            let id = format!("fake-{}", Uuid::new_v4());

            let (controller_side, worker_side) = tokio::io::duplex(64 * 1024);
            let (controller_read, mut controller_write) = tokio::io::split(controller_side);
            let (worker_read, worker_write) = tokio::io::split(worker_side);
            let mut controller_read = controller_read;

            let blob_store = self.blob_store.clone();
            let worker_id = id.clone();
            let process_task = executor.native_spawn(async move {
                worker::run_worker_loop(worker_id, worker_read, worker_write, blob_store).await;
            });

            let (input_tx, mut input_rx) = mpsc::unbounded_channel::<BaseTask>();
            let writer_task = executor.native_spawn(async move {
                while let Some(task) = input_rx.recv().await {
                    if write_framed(&mut controller_write, &task).await.is_err() {
                        break;
                    }
                }
            });

            let reader_id = id.clone();
            let reader_task = executor.native_spawn(async move {
                loop {
                    match read_framed::<BaseTask, _>(&mut controller_read).await {
                        Ok(Some(task)) => {
                            if result_tx.send((reader_id.clone(), task)).is_err() {
                                break;
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            });

            Ok(SpawnedWorker::new(id, input_tx, writer_task, reader_task, process_task))
        }
    }

    impl PoolSpawnerFactory for InProcessSpawnerFactory {
        fn spawner_for(&self, _workload_class: &str) -> Arc<dyn WorkerSpawner> {
            Arc::new(InProcessSpawner {
                blob_store: self.blob_store.clone(),
            })
        }
    }

    async fn manager_with_fake_workers() -> (TaskManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let blob_store = blob_store::BlobStore::new(dir.path()).await.unwrap();
        let factory = Arc::new(InProcessSpawnerFactory { blob_store });
        let manager = TaskManager::new(Executor::new(), factory);
        (manager, dir)
    }

    fn local_options() -> TaskOptions {
        let mut options = TaskOptions::new();
        options
            .plugins
            .insert(PluginKind::Connection, "builtin.connection.local".to_string());
        options
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn routes_a_request_and_returns_its_result() {
        let (manager, _dir) = manager_with_fake_workers().await;

        let id = Uuid::new_v4();
        manager
            .queue(
                BaseTask::WorkerRequest {
                    id,
                    options: local_options(),
                    ping: "hello".to_string(),
                },
                true,
            )
            .unwrap();

        let task = manager.get().await.unwrap();
        assert_eq!(task.task_id(), id);
        match task {
            BaseTask::TaskResult { result, .. } => {
                assert_eq!(result["pong"], Value::from("hello"));
            }
            other => panic!("expected a TaskResult, got {other:?}"),
        }
        manager.finish(id);

        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tasks_without_a_connection_plugin_are_rejected() {
        let (manager, _dir) = manager_with_fake_workers().await;
        let err = manager
            .queue(
                BaseTask::WorkerRequest {
                    id: Uuid::new_v4(),
                    options: TaskOptions::new(),
                    ping: "hi".to_string(),
                },
                true,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn action_sub_request_relays_through_the_content_pool_and_back() {
        let (manager, _dir) = manager_with_fake_workers().await;

        let mut action_args = BTreeMap::new();
        action_args.insert("key".to_string(), Value::from("greeting"));

        let mut options = local_options();
        options
            .plugins
            .insert(PluginKind::Action, "builtin.action.fetch_payload".to_string());

        let id = Uuid::new_v4();
        manager
            .queue(
                BaseTask::ActionRequest {
                    id,
                    options,
                    action: "fetch_payload".to_string(),
                    action_args,
                },
                true,
            )
            .unwrap();

        let task = manager.get().await.unwrap();
        assert_eq!(task.task_id(), id);
        match task {
            BaseTask::TaskResult { result, .. } => {
                assert_eq!(result["content"], Value::from("payload:greeting\n"));
                assert_eq!(result["failed"], Value::Bool(false));
            }
            other => panic!("expected a TaskResult, got {other:?}"),
        }
        manager.finish(id);

        // Both the `connection-local` pool (which ran the action) and `content` pool (which
        // serviced the sub-request) should have come into existence along the way.
        assert_eq!(manager.pools.lock().len(), 2);
        assert!(manager.pools.lock().contains_key("content"));

        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn distinct_connection_plugins_get_distinct_pools() {
        let (manager, _dir) = manager_with_fake_workers().await;

        let mut ssh_options = TaskOptions::new();
        ssh_options
            .plugins
            .insert(PluginKind::Connection, "builtin.connection.ssh".to_string());

        let local_id = Uuid::new_v4();
        manager
            .queue(
                BaseTask::WorkerRequest {
                    id: local_id,
                    options: local_options(),
                    ping: "a".to_string(),
                },
                true,
            )
            .unwrap();
        let ssh_id = Uuid::new_v4();
        manager
            .queue(
                BaseTask::WorkerRequest {
                    id: ssh_id,
                    options: ssh_options,
                    ping: "b".to_string(),
                },
                true,
            )
            .unwrap();

        let mut seen = HashSet::new();
        for _ in 0..2 {
            let task = manager.get().await.unwrap();
            seen.insert(task.task_id());
            manager.finish(task.task_id());
        }
        assert!(seen.contains(&local_id));
        assert!(seen.contains(&ssh_id));
        assert_eq!(manager.pools.lock().len(), 2);

        manager.shutdown().await;
    }
}
