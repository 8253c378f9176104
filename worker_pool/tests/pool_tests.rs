use std::sync::Arc;

use async_trait::async_trait;
use message_model::{read_framed, write_framed, BaseTask, CoreError, TaskOptions};
use task_executor::Executor;
use tokio::sync::mpsc;
use uuid::Uuid;
use worker_pool::{PoolConfig, SpawnedWorker, WorkerPool, WorkerSpawner};

/// Drives a real `worker::run_worker_loop` over an in-memory duplex instead of a child process,
/// so pool bookkeeping (capacity, relay routing, shutdown) can be exercised without forking the
/// controller binary.
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

async fn start_pool(
    max_workers: usize,
    supports_concurrent_tasks: bool,
) -> (WorkerPool, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let blob_store = blob_store::BlobStore::new(dir.path()).await.unwrap();

    let spawner = Arc::new(InProcessSpawner { blob_store });
    let executor = Executor::new();
    let pool = WorkerPool::start(
        PoolConfig {
            workload_class: "test".to_string(),
            max_workers,
            supports_concurrent_tasks,
        },
        spawner,
        executor,
    );
    (pool, dir)
}

fn ping(id: Uuid, message: &str) -> BaseTask {
    BaseTask::WorkerRequest {
        id,
        options: TaskOptions::new(),
        ping: message.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn dispatches_a_task_and_returns_its_result() {
    let (pool, _dir) = start_pool(2, true).await;

    let id = Uuid::new_v4();
    pool.queue(ping(id, "hello")).unwrap();

    let (workload_class, task) = pool.recv().await.unwrap();
    assert_eq!(workload_class, "test");
    match task {
        BaseTask::TaskResult { id: got_id, result } => {
            assert_eq!(got_id, id);
            assert_eq!(result["pong"], message_model::Value::from("hello"));
        }
        other => panic!("expected a TaskResult, got {other:?}"),
    }

    pool.stop(false).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_single_worker_serves_several_sequential_tasks() {
    let (pool, _dir) = start_pool(1, false).await;

    for i in 0..3 {
        let id = Uuid::new_v4();
        pool.queue(ping(id, &format!("msg-{i}"))).unwrap();
        let (_, task) = pool.recv().await.unwrap();
        assert_eq!(task.task_id(), id);
    }

    pool.stop(false).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_completes_after_in_flight_work_finishes() {
    let (pool, _dir) = start_pool(1, true).await;

    let id = Uuid::new_v4();
    pool.queue(ping(id, "done")).unwrap();
    let (_, task) = pool.recv().await.unwrap();
    assert_eq!(task.task_id(), id);

    pool.stop(false).await;
}
