//! Bringing a worker online: a `WorkerSpawner` owns turning one logical worker slot into a
//! running transport (a child process in production, an in-process fake in tests).

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use message_model::{read_framed, write_framed, BaseTask, CoreError};
use task_executor::Executor;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running worker: its input queue (framed writes land on the process's stdin) and the
/// background tasks driving its two pipes and its exit.
pub struct SpawnedWorker {
    pub id: String,
    input_tx: mpsc::UnboundedSender<BaseTask>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
    exit_task: JoinHandle<()>,
}

impl SpawnedWorker {
    /// Assembles a `SpawnedWorker` from its parts. Exposed so a `WorkerSpawner` that drives an
    /// in-process fake transport (rather than a real child process) can still produce one.
    pub fn new(
        id: String,
        input_tx: mpsc::UnboundedSender<BaseTask>,
        writer_task: JoinHandle<()>,
        reader_task: JoinHandle<()>,
        exit_task: JoinHandle<()>,
    ) -> SpawnedWorker {
        SpawnedWorker {
            id,
            input_tx,
            writer_task,
            reader_task,
            exit_task,
        }
    }

    /// Enqueues a message on this worker's input pipe. Only fails if the worker's writer task
    /// has already exited (the pipe is gone), which the pool surfaces as a `Fatal` error.
    pub fn send(&self, task: BaseTask) -> Result<(), CoreError> {
        self.input_tx
            .send(task)
            .map_err(|_| CoreError::Fatal(format!("worker {} input pipe is closed", self.id)))
    }

    /// Closes the input queue (if not already) and waits for every background task driving this
    /// worker's pipes and process exit to finish.
    pub async fn join(self) {
        drop(self.input_tx);
        let _ = self.writer_task.await;
        let _ = self.reader_task.await;
        let _ = self.exit_task.await;
    }
}

/// Turns one pool slot into a live worker transport. Production uses `SubprocessSpawner`; tests
/// substitute an in-process fake so pool logic (capacity, relay bookkeeping, shutdown) can be
/// exercised without forking a real binary.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(
        &self,
        executor: &Executor,
        result_tx: mpsc::UnboundedSender<(String, BaseTask)>,
    ) -> Result<SpawnedWorker, CoreError>;
}

/// Spawns a worker by re-executing the controller binary with the hidden
/// `--worker-subprocess <workload-class>` flag, wiring its stdio pipes through the framed codec.
pub struct SubprocessSpawner {
    binary: PathBuf,
    workload_class: String,
    blob_store_root: PathBuf,
}

impl SubprocessSpawner {
    pub fn new(binary: PathBuf, workload_class: String, blob_store_root: PathBuf) -> SubprocessSpawner {
        SubprocessSpawner {
            binary,
            workload_class,
            blob_store_root,
        }
    }
}

#[async_trait]
impl WorkerSpawner for SubprocessSpawner {
    async fn spawn(
        &self,
        executor: &Executor,
        result_tx: mpsc::UnboundedSender<(String, BaseTask)>,
    ) -> Result<SpawnedWorker, CoreError> {
        let id = generate_worker_id();

        let mut child = Command::new(&self.binary)
            .arg("--worker-subprocess")
            .arg(&self.workload_class)
            .arg(&self.blob_store_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                CoreError::Fatal(format!("spawning worker subprocess: {err}"))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .expect("stdin was piped at spawn time");
        let mut stdout = child
            .stdout
            .take()
            .expect("stdout was piped at spawn time");

        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<BaseTask>();

        let writer_id = id.clone();
        let writer_task = executor.native_spawn(async move {
            while let Some(task) = input_rx.recv().await {
                if let Err(err) = write_framed(&mut stdin, &task).await {
                    log::error!("worker {writer_id} write failed: {err}");
                    break;
                }
            }
        });

        let reader_id = id.clone();
        let reader_task = executor.native_spawn(async move {
            loop {
                match read_framed::<BaseTask, _>(&mut stdout).await {
                    Ok(Some(task)) => {
                        if result_tx.send((reader_id.clone(), task)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::error!("worker {reader_id} read failed: {err}");
                        break;
                    }
                }
            }
        });

        let exit_id = id.clone();
        let exit_task = executor.native_spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => log::warn!("worker {exit_id} exited with {status}"),
                Err(err) => log::error!("worker {exit_id} wait failed: {err}"),
            }
        });

        Ok(SpawnedWorker {
            id,
            input_tx,
            writer_task,
            reader_task,
            exit_task,
        })
    }
}

fn generate_worker_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
