//! The per-process async dispatch loop that runs inside each worker: multiplexes many logical
//! tasks over a small number of cached transport connections, and can suspend a task to send
//! sub-requests back to the controller.

mod context;
mod dispatch;

pub use context::{WorkerState, WorkerTaskContext};

use blob_store::BlobStore;
use message_model::{read_framed, write_framed, BaseTask, ShutdownStatus};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::LocalSet;

/// A short hex id used to tag a worker's log lines, generated the way the original uses
/// `secrets.token_hex`.
pub fn generate_worker_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Runs a worker's main dispatch loop to completion: reads framed `BaseTask`s from `stdin`,
/// handling each as described in the component design, until a `ShutdownWorkerRequest` arrives
/// or `stdin` closes. Writes every outbound message (responses, and sub-requests an action
/// emits) as framed `BaseTask`s to `stdout`.
///
/// Runs on a `tokio::task::LocalSet`: a single logical thread multiplexing every task this
/// worker is running, matching the original's single asyncio event loop.
pub async fn run_worker_loop<R, W>(id: String, mut stdin: R, stdout: W, blob_store: BlobStore)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (result_tx, result_rx) = mpsc::unbounded_channel::<BaseTask>();
    let state = WorkerState::new(id.clone(), blob_store, result_tx);

    let local = LocalSet::new();
    local
        .run_until(async move {
            let writer_task = tokio::task::spawn_local(run_stdout_writer(stdout, result_rx));

            loop {
                match read_framed::<BaseTask, _>(&mut stdin).await {
                    Ok(Some(BaseTask::ShutdownWorkerRequest { id: shutdown_id, .. })) => {
                        state.emit(BaseTask::ShutdownWorkerResponse {
                            id: shutdown_id,
                            status: ShutdownStatus::Ack,
                        });
                        state.close_all_connections().await;
                        state.emit(BaseTask::ShutdownWorkerResponse {
                            id: shutdown_id,
                            status: ShutdownStatus::Ok,
                        });
                        break;
                    }
                    Ok(Some(task)) if !task.is_request() => {
                        state.deliver_response(task);
                    }
                    Ok(Some(task)) => {
                        let state = state.clone();
                        tokio::task::spawn_local(dispatch::dispatch_task_safe(state, task));
                    }
                    Ok(None) => {
                        log::info!("worker {} stdin closed; exiting dispatch loop", state.id);
                        break;
                    }
                    Err(err) => {
                        log::error!("worker {} frame decode error: {err}", state.id);
                        break;
                    }
                }
            }

            drop(state);
            let _ = writer_task.await;
        })
        .await;
}

async fn run_stdout_writer<W>(mut stdout: W, mut result_rx: mpsc::UnboundedReceiver<BaseTask>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(task) = result_rx.recv().await {
        if let Err(err) = write_framed(&mut stdout, &task).await {
            log::error!("failed writing worker response frame: {err}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_model::{BaseTask, TaskOptions};
    use uuid::Uuid;

    #[tokio::test(flavor = "multi_thread")]
    async fn pings_are_answered_with_pong() {
        let dir = tempfile::tempdir().unwrap();
        let blob_store = BlobStore::new(dir.path()).await.unwrap();

        let mut request_bytes = Vec::new();
        let task_id = Uuid::new_v4();
        write_framed(
            &mut request_bytes,
            &BaseTask::WorkerRequest {
                id: task_id,
                options: TaskOptions::new(),
                ping: "hello".to_string(),
            },
        )
        .await
        .unwrap();
        write_framed(
            &mut request_bytes,
            &BaseTask::ShutdownWorkerRequest {
                id: Uuid::new_v4(),
                options: TaskOptions::new(),
            },
        )
        .await
        .unwrap();

        // Drive the loop with an in-memory duplex so we can inspect every emitted frame.
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (mut server_read, mut server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let writer_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut client_read, &mut buf)
                .await
                .unwrap();
            buf
        });

        tokio::io::AsyncWriteExt::write_all(&mut client_write, &request_bytes)
            .await
            .unwrap();
        drop(client_write);

        run_worker_loop("deadbeef".to_string(), &mut server_read, server_write, blob_store).await;
        drop(server_read);

        let written = writer_handle.await.unwrap();
        let mut cursor = std::io::Cursor::new(written);
        let first: BaseTask = read_framed(&mut cursor).await.unwrap().unwrap();
        match first {
            BaseTask::TaskResult { id, result } => {
                assert_eq!(id, task_id);
                assert_eq!(result["pong"], message_model::Value::from("hello"));
            }
            other => panic!("expected a pong TaskResult, got {other:?}"),
        }

        let second: BaseTask = read_framed(&mut cursor).await.unwrap().unwrap();
        assert!(matches!(
            second,
            BaseTask::ShutdownWorkerResponse {
                status: message_model::ShutdownStatus::Ack,
                ..
            }
        ));

        let third: BaseTask = read_framed(&mut cursor).await.unwrap().unwrap();
        assert!(matches!(
            third,
            BaseTask::ShutdownWorkerResponse {
                status: message_model::ShutdownStatus::Ok,
                ..
            }
        ));
    }
}
