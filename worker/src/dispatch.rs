use std::sync::Arc;

use message_model::{BaseTask, CoreError, Resource, Value};
use resource_protocol::{FileReader, FileWriter, Reader, Writer};

use crate::context::{WorkerState, WorkerTaskContext};

/// Wraps `dispatch_task` in a catch-all: any `Err` is converted into a `TaskFailedResult`
/// carrying the error's `Display` chain (Rust has no tracebacks; this message is the
/// traceback-equivalent). Errors inside a worker's dispatch never escape the worker process.
pub async fn dispatch_task_safe(state: Arc<WorkerState>, task: BaseTask) {
    let id = task.task_id();
    let result = dispatch_task(state.clone(), task).await;
    let response = match result {
        Ok(response) => response,
        Err(err) => {
            log::warn!("task {id} failed: {err}");
            BaseTask::TaskFailedResult {
                id,
                message: err.to_task_failure_message(),
            }
        }
    };
    state.emit(response);
}

async fn dispatch_task(state: Arc<WorkerState>, task: BaseTask) -> Result<BaseTask, CoreError> {
    match task {
        BaseTask::ActionRequest {
            id,
            options,
            action,
            action_args,
        } => {
            let plugin = plugin_registry::get_action(&options)
                .map_err(|err| annotate(err, &action))?;
            let ctx = WorkerTaskContext::new(options, state);
            let result = plugin.run(&action_args, &ctx).await?;
            Ok(BaseTask::TaskResult { id, result })
        }

        BaseTask::ExecCommandRequest {
            id,
            options,
            cmd,
            stdin_key,
        } => {
            let connection = state.connection_for(&options).await?;
            let stdin: Option<Box<dyn Reader>> = match stdin_key {
                Some(key) => Some(Box::new(
                    state
                        .blob_store
                        .get(&key)
                        .await
                        .map_err(|err| CoreError::TransportError(err.to_string()))?,
                )),
                None => None,
            };
            let (stdout, stderr, rc) = connection.exec_command(&cmd, stdin).await?;

            let mut result = std::collections::BTreeMap::new();
            result.insert("rc".to_string(), Value::Integer(rc as i64));
            result.insert(
                "stdout".to_string(),
                Value::String(String::from_utf8_lossy(&stdout).into_owned()),
            );
            result.insert(
                "stderr".to_string(),
                Value::String(String::from_utf8_lossy(&stderr).into_owned()),
            );
            result.insert("failed".to_string(), Value::Bool(rc != 0));
            Ok(BaseTask::TaskResult { id, result })
        }

        BaseTask::PutFileRequest {
            id,
            options,
            src,
            dst_path,
        } => {
            let connection = state.connection_for(&options).await?;
            let reader = open_resource_reader(&state, &src).await?;
            connection.put_file(reader, &dst_path).await?;
            Ok(BaseTask::TaskResult {
                id,
                result: std::collections::BTreeMap::new(),
            })
        }

        BaseTask::FetchFileRequest {
            id,
            options,
            src_path,
            dst,
        } => {
            let connection = state.connection_for(&options).await?;
            let writer = open_resource_writer(&state, &dst).await?;
            connection.fetch_file(&src_path, writer).await?;
            Ok(BaseTask::TaskResult {
                id,
                result: std::collections::BTreeMap::new(),
            })
        }

        BaseTask::ContentDescriptorRequest {
            id,
            plugin,
            key,
            ..
        } => {
            plugin_registry::run_content_descriptor(&plugin, &key, &state.blob_store)
                .await
                .map_err(CoreError::GenerationFailure)?;
            Ok(BaseTask::TaskResult {
                id,
                result: std::collections::BTreeMap::new(),
            })
        }

        BaseTask::WorkerRequest { id, ping, .. } => {
            let mut result = std::collections::BTreeMap::new();
            result.insert("pong".to_string(), Value::String(ping));
            Ok(BaseTask::TaskResult { id, result })
        }

        BaseTask::ShutdownWorkerRequest { .. } => {
            unreachable!("ShutdownWorkerRequest is handled by the dispatch loop, not dispatch_task")
        }

        BaseTask::TaskResult { .. }
        | BaseTask::TaskFailedResult { .. }
        | BaseTask::ShutdownWorkerResponse { .. } => {
            unreachable!("response variants are routed to mailboxes before reaching dispatch_task")
        }
    }
}

async fn open_resource_reader(
    state: &WorkerState,
    resource: &Resource,
) -> Result<Box<dyn Reader>, CoreError> {
    match resource {
        Resource::Blob { key } => {
            let reader = state
                .blob_store
                .get(key)
                .await
                .map_err(|err| CoreError::TransportError(err.to_string()))?;
            Ok(Box::new(reader))
        }
        Resource::Filesystem { path } => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|err| CoreError::TransportError(format!("opening {path}: {err}")))?;
            Ok(Box::new(FileReader::new(file)))
        }
    }
}

async fn open_resource_writer(
    state: &WorkerState,
    resource: &Resource,
) -> Result<Box<dyn Writer>, CoreError> {
    match resource {
        Resource::Blob { key } => {
            let writer = state
                .blob_store
                .put(key)
                .await
                .map_err(|err| CoreError::TransportError(err.to_string()))?;
            Ok(Box::new(writer))
        }
        Resource::Filesystem { path } => {
            let file = tokio::fs::File::create(path)
                .await
                .map_err(|err| CoreError::TransportError(format!("creating {path}: {err}")))?;
            Ok(Box::new(FileWriter::new(file)))
        }
    }
}

fn annotate(err: CoreError, action: &str) -> CoreError {
    match err {
        CoreError::ValidationError(msg) => {
            CoreError::ValidationError(format!("resolving action {action}: {msg}"))
        }
        other => other,
    }
}
