use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use blob_store::BlobStore;
use hashing::Fingerprint;
use message_model::{BaseTask, CoreError, TaskId, TaskOptions, Value};
use plugin_registry::{Become, Connection, TaskContext};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

/// State shared by every logical task a worker process is running concurrently: the connection
/// cache (keyed by a fingerprint of the connection's resolved option map) and the mailbox table
/// used to correlate sub-request responses.
pub struct WorkerState {
    pub id: String,
    pub blob_store: BlobStore,
    connections: AsyncMutex<HashMap<Fingerprint, Arc<dyn Connection>>>,
    incoming: parking_lot::Mutex<HashMap<TaskId, oneshot::Sender<BaseTask>>>,
    result_tx: tokio::sync::mpsc::UnboundedSender<BaseTask>,
}

impl WorkerState {
    pub fn new(
        id: String,
        blob_store: BlobStore,
        result_tx: tokio::sync::mpsc::UnboundedSender<BaseTask>,
    ) -> Arc<WorkerState> {
        Arc::new(WorkerState {
            id,
            blob_store,
            connections: AsyncMutex::new(HashMap::new()),
            incoming: parking_lot::Mutex::new(HashMap::new()),
            result_tx,
        })
    }

    pub fn emit(&self, task: BaseTask) {
        // The receiving end lives in the same process (the stdout-writer task) for as long as
        // the worker is alive; a send error here means that task already exited, which only
        // happens during shutdown teardown.
        if self.result_tx.send(task).is_err() {
            log::warn!("worker {} dropped a message after its result sink closed", self.id);
        }
    }

    /// Delivers a response to the mailbox registered for its task id, if one is still waiting.
    /// An unknown id is logged and discarded, per the dispatch loop's contract.
    pub fn deliver_response(&self, task: BaseTask) {
        let id = task.task_id();
        let sender = self.incoming.lock().remove(&id);
        match sender {
            Some(sender) => {
                let _ = sender.send(task);
            }
            None => log::warn!("worker {} received a response for unknown task {id}", self.id),
        }
    }

    /// Fetches the cached connection for `options`, constructing, configuring and opening it on
    /// first use for this fingerprint. Held behind the worker's single connection lock so two
    /// concurrent requests for the same brand-new fingerprint can't race to open it twice.
    pub async fn connection_for(
        &self,
        options: &TaskOptions,
    ) -> Result<Arc<dyn Connection>, CoreError> {
        let fingerprint = fingerprint_connection_options(options);
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(&fingerprint) {
            return Ok(existing.clone());
        }
        let connection = plugin_registry::get_connection(options)?;
        connection.connect().await?;
        connections.insert(fingerprint, connection.clone());
        Ok(connection)
    }

    /// Closes every cached connection concurrently, as the shutdown sequence requires.
    pub async fn close_all_connections(&self) {
        let connections: Vec<Arc<dyn Connection>> =
            self.connections.lock().await.values().cloned().collect();
        let closes = connections.iter().map(|c| c.close());
        let results = futures::future::join_all(closes).await;
        for result in results {
            if let Err(err) = result {
                log::warn!("worker {} failed to close a connection: {err}", self.id);
            }
        }
    }
}

/// A deterministic fingerprint of a connection's resolved option map, used as the connection
/// cache key. Two `ExecCommandRequest`s with identical `plugin_options[connection_plugin]` hash
/// to the same fingerprint and therefore share one open connection.
fn fingerprint_connection_options(options: &TaskOptions) -> Fingerprint {
    let connection_name = options
        .connection_plugin()
        .unwrap_or("")
        .to_string();
    let empty = BTreeMap::new();
    let plugin_options = options
        .plugin_options
        .get(&connection_name)
        .unwrap_or(&empty);
    let encoded = format!(
        "{connection_name}:{}",
        Value::Map(plugin_options.clone()).canonical_encode()
    );
    Fingerprint::hash_bytes(encoded.as_bytes())
}

/// The concrete `TaskContext` an `ActionRequest` is dispatched with.
pub struct WorkerTaskContext {
    options: TaskOptions,
    state: Arc<WorkerState>,
}

impl WorkerTaskContext {
    pub fn new(options: TaskOptions, state: Arc<WorkerState>) -> WorkerTaskContext {
        WorkerTaskContext { options, state }
    }

    pub fn register_mailbox(&self, id: TaskId) -> oneshot::Receiver<BaseTask> {
        let (tx, rx) = oneshot::channel();
        self.state.incoming.lock().insert(id, tx);
        rx
    }
}

#[async_trait]
impl TaskContext for WorkerTaskContext {
    fn task_options(&self) -> &TaskOptions {
        &self.options
    }

    async fn connection(&self) -> Result<Arc<dyn Connection>, CoreError> {
        self.state.connection_for(&self.options).await
    }

    fn become_plugin(&self) -> Option<Arc<dyn Become>> {
        plugin_registry::get_become(&self.options).ok().flatten()
    }

    fn blob_store(&self) -> &BlobStore {
        &self.state.blob_store
    }

    async fn send_message(&self, request: BaseTask) -> Result<BTreeMap<String, Value>, CoreError> {
        let id = request.task_id();
        let rx = self.register_mailbox(id);
        self.state.emit(request);

        let response = rx.await.map_err(|_| {
            CoreError::Fatal(format!("mailbox for sub-request {id} was dropped without a reply"))
        })?;

        match response {
            BaseTask::TaskResult { result, .. } => Ok(result),
            BaseTask::TaskFailedResult { message, .. } => Err(CoreError::TaskFailure(message)),
            other => Err(CoreError::Fatal(format!(
                "sub-request {id} was answered with an unexpected variant: {other:?}"
            ))),
        }
    }
}
