use std::collections::BTreeMap;

use async_trait::async_trait;
use message_model::{CoreError, TaskOptions, Value};
use resource_protocol::{Reader, Writer};

/// A running remote (or local) process started by `Connection::streaming_exec_command`.
#[async_trait]
pub trait Process: Send {
    /// `None` once the process's stdin has been taken by the caller, or for connections that
    /// never exposed one (e.g. a command run with no stdin attached).
    fn stdin(&mut self) -> Option<&mut dyn Writer>;
    fn stdout(&mut self) -> &mut dyn Reader;
    fn stderr(&mut self) -> &mut dyn Reader;
    async fn wait_for_exit(&mut self) -> Result<i32, String>;
}

/// A transport that executes commands and moves files against a logical host.
///
/// Implementations are cached by a fingerprint of their resolved option map (see
/// `hashing::Fingerprint`) and shared across every task the worker dispatches for that
/// fingerprint, so methods take `&self`: any state that must not be shared across concurrent
/// calls belongs behind the implementation's own interior mutability.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Idempotent open.
    async fn connect(&self) -> Result<(), CoreError>;

    /// Idempotent close.
    async fn close(&self) -> Result<(), CoreError>;

    async fn exec_command(
        &self,
        cmd: &str,
        stdin: Option<Box<dyn Reader>>,
    ) -> Result<(Vec<u8>, Vec<u8>, i32), CoreError>;

    async fn streaming_exec_command(&self, cmd: &str) -> Result<Box<dyn Process>, CoreError>;

    /// Optional. Connections that can't drive an interactive become handshake return
    /// `TtyNotSupported`, which the dispatch loop surfaces to the action as a `TaskFailure`.
    async fn streaming_exec_command_with_tty(
        &self,
        _cmd: &str,
    ) -> Result<Box<dyn Process>, CoreError> {
        Err(CoreError::TtyNotSupported)
    }

    async fn put_file(&self, reader: Box<dyn Reader>, dst_path: &str) -> Result<(), CoreError>;

    async fn fetch_file(&self, src_path: &str, writer: Box<dyn Writer>) -> Result<(), CoreError>;
}

/// Privilege-escalation wrapper applied to a remote command.
pub trait Become: Send + Sync {
    fn build_become_command(&self, cmd: &str) -> String;
    fn requires_tty(&self) -> bool;
    /// Drives the become handshake's stdio filter: wraps the underlying streams so that a
    /// password prompt on stdout/stderr is answered on stdin before the filtered streams are
    /// handed to the caller. A concrete implementation models this as a small state machine per
    /// stream (see the design notes on the become handshake); no such implementation ships here,
    /// since concrete become plugins are out of scope for this system.
    fn apply_stdio_filter(
        &self,
        stdout: Box<dyn Reader>,
        stderr: Box<dyn Reader>,
        stdin: Box<dyn Writer>,
    ) -> (Box<dyn Reader>, Box<dyn Reader>, Box<dyn Writer>);
}

/// The contract an `ActionPlugin::run` is handed: a view onto the resolved connection/become
/// plugins for this task, plus the ability to park on a controller-only sub-request.
///
/// Defined here (rather than in `worker`, which owns the concrete implementation) so that action
/// plugin crates depend only on `plugin_registry`, never on the worker runtime itself.
#[async_trait]
pub trait TaskContext: Send + Sync {
    fn task_options(&self) -> &TaskOptions;

    /// The connection resolved for this task's `TaskOptions.plugins[connection]`, constructing
    /// and caching it on first use for this fingerprint.
    async fn connection(&self) -> Result<std::sync::Arc<dyn Connection>, CoreError>;

    fn become_plugin(&self) -> Option<std::sync::Arc<dyn Become>>;

    fn blob_store(&self) -> &blob_store::BlobStore;

    /// Emits `request` as a new top-level task, then awaits its correlated `TaskResult`. Used by
    /// an action that needs an artifact only the controller can produce (e.g. a built payload).
    async fn send_message(
        &self,
        request: message_model::BaseTask,
    ) -> Result<BTreeMap<String, Value>, CoreError>;
}

/// A named unit of work executing inside a worker and returning a result mapping.
#[async_trait]
pub trait ActionPlugin: Send + Sync {
    async fn run(
        &self,
        args: &BTreeMap<String, Value>,
        ctx: &dyn TaskContext,
    ) -> Result<BTreeMap<String, Value>, CoreError>;
}

/// Invoked by the worker when it dispatches a `ContentDescriptorRequest`. Typically uses
/// `BlobStore::get_dynamic_context` to emit content for `key` and publish it atomically.
#[async_trait]
pub trait ContentDescriptor: Send + Sync {
    async fn generate(&self, key: &str, blob_store: &blob_store::BlobStore) -> Result<(), String>;
}
