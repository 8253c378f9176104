use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use message_model::{CoreError, PluginKind, Value};

use crate::registry::ActionDescriptor;
use crate::traits::{ActionPlugin, TaskContext};

/// Runs a literal shell command through the task's connection. The reference action plugin.
pub struct RawAction;

#[async_trait]
impl ActionPlugin for RawAction {
    async fn run(
        &self,
        args: &BTreeMap<String, Value>,
        ctx: &dyn TaskContext,
    ) -> Result<BTreeMap<String, Value>, CoreError> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::ValidationError("raw action requires a command arg".to_string()))?;

        let connection = ctx.connection().await?;
        let (stdout, stderr, rc) = connection.exec_command(command, None).await?;

        let mut result = BTreeMap::new();
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
        Ok(result)
    }
}

pub(crate) fn descriptor() -> ActionDescriptor {
    ActionDescriptor {
        short_name: "raw",
        fq_name: "builtin.action.raw",
        uses: &[PluginKind::Connection],
        options: &[],
        construct: || Arc::new(RawAction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::LocalConnection;
    use crate::traits::{Become, Connection};
    use blob_store::BlobStore;
    use message_model::{BaseTask, TaskOptions};

    struct FakeContext {
        options: TaskOptions,
        store: BlobStore,
    }

    #[async_trait]
    impl TaskContext for FakeContext {
        fn task_options(&self) -> &TaskOptions {
            &self.options
        }

        async fn connection(&self) -> Result<Arc<dyn Connection>, CoreError> {
            Ok(Arc::new(LocalConnection::new("sh")))
        }

        fn become_plugin(&self) -> Option<Arc<dyn Become>> {
            None
        }

        fn blob_store(&self) -> &BlobStore {
            &self.store
        }

        async fn send_message(&self, _request: BaseTask) -> Result<BTreeMap<String, Value>, CoreError> {
            unimplemented!("raw action never sends sub-requests")
        }
    }

    #[tokio::test]
    async fn runs_command_through_connection() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = FakeContext {
            options: TaskOptions::new(),
            store: BlobStore::new(dir.path()).await.unwrap(),
        };
        let mut args = BTreeMap::new();
        args.insert("command".to_string(), Value::from("echo hi"));

        let result = RawAction.run(&args, &ctx).await.unwrap();
        assert_eq!(result["stdout"], Value::from("hi\n"));
        assert_eq!(result["failed"], Value::Bool(false));
    }

    #[tokio::test]
    async fn missing_command_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = FakeContext {
            options: TaskOptions::new(),
            store: BlobStore::new(dir.path()).await.unwrap(),
        };
        let err = RawAction.run(&BTreeMap::new(), &ctx).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }
}
