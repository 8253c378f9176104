use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use message_model::{BaseTask, CoreError, PluginKind, TaskOptions, Value};
use resource_protocol::Reader;
use uuid::Uuid;

use crate::registry::ActionDescriptor;
use crate::traits::{ActionPlugin, TaskContext};

/// Asks the controller to build a `static_payload` blob by key, via a `ContentDescriptorRequest`
/// sub-request, then reads the published blob back out of the shared `BlobStore`. The reference
/// action exercising the sub-request-relay path end to end: the worker running this action parks
/// on `send_message` while the request travels up to the `content` pool and back.
pub struct FetchPayloadAction;

#[async_trait]
impl ActionPlugin for FetchPayloadAction {
    async fn run(
        &self,
        args: &BTreeMap<String, Value>,
        ctx: &dyn TaskContext,
    ) -> Result<BTreeMap<String, Value>, CoreError> {
        let key = args.get("key").and_then(Value::as_str).ok_or_else(|| {
            CoreError::ValidationError("fetch_payload action requires a key arg".to_string())
        })?;

        let request = BaseTask::ContentDescriptorRequest {
            id: Uuid::new_v4(),
            options: TaskOptions::new(),
            plugin: "static_payload".to_string(),
            key: key.to_string(),
        };
        ctx.send_message(request).await?;

        let mut reader = ctx
            .blob_store()
            .get(key)
            .await
            .map_err(|err| CoreError::TransportError(err.to_string()))?;
        let mut content = Vec::new();
        loop {
            let chunk = reader.read(64 * 1024).await.map_err(CoreError::TransportError)?;
            if chunk.is_empty() {
                break;
            }
            content.extend_from_slice(&chunk);
        }

        let mut result = BTreeMap::new();
        result.insert("failed".to_string(), Value::Bool(false));
        result.insert(
            "content".to_string(),
            Value::String(String::from_utf8_lossy(&content).into_owned()),
        );
        Ok(result)
    }
}

pub(crate) fn descriptor() -> ActionDescriptor {
    ActionDescriptor {
        short_name: "fetch_payload",
        fq_name: "builtin.action.fetch_payload",
        // This action does no I/O through a transport, but every `ActionRequest` still needs a
        // connection plugin resolved: it's what `TaskManager::pool_config_for` uses to pick the
        // worker pool that will run it.
        uses: &[PluginKind::Connection],
        options: &[],
        construct: || Arc::new(FetchPayloadAction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::LocalConnection;
    use crate::traits::{Become, Connection};
    use blob_store::BlobStore;

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

        async fn send_message(&self, request: BaseTask) -> Result<BTreeMap<String, Value>, CoreError> {
            // Stand in for the controller round trip: service the ContentDescriptorRequest
            // immediately out of the plugin registry, the same code a worker in the `content`
            // pool would run.
            match request {
                BaseTask::ContentDescriptorRequest { plugin, key, .. } => {
                    crate::registry::run_content_descriptor(&plugin, &key, &self.store)
                        .await
                        .map_err(CoreError::GenerationFailure)?;
                    Ok(BTreeMap::new())
                }
                other => panic!("unexpected sub-request: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn fetches_generated_payload_via_sub_request() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = FakeContext {
            options: TaskOptions::new(),
            store: BlobStore::new(dir.path()).await.unwrap(),
        };
        let mut args = BTreeMap::new();
        args.insert("key".to_string(), Value::from("greeting"));

        let result = FetchPayloadAction.run(&args, &ctx).await.unwrap();
        assert_eq!(result["content"], Value::from("payload:greeting\n"));
        assert_eq!(result["failed"], Value::Bool(false));
    }
}
