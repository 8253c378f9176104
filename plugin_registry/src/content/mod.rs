use std::sync::Arc;

use async_trait::async_trait;
use blob_store::BlobStore;
use bytes::Bytes;
use resource_protocol::Writer;

use crate::registry::ContentDescriptorEntry;
use crate::traits::ContentDescriptor;

/// Generates a small static payload for `key`. Stands in for the embedded payload scripts the
/// original builds dynamically (out of scope); exercises the BlobStore single-flight path end to
/// end without needing a real build toolchain.
pub struct StaticPayload;

#[async_trait]
impl ContentDescriptor for StaticPayload {
    async fn generate(&self, key: &str, blob_store: &BlobStore) -> Result<(), String> {
        let mut scope = blob_store
            .get_dynamic_context(key)
            .await
            .map_err(|err| err.to_string())?;
        match scope
            .writer()
            .write(Bytes::from(format!("payload:{key}\n")))
            .await
        {
            Ok(()) => scope.finish().await,
            Err(err) => scope.fail(err).await,
        }
    }
}

pub(crate) fn builtin_content_descriptors() -> Vec<ContentDescriptorEntry> {
    vec![ContentDescriptorEntry {
        name: "static_payload",
        construct: || Arc::new(StaticPayload),
    }]
}
