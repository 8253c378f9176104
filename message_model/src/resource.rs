use serde::{Deserialize, Serialize};

/// Something a worker needs materialized before it can run a task: either a blob already
/// resolved by the controller, or a path on the worker's own filesystem.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Resource {
    Blob { key: String },
    Filesystem { path: String },
}

impl Resource {
    pub fn blob(key: impl Into<String>) -> Resource {
        Resource::Blob { key: key.into() }
    }

    pub fn filesystem(path: impl Into<String>) -> Resource {
        Resource::Filesystem { path: path.into() }
    }

    pub fn as_blob_key(&self) -> Option<&str> {
        match self {
            Resource::Blob { key } => Some(key),
            Resource::Filesystem { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_key_accessor() {
        let r = Resource::blob("deadbeef");
        assert_eq!(r.as_blob_key(), Some("deadbeef"));
        assert_eq!(Resource::filesystem("/tmp/x").as_blob_key(), None);
    }
}
