use std::path::PathBuf;
use std::sync::Arc;

use worker_pool::{SubprocessSpawner, WorkerSpawner};

/// Turns a workload class into a `WorkerSpawner` for it. Indirected behind a trait (rather than
/// `TaskManager` constructing `SubprocessSpawner` directly) so tests can substitute an
/// in-process fake without needing a real worker binary.
pub trait PoolSpawnerFactory: Send + Sync {
    fn spawner_for(&self, workload_class: &str) -> Arc<dyn WorkerSpawner>;
}

/// Production factory: every pool's workers are separate processes, spawned by re-executing
/// this same controller binary with the hidden `--worker-subprocess <workload-class>` flag.
pub struct SubprocessPoolSpawnerFactory {
    binary: PathBuf,
    blob_store_root: PathBuf,
}

impl SubprocessPoolSpawnerFactory {
    pub fn new(binary: PathBuf, blob_store_root: PathBuf) -> SubprocessPoolSpawnerFactory {
        SubprocessPoolSpawnerFactory {
            binary,
            blob_store_root,
        }
    }
}

impl PoolSpawnerFactory for SubprocessPoolSpawnerFactory {
    fn spawner_for(&self, workload_class: &str) -> Arc<dyn WorkerSpawner> {
        Arc::new(SubprocessSpawner::new(
            self.binary.clone(),
            workload_class.to_string(),
            self.blob_store_root.clone(),
        ))
    }
}
