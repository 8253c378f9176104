//! A pool of isolated worker processes servicing one workload class: spawns workers on demand up
//! to a capacity bound, routes tasks to them, and relays their results (and their spontaneous
//! sub-requests) to whoever is consuming the pool.

mod pool;
mod spawn;

pub use pool::{PoolConfig, WorkerPool};
pub use spawn::{SpawnedWorker, SubprocessSpawner, WorkerSpawner};
