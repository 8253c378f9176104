//! Process entry point. A single documented subcommand (run the inventory's hosts through the
//! `raw` reference action) plus a hidden `--worker-subprocess` re-entry point used to spawn
//! worker processes. See `SPEC_FULL.md` §6 for the external interface this implements.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use blob_store::BlobStore;
use clap::Parser;
use log::LevelFilter;
use message_model::{BaseTask, CoreError, Value};
use task_executor::Executor;
use task_manager::{SubprocessPoolSpawnerFactory, TaskManager, TaskManagerConfig};
use uuid::Uuid;

/// Single positional argument (the inventory file path), plus pool-sizing knobs and a hidden
/// worker re-entry point. Unrecognized flags are rejected by `clap` itself.
#[derive(Parser)]
#[command(name = "taskctl", about = "Dispatches a reference action against every inventory host")]
struct Cli {
    /// Path to an INI-like inventory file (one `[host]` section per host).
    inventory: Option<PathBuf>,

    /// Override the process-private temp root BlobStore and logs are written under. Defaults to
    /// a fresh directory under the OS temp dir.
    #[arg(long)]
    temp_root: Option<PathBuf>,

    /// Upper bound on concurrently live workers in the `content` (dynamic payload generation)
    /// pool.
    #[arg(long, default_value_t = TaskManagerConfig::default().content_max_workers)]
    content_max_workers: usize,

    /// Upper bound on concurrently live workers per `connection-<plugin>` pool.
    #[arg(long, default_value_t = TaskManagerConfig::default().connection_max_workers)]
    connection_max_workers: usize,

    /// How often the controller sweeps the BlobStore for stale (orphaned-producer) rendezvous
    /// locks.
    #[arg(long, default_value_t = 30)]
    stale_lock_sweep_interval_secs: u64,

    /// Hidden worker-process entry point: re-invokes this same binary as a worker serving
    /// `WORKLOAD_CLASS`, reading/writing framed `BaseTask`s over stdin/stdout. Not part of the
    /// documented user-facing surface.
    #[arg(long = "worker-subprocess", hide = true, num_args = 2, value_names = ["WORKLOAD_CLASS", "BLOB_STORE_ROOT"])]
    worker_subprocess: Option<Vec<String>>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.worker_subprocess {
        Some(args) => {
            let [workload_class, blob_store_root] = <[String; 2]>::try_from(args)
                .expect("clap guarantees exactly two values for --worker-subprocess");
            run_worker_subprocess(workload_class, PathBuf::from(blob_store_root)).await
        }
        None => match cli.inventory {
            Some(inventory_path) => {
                run_controller(
                    inventory_path,
                    cli.temp_root,
                    TaskManagerConfig {
                        content_max_workers: cli.content_max_workers,
                        connection_max_workers: cli.connection_max_workers,
                    },
                    Duration::from_secs(cli.stale_lock_sweep_interval_secs),
                )
                .await
            }
            None => Err(CoreError::ValidationError(
                "an inventory file path is required".to_string(),
            )),
        },
    };

    if let Err(err) = result {
        eprintln!("fatal: {err}");
        std::process::exit(1);
    }
}

async fn run_worker_subprocess(workload_class: String, blob_store_root: PathBuf) -> Result<(), CoreError> {
    let id = worker::generate_worker_id();

    let log_root = blob_store_root.parent().unwrap_or(&blob_store_root);
    if let Err(err) = logging::init(
        &log_root.join("debug.log"),
        format!("worker:{workload_class}:{id}"),
        LevelFilter::Info,
    ) {
        eprintln!("worker {id} failed to initialize logging: {err}");
    }

    let blob_store = BlobStore::new(&blob_store_root)
        .await
        .map_err(CoreError::Fatal)?;

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    worker::run_worker_loop(id, stdin, stdout, blob_store).await;
    Ok(())
}

/// Runs every inventory host's `raw` action to completion and prints its result, then shuts the
/// controller down. The action to run and its command aren't part of the documented CLI surface
/// (out of scope per SPEC_FULL.md §1); this reference driver runs `raw` with each host's
/// `command` variable (defaulting to `echo hi`, matching the echo-action testable scenario).
async fn run_controller(
    inventory_path: PathBuf,
    temp_root_override: Option<PathBuf>,
    pool_config: TaskManagerConfig,
    stale_lock_sweep_interval: Duration,
) -> Result<(), CoreError> {
    let temp_dir = match &temp_root_override {
        Some(path) => {
            std::fs::create_dir_all(path)
                .map_err(|err| CoreError::Fatal(format!("creating temp root {path:?}: {err}")))?;
            None
        }
        None => Some(
            tempfile::tempdir()
                .map_err(|err| CoreError::Fatal(format!("creating temp root: {err}")))?,
        ),
    };
    let temp_root: PathBuf = match (&temp_dir, &temp_root_override) {
        (Some(dir), _) => dir.path().to_path_buf(),
        (None, Some(path)) => path.clone(),
        (None, None) => unreachable!("either temp_dir or temp_root_override is always set"),
    };

    if let Err(err) = logging::init(&temp_root.join("debug.log"), "controller", LevelFilter::Info) {
        eprintln!("controller failed to initialize logging: {err}");
    }

    let blob_store_root = temp_root.join("blobstore");
    let blob_store = BlobStore::new(&blob_store_root)
        .await
        .map_err(CoreError::Fatal)?;

    let inventory = inventory::parse_file(&inventory_path)
        .map_err(|err| CoreError::ValidationError(format!("reading inventory: {err}")))?;

    let binary = std::env::current_exe()
        .map_err(|err| CoreError::Fatal(format!("resolving own executable path: {err}")))?;
    let spawner_factory = Arc::new(SubprocessPoolSpawnerFactory::new(binary, blob_store_root));
    let executor = Executor::new();
    let manager = TaskManager::with_config(executor.clone(), spawner_factory, pool_config);

    let sweep_store = blob_store.clone();
    let sweep_task = executor.native_spawn(async move {
        let mut interval = tokio::time::interval(stale_lock_sweep_interval);
        loop {
            interval.tick().await;
            if let Err(err) = sweep_store.sweep_stale_locks(stale_lock_sweep_interval).await {
                log::warn!("stale blob store lock sweep failed: {err}");
            }
        }
    });

    let mut pending_hosts: BTreeMap<Uuid, String> = BTreeMap::new();
    for (host, host_vars) in &inventory {
        let command = host_vars
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("echo hi")
            .to_string();

        let options = plugin_registry::build_task_options(host_vars, "raw")?;

        let id = Uuid::new_v4();
        let mut action_args = BTreeMap::new();
        action_args.insert("command".to_string(), Value::from(command));

        manager.queue(
            BaseTask::ActionRequest {
                id,
                options,
                action: "raw".to_string(),
                action_args,
            },
            true,
        )?;
        pending_hosts.insert(id, host.clone());
    }

    let mut had_failure = false;
    while !pending_hosts.is_empty() {
        let Some(task) = manager.get().await else {
            log::warn!("result channel closed with {} hosts still pending", pending_hosts.len());
            break;
        };
        let id = task.task_id();
        let Some(host) = pending_hosts.remove(&id) else {
            continue;
        };

        match task {
            BaseTask::TaskResult { result, .. } => {
                let failed = result.get("failed").and_then(Value::as_bool).unwrap_or(false);
                had_failure |= failed;
                println!("{host}: {result:?}");
            }
            BaseTask::TaskFailedResult { message, .. } => {
                had_failure = true;
                eprintln!("{host}: failed: {message}");
            }
            other => {
                log::warn!("host {host} received an unexpected terminal variant: {other:?}");
            }
        }
        manager.finish(id);
    }

    sweep_task.abort();
    manager.shutdown().await;
    executor.shutdown(Duration::from_secs(5));

    if had_failure {
        return Err(CoreError::TaskFailure(
            "one or more hosts failed their action".to_string(),
        ));
    }
    Ok(())
}
