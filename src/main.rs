//! Keyed Executor load driver
//!
//! Starts a worker service, pushes a synthetic keyed workload through it and
//! reports how the keys spread across workers.

use clap::{Arg, ArgAction, Command};
use keyed_executor::{
    MetricConfig, PrometheusMetricService, Result, SelectorKind, TaskFuture, WorkerService, WorkerServiceConfig,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{info, warn};

// Configure global allocator for maximum performance
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("keyed-executor")
        .version(keyed_executor::VERSION)
        .about("Keyed task execution on a fixed pool of worker threads.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_name("N")
                .help("Number of worker threads")
        )
        .arg(
            Arg::new("replicas")
                .long("replicas")
                .value_name("N")
                .help("Virtual nodes per worker")
        )
        .arg(
            Arg::new("buffer-size")
                .long("buffer-size")
                .value_name("N")
                .help("Ring capacity per worker (power of two)")
        )
        .arg(
            Arg::new("selector")
                .long("selector")
                .value_name("KIND")
                .help("Node selector (hash_ring, modulo, round_robin_single_producer, round_robin_multi_producer)")
        )
        .arg(
            Arg::new("tasks")
                .long("tasks")
                .value_name("N")
                .default_value("100000")
                .help("Number of tasks to submit")
        )
        .arg(
            Arg::new("keys")
                .long("keys")
                .value_name("N")
                .default_value("1000")
                .help("Number of distinct routing keys")
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Print Prometheus metrics when done")
        )
        .get_matches();

    keyed_executor::init()?;

    // Load configuration
    let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
        WorkerServiceConfig::from_file(config_path)?
    } else {
        WorkerServiceConfig::load()?
    };

    // Apply CLI overrides
    apply_cli_overrides(&mut config, &matches)?;
    config.validate()?;

    let tasks: usize = parse_arg(&matches, "tasks")?.unwrap_or(100_000);
    let keys: usize = parse_arg(&matches, "keys")?.unwrap_or(1000).max(1);
    let with_metrics = matches.get_flag("metrics");

    info!("Starting {} v{}", keyed_executor::NAME, keyed_executor::VERSION);

    let mut builder = WorkerService::builder(config);
    if with_metrics {
        builder = builder.metrics(Arc::new(PrometheusMetricService::new(MetricConfig::default())?));
    }
    let service = Arc::new(builder.build()?);

    tokio::select! {
        outcome = run_workload(Arc::clone(&service), tasks, keys) => {
            match outcome {
                Ok(summary) => print_summary(&service, &summary),
                Err(e) => warn!("Workload failed: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            warn!("Received Ctrl+C, initiating shutdown...");
        }
    }

    let shutdown = Arc::clone(&service);
    if let Err(e) = tokio::task::spawn_blocking(move || shutdown.shutdown()).await {
        warn!("Shutdown task failed: {}", e);
    }

    if with_metrics {
        println!("{}", keyed_executor::system::metrics::collect_metrics());
    }

    info!("Shutdown complete");
    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut WorkerServiceConfig, matches: &clap::ArgMatches) -> Result<()> {
    if let Some(workers) = parse_arg(matches, "workers")? {
        config.worker_count = workers;
    }

    if let Some(replicas) = parse_arg(matches, "replicas")? {
        config.replica_count = replicas;
    }

    if let Some(buffer_size) = parse_arg::<usize>(matches, "buffer-size")? {
        config.buffer_size = buffer_size;
        config.batch_size_limit = config.batch_size_limit.min(buffer_size).max(1);
    }

    if let Some(selector) = parse_arg::<SelectorKind>(matches, "selector")? {
        config.selector = selector;
    }

    Ok(())
}

fn parse_arg<T>(matches: &clap::ArgMatches, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    matches
        .get_one::<String>(name)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| {
                keyed_executor::Error::from(keyed_executor::ConfigError::Parse {
                    field: name.to_string(),
                    message: e.to_string(),
                })
            })
        })
        .transpose()
}

/// Outcome counts of one workload run
#[derive(Default)]
struct Summary {
    per_worker: BTreeMap<String, usize>,
    failed: usize,
    elapsed_ms: u128,
}

/// Submit `tasks` tasks over `keys` keys, then await every future
async fn run_workload(service: Arc<WorkerService>, tasks: usize, keys: usize) -> Result<Summary> {
    let start = Instant::now();

    // Submission may wait for ring capacity, keep it off the async workers
    let submitter = Arc::clone(&service);
    let futures: Vec<TaskFuture<String>> = tokio::task::spawn_blocking(move || {
        (0..tasks)
            .map(|i| {
                let seed = (i % keys) as u64;
                let key = format!("key-{}", seed);
                submitter.execute_named(key.as_str(), "synthetic", move || {
                    let mut acc = seed;
                    for round in 0..256u64 {
                        acc = acc.rotate_left(5) ^ round.wrapping_mul(0x9e37_79b9_7f4a_7c15);
                    }
                    std::hint::black_box(acc);
                    Ok(std::thread::current().name().unwrap_or("unnamed").to_string())
                })
            })
            .collect::<Result<Vec<_>>>()
    })
    .await??;

    let mut summary = Summary::default();
    for future in futures {
        match future.await {
            Ok(worker) => *summary.per_worker.entry(worker).or_default() += 1,
            Err(_) => summary.failed += 1,
        }
    }
    summary.elapsed_ms = start.elapsed().as_millis();
    Ok(summary)
}

fn print_summary(service: &WorkerService, summary: &Summary) {
    let total: usize = summary.per_worker.values().sum::<usize>() + summary.failed;
    println!(
        "{} tasks on {} workers ({} virtual nodes, {:?}) in {} ms, {} failed",
        total,
        service.worker_count(),
        service.virtual_node_count(),
        service.config().selector,
        summary.elapsed_ms,
        summary.failed
    );
    for (worker, count) in &summary.per_worker {
        let share = *count as f64 * 100.0 / total.max(1) as f64;
        println!("  {:<32} {:>10} {:>6.2}%", worker, count, share);
    }
}
