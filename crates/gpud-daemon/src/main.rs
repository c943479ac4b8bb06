//! gpud daemon
//!
//! GPU task execution and session orchestrator. Accepts typed task requests
//! over HTTP, routes them to GPUs by difficulty class, launches sibling
//! worker containers, and streams their events back to callers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use gpud_api::{create_router, AppState};
use gpud_catalog::ConfigCatalog;
use gpud_core::Settings;
use gpud_pipeline::{ActiveTasks, TaskPipeline};
use gpud_runtime::DockerCli;
use gpud_scheduler::{
    run_telemetry_loop, GpuAllocator, NvidiaSmi, SessionLimits, SessionRegistry, TimeoutReaper,
};
use gpud_store::{FileServiceFetcher, ModelCache};

/// gpud - GPU task execution and session orchestrator
#[derive(Parser, Debug)]
#[command(name = "gpud")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind the API server
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    /// Port for the API server
    #[arg(long, default_value_t = 8200)]
    port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    info!("Starting gpud v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::from_env().expect("Invalid configuration");

    let runtime = Arc::new(DockerCli::new(
        settings.docker_binary.clone(),
        settings.task_memory_limit.clone(),
        settings.task_cpu_quota,
    ));
    if let Err(err) = runtime.ping().await {
        warn!(error = %err, "docker daemon not reachable at startup");
    }

    let allocator = Arc::new(GpuAllocator::from_settings(&settings));

    let fetcher = Arc::new(FileServiceFetcher::new(
        settings.file_service_url.clone(),
        settings.file_service_internal_key.clone(),
    ));
    let cache = Arc::new(ModelCache::new(
        settings.model_cache_dir.clone(),
        settings.auto_fetch_models,
        fetcher,
    ));
    cache.init().await.expect("Failed to initialize model cache");

    let tracker = Arc::new(ActiveTasks::new());
    let registry = Arc::new(SessionRegistry::new(
        Arc::clone(&allocator),
        runtime.clone(),
        Arc::clone(&tracker),
        SessionLimits::from_settings(&settings),
    ));

    let pipeline = Arc::new(TaskPipeline::new(
        ConfigCatalog::new(
            settings.task_catalog_dir.clone(),
            settings.default_task_timeout,
            settings.max_task_timeout,
        ),
        cache,
        Arc::clone(&allocator),
        Arc::clone(&registry),
        runtime,
        Arc::clone(&tracker),
        settings.allowed_docker_images.clone(),
    ));

    // Background tasks: telemetry refresh and the session reaper.
    tokio::spawn(run_telemetry_loop(
        Arc::clone(&allocator),
        Arc::new(NvidiaSmi::new()),
        Duration::from_secs(settings.gpu_metrics_refresh_interval),
    ));
    tokio::spawn(
        TimeoutReaper::new(
            Arc::clone(&registry),
            Duration::from_secs(settings.monitor_interval),
        )
        .run(),
    );

    let router = create_router(AppState {
        pipeline,
        registry,
        allocator,
        tracker,
        api_key: settings.internal_api_key.clone(),
    });

    let addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .expect("Invalid address");

    info!("API server listening on {}", addr);
    info!(
        "Managing GPUs {:?} (catalog: {})",
        settings.gpu_device_ids,
        settings.task_catalog_dir.display()
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");
    axum::serve(listener, router).await.expect("Server error");
}
