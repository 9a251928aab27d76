//! Floodgate server entry point.
//!
//! Bootstraps the store backends, the external-service adapters, the upload
//! engine, and the distributed scheduler, then starts the Axum HTTP server
//! with graceful shutdown. On shutdown the runner cancels active task runs,
//! waits out the grace period, and releases every held lease.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tracing::info;

use floodgate_core::lock::{LockConfig, LockService};
use floodgate_core::object_store::{MemoryObjectStore, ObjectStore};
use floodgate_core::scan::HttpScanService;
use floodgate_core::upload_engine::{UploadEngine, UploadEngineConfig};
use floodgate_core::validation::ValidationRules;
use floodgate_store::{
    LockStore, MemoryLockStore, MemoryProjectFileSink, MemoryUploadStore, ProjectFileSink,
    UploadStore,
};

use floodgate_server::config::{ServerConfig, StoreBackendType};
use floodgate_server::plugin::start_scheduler;
use floodgate_server::routes;
use floodgate_server::state::AppState;

use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(store = ?config.store_backend, "Floodgate starting");

    let (state, runner_handle) = build_app_state(&config).await?;

    let app = build_router(Arc::clone(&state), config.enable_callback);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "Floodgate server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // HTTP traffic has drained; stop the scheduler and release leases.
    runner_handle.shutdown(config.shutdown_grace).await;

    info!("Floodgate server stopped");
    Ok(())
}

/// Assemble the stores, adapters, engine, and scheduler.
async fn build_app_state(
    config: &ServerConfig,
) -> anyhow::Result<(Arc<AppState>, floodgate_core::runner::RunnerHandle)> {
    let (lock_store, upload_store, project_sink, object_store): (
        Arc<dyn LockStore>,
        Arc<dyn UploadStore>,
        Arc<dyn ProjectFileSink>,
        Arc<dyn ObjectStore>,
    ) = match &config.store_backend {
        StoreBackendType::Memory => {
            info!("using in-memory stores (single replica, data will not persist)");
            (
                Arc::new(MemoryLockStore::new()),
                Arc::new(MemoryUploadStore::new()),
                Arc::new(MemoryProjectFileSink::new()),
                Arc::new(MemoryObjectStore::new()),
            )
        }
        #[cfg(feature = "postgres-backend")]
        StoreBackendType::Postgres { url } => {
            info!("using PostgreSQL stores");
            let pool = floodgate_store::connect_pool(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            let lock_store = floodgate_store::PgLockStore::connect(pool.clone())
                .await
                .context("failed to prepare scheduler_locks")?;
            let upload_store = floodgate_store::PgUploadStore::connect(pool.clone())
                .await
                .context("failed to prepare file_uploads")?;
            let project_sink = floodgate_store::PgProjectFileSink::connect(pool)
                .await
                .context("failed to prepare project_files")?;
            let object_store = floodgate_core::object_store::S3ObjectStore::connect(
                &config.storage_region,
                config.storage_endpoint.as_deref(),
            )
            .await;
            (
                Arc::new(lock_store),
                Arc::new(upload_store),
                Arc::new(project_sink),
                Arc::new(object_store),
            )
        }
        #[cfg(not(feature = "postgres-backend"))]
        StoreBackendType::Postgres { .. } => {
            anyhow::bail!(
                "PostgreSQL backend requested but feature 'postgres-backend' is not enabled"
            );
        }
    };

    let scanner = Arc::new(
        HttpScanService::new(&config.scan_service_url, config.scan_service_timeout)
            .context("failed to build scan service client")?,
    );

    let upload_engine = Arc::new(UploadEngine::new(
        upload_store,
        scanner,
        object_store,
        project_sink,
        UploadEngineConfig {
            storage_bucket: config.storage_bucket.clone(),
            storage_path_prefix: config.storage_path_prefix.clone(),
            download_url_ttl: config.download_url_ttl,
            callback_url: config.callback_url(),
            rules: ValidationRules {
                max_file_size: config.max_file_size,
                allowed_mime_types: config.allowed_mime_types.clone(),
                allowed_archive_extensions: config.allowed_archive_extensions.clone(),
            },
        },
    ));

    let lock_config = LockConfig::new(config.lock_timeout, config.lock_refresh_interval)
        .context("invalid lock configuration")?;
    let lock_service = Arc::new(LockService::new(Arc::clone(&lock_store), lock_config));
    info!(owner_id = %lock_service.owner_id(), "lock service ready");

    let (runner_handle, task_names) = start_scheduler(
        config,
        Arc::clone(&upload_engine),
        Arc::clone(&lock_service),
        Arc::clone(&lock_store),
    )?;

    let state = Arc::new(AppState {
        upload_engine,
        lock_service,
        lock_store,
        task_names,
        config: config.clone(),
    });

    Ok((state, runner_handle))
}

/// Build the Axum router with all routes and middleware.
fn build_router(state: Arc<AppState>, enable_callback: bool) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    // Concurrency-limit the upload routes (they fan out to the scan service).
    let upload_routes = Router::new()
        .nest(
            "/file-uploads",
            routes::file_uploads::router(enable_callback),
        )
        .layer(tower::limit::ConcurrencyLimitLayer::new(64));

    Router::new()
        .merge(upload_routes)
        .nest("/scheduler", routes::scheduler::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
