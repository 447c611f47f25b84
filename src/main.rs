use dotenvy::dotenv;
use rust_compress_backend::config::CompressionConfig;
use rust_compress_backend::services::executor::Executor;
use rust_compress_backend::services::janitor::{Janitor, SweepWorker};
use rust_compress_backend::services::staging::Staging;
use rust_compress_backend::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_compress_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Rust Compress Backend...");

    let config = CompressionConfig::from_env();
    tokio::fs::create_dir_all(&config.staging_dir).await?;
    info!(
        "🗜️  Compression Config: Staging={}, Max Size={}MB, Batch={}/{} (img/doc), Tool={}",
        config.staging_dir.display(),
        config.max_file_size / 1024 / 1024,
        config.max_batch_images,
        config.max_batch_documents,
        config.ghostscript_bin
    );

    let janitor = Janitor::spawn();
    let staging = Staging::new(config.staging_dir.clone(), janitor);
    let executor = Arc::new(Executor::new(config.clone(), staging));

    let (available, version) = executor.tool_health().await;
    if available {
        info!(
            "📄 Document tool ready (version {})",
            version.as_deref().unwrap_or("unknown")
        );
    } else {
        tracing::warn!("📄 Document tool NOT available; PDF compression will fail fast");
    }

    let state = AppState {
        executor: executor.clone(),
        config: config.clone(),
    };

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Start Orphan Sweep Worker
    let sweeper = SweepWorker::new(
        config.staging_dir.clone(),
        Duration::from_secs(config.sweep_interval_secs),
        Duration::from_secs(config.retention_secs),
        shutdown_rx,
    );
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let app = create_app(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        info!(
                            "📤 Finished in {:?} with status {}",
                            latency,
                            response.status()
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(
            // A batch may legitimately carry up to a full ceiling of
            // maximum-size files; per-file limits are enforced after staging
            config.max_file_size * config.max_batch_images.max(config.max_batch_documents),
        ));

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
