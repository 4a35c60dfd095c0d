use anyhow::{Context, Result};
use facesort_core::OnnxAnalyzer;
use facesort_registry::Registry;
use tracing_subscriber::EnvFilter;

mod categorizer;
mod config;
mod engine;
mod organizer;
mod placement;
mod web;

#[cfg(test)]
mod testutil;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facesortd starting");

    let config = config::Config::load().context("failed to load configuration")?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        model_dir = %config.model_dir.display(),
        threshold = config.similarity_threshold,
        "configuration loaded"
    );

    for dir in [config.registered_dir(), config.categorized_dir()] {
        std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let registry = Registry::open(&config.db_path(), &config.registered_dir())
        .context("failed to open registry")?;
    tracing::info!(persons = registry.count()?, "registry ready");

    let analyzer = OnnxAnalyzer::load(&config.model_dir, config.detector_options())
        .context("failed to load face models")?;

    let engine = engine::spawn_engine(
        Box::new(analyzer),
        engine::EngineSettings {
            output_dir: config.categorized_dir(),
            similarity_threshold: config.similarity_threshold,
            max_faces_per_photo: config.max_faces_per_photo,
        },
    )?;

    let organizer = organizer::Organizer::new(engine, registry, &config);
    let app = web::router(organizer, config.max_upload_bytes());

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "facesortd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facesortd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
