use std::time::Duration;

use anyhow::{bail, Context, Result};
use hf_hub::api::tokio::Api;
use stipple_core::{load_model, DeviceMap};
use stipple_storage::{keys::model_prefix, mirror_down};
use tokio::net::TcpListener;
use tracing::info;

use crate::{cli::ServeArgs, create_router, AppState};

/// Mirrors the model down, loads it, and serves until ctrl-c.
///
/// Any failure before the listener is bound is fatal; there is no partial
/// start.
pub async fn run(args: ServeArgs) -> Result<()> {
    let bucket = args
        .store
        .store_config()
        .build()
        .context("failed to open bucket")?;

    // --- Mirror the model directory from the bucket ---
    if args.skip_download {
        info!(dir = %args.model_dir.display(), "skipping model download");
    } else {
        let prefix = model_prefix(&args.store.model_name);
        info!(bucket = bucket.name(), %prefix, "downloading model");
        let report = mirror_down(&bucket, &prefix, &args.model_dir)
            .await
            .with_context(|| format!("failed to download model from {}/{prefix}", bucket.name()))?;
        if report.objects == 0 {
            bail!("no model files under {}/{prefix}", bucket.name());
        }
    }

    // --- Load the model once; it lives as long as the server ---
    let model = load_model(
        &args.store.model_name,
        args.sd_version,
        &args.model_dir,
        Api::new().context("failed to create hf hub API")?,
        DeviceMap::from_cpu_flag(args.cpu),
    )
    .await?;

    let state = AppState::new(model, bucket)
        .with_public_url_base(args.public_url_base)
        .with_queue_timeout(Duration::from_secs(args.queue_timeout_secs));
    let app = create_router(state);

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!("Started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
