use std::sync::Arc;
use tokio::net::TcpListener;
use web_image_captioner::{
    config::Config,
    api::routes::create_router,
    model::BlipCaptioner,
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load configuration
    let config = Config::load()?;
    let server_addr = config.server_addr;

    // The model is loaded once and shared by every request
    tracing::info!(model = %config.model_id, revision = %config.model_revision, "loading captioning model");
    let source = config.model_source();
    let model = tokio::task::spawn_blocking(move || BlipCaptioner::load(&source)).await??;
    tracing::info!("captioning model ready");

    let app_state = AppState::new(config, Arc::new(model));
    let app = create_router(app_state);

    let listener = TcpListener::bind(server_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
