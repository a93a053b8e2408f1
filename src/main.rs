use assessment_backend::{
    config::{get_config, init_config, StoreBackend},
    database::{
        pool::{create_pool, run_migrations},
        Store,
    },
    routes,
    services::storage_service::LocalObjectStorage,
    AppState,
};
use axum::extract::DefaultBodyLimit;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    init_config()?;
    let config = get_config()?;

    let store = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = create_pool(config).await?;
            run_migrations(&pool).await?;
            info!("Using PostgreSQL store");
            Store::postgres(pool)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on shutdown");
            Store::in_memory()
        }
    };

    let object_storage = Arc::new(LocalObjectStorage::new(
        config.uploads_dir.clone(),
        &config.public_base_url,
    ));
    let app_state = AppState::new(store, object_storage, config.jwt_secret.clone());

    info!("Serving uploads from: {}", config.uploads_dir.display());

    let app = routes::router(app_state)
        .nest_service("/uploads", ServeDir::new(&config.uploads_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(config.max_upload_bytes));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
