use std::{env, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etutor::{
    bank::AssessmentBanks,
    catalog::Catalog,
    chat::{Chatbot, RemoteCompletion},
    config::Config,
    db, routes,
    state::AppState,
    store::{MemoryStore, PgStore, Store},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "etutor=info,tower_http=info,axum=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Config::from_env()?;

    let store: Arc<dyn Store> = match &cfg.database_url {
        Some(url) => Arc::new(PgStore::new(
            db::connect(url, cfg.database_max_connections).await?,
        )),
        None => {
            tracing::warn!("DATABASE_URL not set, progress is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let catalog = Arc::new(
        Catalog::load(&cfg.data_dir)
            .with_context(|| format!("loading courses from {}", cfg.data_dir.display()))?,
    );
    let banks = Arc::new(
        AssessmentBanks::load(&cfg.data_dir).context("loading assessment banks")?,
    );
    tracing::info!(
        courses = catalog.courses().len(),
        banks = banks.banks.len(),
        "content loaded"
    );

    if cfg.chat.api_key.is_none() {
        tracing::warn!("CHAT_API_KEY not set, chat questions will report an error");
    }
    let completion = RemoteCompletion::new(
        &cfg.chat.api_base,
        &cfg.chat.model,
        cfg.chat.api_key.clone(),
        cfg.chat.timeout,
    )
    .context("building chat client")?;
    let chat = Arc::new(Chatbot::new(catalog.clone(), Arc::new(completion)));

    let state = AppState::new(store, catalog, banks, chat);
    let app = routes::app(state, cfg.session_secure).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
    );

    let listener = TcpListener::bind(cfg.addr()).await?;
    tracing::info!("listening on http://{}", cfg.addr());

    axum::serve(listener, app).await?;
    Ok(())
}
