use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod clock;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod services;
mod store;

use clock::SystemClock;
use config::{Config, StoreBackend};
use services::catalog::QuestCatalog;
use services::Engine;
use store::{DynStore, MemoryStore, PgStore};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub store: DynStore,
    pub catalog: Arc<QuestCatalog>,
    pub config: Arc<Config>,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let quest_routes = Router::new()
        .route("/", get(routes::quests::list_quests))
        .route("/catalog", get(routes::quests::catalog))
        .route("/activity", post(routes::quests::record_activity))
        .route("/:id/claim", post(routes::quests::claim))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    let economy_routes = Router::new()
        .route("/wallet", get(routes::economy::get_wallet))
        .route("/transactions", get(routes::economy::get_transactions))
        .route(
            "/transactions/:id",
            get(routes::economy::get_transaction)
                .put(routes::economy::amend_transaction)
                .delete(routes::economy::delete_transaction),
        )
        .route("/spend", post(routes::economy::spend))
        .route("/reconcile", get(routes::economy::reconcile))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    let admin_routes = Router::new()
        .route("/wallets/:userId/grant", post(routes::admin::grant_coins))
        .layer(axum_mw::from_fn(middleware::admin::require_admin))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    let api = Router::new()
        .nest("/quests", quest_routes)
        .nest("/economy", economy_routes)
        .nest("/admin", admin_routes);

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(routes::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

async fn open_store(config: &Config) -> error::AppResult<DynStore> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let pool = db::create_pool(config).await?;
            db::migrate(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    let store = open_store(&config).await?;
    let catalog = Arc::new(QuestCatalog::standard());
    let engine = Engine::new(
        store.clone(),
        catalog.clone(),
        Arc::new(SystemClock),
        &config.quests,
    );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, backend = ?config.store_backend, "Pet quests API initialized");

    let state = AppState {
        engine,
        store,
        catalog,
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
