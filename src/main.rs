use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use survey_embed::cache::MokaApiCache;
use survey_embed::completion::BlockServices;
use survey_embed::config::Config;
use survey_embed::db::Database;
use survey_embed::db_storage::{
    BlockStorage, PgHostPlatform, PgLearnerStateStore, PgSubmissionStore,
};
use survey_embed::handlers::{self, AppState};
use survey_embed::surveymonkey_client::SurveyMonkeyConnector;

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the database pool, the SurveyMonkey
/// response cache and connector, then serves the block handlers.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "survey_embed=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Token and metadata cache, TTL chosen per entry by each block's settings
    let api_cache = Arc::new(MokaApiCache::default());
    tracing::info!("SurveyMonkey API cache initialized");

    let connector = SurveyMonkeyConnector::new(config.surveymonkey_base_url.clone(), api_cache)?;
    tracing::info!(
        "✓ SurveyMonkey connector initialized: {}",
        config.surveymonkey_base_url
    );

    let services = BlockServices {
        connector,
        submissions: Arc::new(PgSubmissionStore::new(db.pool.clone())),
        learner_states: Arc::new(PgLearnerStateStore::new(db.pool.clone())),
        host: Arc::new(PgHostPlatform::new(db.pool.clone())),
        lms_root_url: config.lms_root_url.clone(),
    };

    let app_state = Arc::new(AppState {
        db: db.pool.clone(),
        services,
        blocks: Arc::new(BlockStorage::new(db.pool.clone())),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let block_routes = Router::new()
        .route(
            "/courses/:course_id/xblock/:usage_key/handler/completion",
            get(handlers::completion),
        )
        .route(
            "/courses/:course_id/xblock/:usage_key/handler/confirmation",
            get(handlers::confirmation),
        )
        .route(
            "/courses/:course_id/xblock/:usage_key/handler/verify_completion",
            get(handlers::verify_completion),
        )
        .route(
            "/courses/:course_id/xblock/:usage_key/student_view",
            get(handlers::student_view),
        )
        .route(
            "/courses/:course_id/xblock/:usage_key/settings",
            get(handlers::get_settings).put(handlers::put_settings),
        )
        .layer(
            ServiceBuilder::new()
                // Settings payloads are small
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(block_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
