//! HTTP server for foundationsd

use crate::config::Config;
use crate::db::Database;
use crate::idempotency::IdempotencyStore;
use crate::metrics::ServiceMetrics;
use crate::middleware::{self, RateLimiter, MAX_BODY_SIZE};
use crate::{admin, proxy, routes};
use anyhow::{Context, Result};
use axum::Router;
use foundations_common::llm::{backend_from_config, DisabledBackend, LlmBackend};
use foundations_common::records::AssessmentRecord;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub llm: Arc<dyn LlmBackend>,
    pub metrics: ServiceMetrics,
    pub idempotency: IdempotencyStore<AssessmentRecord>,
    pub rate_limiter: RateLimiter,
    pub admin_token: Option<String>,
    /// Variant draws; seedable so tests are deterministic
    pub rng: Mutex<StdRng>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config, db: Database, llm: Arc<dyn LlmBackend>) -> Result<Self> {
        let metrics = ServiceMetrics::new().context("Failed to register metrics")?;
        let idempotency =
            IdempotencyStore::new(config.idempotency.capacity, config.idempotency.ttl());
        let admin_token = config.admin.token();
        Ok(Self {
            config,
            db,
            llm,
            metrics,
            idempotency,
            rate_limiter: RateLimiter::default(),
            admin_token,
            rng: Mutex::new(StdRng::from_entropy()),
            start_time: Instant::now(),
        })
    }

    /// Build state from config: open the database, seed defaults and pick
    /// the LLM backend. A misconfigured LLM disables insights instead of
    /// failing startup.
    pub fn from_config(config: Config) -> Result<Self> {
        let db = Database::open(&config.database.path)
            .with_context(|| format!("Failed to open {}", config.database.path.display()))?;
        db.seed_defaults().context("Failed to seed default prompts")?;

        let llm: Arc<dyn LlmBackend> = match backend_from_config(&config.llm) {
            Ok(backend) => Arc::from(backend),
            Err(e) => {
                warn!("LLM disabled: {}", e);
                Arc::new(DisabledBackend)
            }
        };
        Self::new(config, db, llm)
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    pub fn with_rng_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn with_rate_limiter(self, rate_limiter: RateLimiter) -> Self {
        Self {
            rate_limiter,
            ..self
        }
    }
}

/// Complete application router
pub fn router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::assessment_routes())
        .merge(routes::analysis_routes())
        .merge(routes::progress_routes())
        .merge(routes::feedback_routes())
        .merge(proxy::llm_routes(state.clone()))
        .merge(admin::admin_routes(state.clone()))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::track_metrics,
        ))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
}

/// Spawn periodic cache and rate limiter cleanup
fn spawn_housekeeping(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let pruned = state.idempotency.prune_expired().await;
            if pruned > 0 {
                info!("Pruned {} expired idempotency keys", pruned);
            }
            state.rate_limiter.cleanup().await;
        }
    });
}

/// Run the HTTP server until ctrl-c
pub async fn run(state: AppState) -> Result<()> {
    let state = Arc::new(state);
    let addr = state.config.server.bind.clone();
    spawn_housekeeping(state.clone());

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down gracefully");
            }
        })
        .await?;
    Ok(())
}
