//! `GET /health`: storage is required for readiness; an unreachable model only
//! degrades the report, since the router still answers with its fallback.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use foodlink_agent::llm::LlmClient;
use foodlink_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    llm: Arc<dyn LlmClient>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: String) -> Self {
        Self { status: "ready", detail }
    }

    fn degraded(detail: String) -> Self {
        Self { status: "degraded", detail }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub model: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, llm: Arc<dyn LlmClient>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, llm })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let (database, model) = tokio::join!(database_check(&state.db_pool), model_check(&state.llm));

    if !model.is_ready() {
        tracing::warn!(
            event_name = "system.health.model_unreachable",
            correlation_id = "health",
            detail = %model.detail,
            "language model endpoint did not answer a ping"
        );
    }

    let status_code =
        if database.is_ready() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let payload = HealthResponse {
        status: if database.is_ready() && model.is_ready() { "ready" } else { "degraded" },
        database,
        model,
        checked_at: Utc::now().to_rfc3339(),
    };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records").fetch_one(pool).await {
        Ok(count) => HealthCheck::ready(format!("{count} records stored")),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    }
}

async fn model_check(llm: &Arc<dyn LlmClient>) -> HealthCheck {
    match llm.ping().await {
        Ok(detail) => HealthCheck::ready(detail),
        Err(error) => HealthCheck::degraded(error.to_string()),
    }
}
