use std::sync::Arc;
use std::time::Duration;

use foodlink_agent::conversation::ConversationStore;
use foodlink_agent::extraction::{DonationExtractor, ExtractionError};
use foodlink_agent::llm::{LlmClient, LlmError, TimeoutLlmClient};
use foodlink_agent::openai::OpenAiCompatibleClient;
use foodlink_agent::runtime::{AgentRuntime, RuntimeSettings};
use foodlink_agent::tools::ToolRegistry;
use foodlink_core::config::AppConfig;
use foodlink_core::records::RecordStore;
use foodlink_db::{
    connect_from_config, migrations, DbPool, DemoSeedDataset, RepositoryError, SqlRecordStore,
};
use thiserror::Error;
use tracing::info;

use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub llm: Arc<dyn LlmClient>,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("demo seed failed: {0}")]
    Seed(#[source] RepositoryError),
    #[error("language model client could not be built: {0}")]
    LlmClient(#[source] LlmError),
    #[error("donation extractor could not be built: {0}")]
    Extractor(#[source] ExtractionError),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BootstrapOptions {
    pub seed_demo_data: bool,
}

pub async fn bootstrap_with_config(
    config: AppConfig,
    options: BootstrapOptions,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let client = OpenAiCompatibleClient::from_config(&config).map_err(BootstrapError::LlmClient)?;
    let llm: Arc<dyn LlmClient> = Arc::new(TimeoutLlmClient::new(
        Arc::new(client),
        Duration::from_secs(config.llm.timeout_secs),
    ));

    bootstrap_with_llm(config, options, llm).await
}

/// Connects storage and wires the agent around an already-built model client.
pub async fn bootstrap_with_llm(
    config: AppConfig,
    options: BootstrapOptions,
    llm: Arc<dyn LlmClient>,
) -> Result<Application, BootstrapError> {
    let db_pool = connect_from_config(&config.database)
        .await
        .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    if options.seed_demo_data {
        let seeded = DemoSeedDataset::load(&db_pool).await.map_err(BootstrapError::Seed)?;
        info!(
            event_name = "system.bootstrap.seeded",
            correlation_id = "bootstrap",
            records_seeded = seeded.records_seeded.len(),
            "demo records loaded"
        );
    }

    let store: Arc<dyn RecordStore> = Arc::new(SqlRecordStore::new(db_pool.clone()));
    let state = assemble(&config, store, llm.clone()).map_err(BootstrapError::Extractor)?;

    Ok(Application { config, db_pool, llm, state })
}

pub fn assemble(
    config: &AppConfig,
    store: Arc<dyn RecordStore>,
    llm: Arc<dyn LlmClient>,
) -> Result<AppState, ExtractionError> {
    let tools =
        ToolRegistry::new(store, Duration::from_secs(config.agent.persistence_timeout_secs));
    let runtime = AgentRuntime::new(
        llm.clone(),
        tools,
        Arc::new(ConversationStore::new()),
        RuntimeSettings::from(&config.agent),
    );
    let extractor = DonationExtractor::from_config(config, llm)?;

    Ok(AppState { runtime: Arc::new(runtime), extractor: Arc::new(extractor) })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use foodlink_agent::llm::{Completion, ScriptedLlmClient};
    use foodlink_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use foodlink_core::domain::conversation::ThreadId;

    use crate::bootstrap::{bootstrap_with_llm, BootstrapOptions};

    fn config(database_url: &str) -> AppConfig {
        let mut config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("default config loads");
        config.database.max_connections = 1;
        config
    }

    #[tokio::test]
    async fn bootstrap_migrates_seeds_and_serves_tool_calls() {
        let llm = Arc::new(ScriptedLlmClient::new([Ok(Completion::tool(
            "crud_tool",
            serde_json::json!({"operation": "get_user", "data": {"user_id": "user-donor-001"}}),
        ))]));

        let app = bootstrap_with_llm(
            config("sqlite::memory:"),
            BootstrapOptions { seed_demo_data: true },
            llm,
        )
        .await
        .expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'records'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("records table");
        assert_eq!(table_count, 1);

        let thread = ThreadId::from("t-boot");
        let reply = app.state.runtime.handle("show me user-donor-001", &thread).await;
        assert!(reply.starts_with("Retrieved user:"), "unexpected reply: {reply}");
        assert!(reply.contains("Corner Bakery"));

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_unreachable_database_paths() {
        let result = bootstrap_with_llm(
            config("sqlite:///definitely/not/a/real/dir/foodlink.db"),
            BootstrapOptions::default(),
            Arc::new(ScriptedLlmClient::default()),
        )
        .await;

        assert!(result.is_err());
        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("database connection failed"), "unexpected error: {message}");
    }
}
