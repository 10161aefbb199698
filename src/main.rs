use anyhow::Result;
use deskserver::bootstrap;
use deskserver::config::AppConfig;
use deskserver::shared::state::AppState;
use deskserver::shared::utils::{create_conn, run_migrations};
use deskserver::storage::{PgStorage, Storage};
use deskserver::triage::{Classifier, HttpClassifier, KeywordClassifier};
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::from_env()?;
    let pool = create_conn(&config.database.url, config.database.pool_size)?;
    run_migrations(&pool)?;

    let storage: Arc<dyn Storage> = Arc::new(PgStorage::new(pool));
    let classifier: Arc<dyn Classifier> = match &config.classifier.endpoint {
        Some(endpoint) => Arc::new(HttpClassifier::new(
            endpoint.clone(),
            config.classifier.api_key.clone(),
        )),
        None => {
            info!("no classifier endpoint configured, falling back to keyword rules");
            Arc::new(KeywordClassifier)
        }
    };

    let state = AppState::new(config, storage, classifier);
    let summary = bootstrap::run(state.storage.as_ref(), &state.config.bootstrap).await?;
    info!(
        "deskserver provisioned (admin_created={}, kb articles={})",
        summary.admin_created, summary.articles_ensured
    );
    info!("intake pipeline ready; channel adapters drive it through deskserver::intake");
    Ok(())
}
