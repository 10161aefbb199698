use crate::config::AppConfig;
use crate::intake::IntakeCoordinator;
use crate::storage::Storage;
use crate::triage::Classifier;
use std::sync::Arc;

/// Shared wiring for everything that hosts the intake pipeline (the
/// provisioning binary, channel adapter crates, tests).
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub storage: Arc<dyn Storage>,
    pub classifier: Arc<dyn Classifier>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn Storage>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            config,
            storage,
            classifier,
        }
    }

    pub fn coordinator(&self) -> IntakeCoordinator {
        IntakeCoordinator::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.classifier),
            &self.config.classifier,
        )
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("storage", &"Arc<dyn Storage>")
            .field("classifier", &"Arc<dyn Classifier>")
            .finish()
    }
}
