use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::PipelineConfig;
use crate::gateway::ModelGateway;
use crate::pipeline::artifacts::ArtifactStore;
use crate::recovery::{ChunkRecoveryExecutor, MapReport};

/// Shared services handed to every stage of one run.
pub struct StageContext {
    pub config: Arc<PipelineConfig>,
    pub gateway: Arc<ModelGateway>,
    pub executor: ChunkRecoveryExecutor,
    pub artifacts: ArtifactStore,
    reports: Mutex<Vec<MapReport>>,
}

impl StageContext {
    pub fn new(config: Arc<PipelineConfig>, gateway: Arc<ModelGateway>, artifacts: ArtifactStore) -> Self {
        Self {
            executor: ChunkRecoveryExecutor::new(config.recovery.clone()),
            config,
            gateway,
            artifacts,
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn record_report(&self, report: MapReport) {
        self.reports.lock().push(report);
    }

    pub fn reports(&self) -> Vec<MapReport> {
        self.reports.lock().clone()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use super::*;
    use crate::gateway::testing::{KeywordEmbedder, ScriptedProvider, fast_settings};
    use crate::gateway::{ChatProvider, Embedder};

    /// Context over scripted providers with intermediate saving disabled.
    /// Pass an `Arc` to keep inspecting the provider's requests.
    pub fn stage_context(
        provider: impl Into<Arc<ScriptedProvider>>,
        embedder: Option<KeywordEmbedder>,
        config: PipelineConfig,
        dir: &Path,
    ) -> StageContext {
        let provider: Arc<ScriptedProvider> = provider.into();
        let gateway = ModelGateway::new(
            vec![provider as Arc<dyn ChatProvider>],
            embedder.map(|e| Arc::new(e) as Arc<dyn Embedder>),
            fast_settings(),
        )
        .unwrap();
        StageContext::new(
            Arc::new(config),
            Arc::new(gateway),
            ArtifactStore::new(dir, "run_test", false),
        )
    }
}
