use std::sync::Arc;

use anyhow::Result;

use crate::adapters;
use crate::config::AppConfig;
use crate::core::{ArchiveExtractor, ContainerControl, TarGzExtractor};
use crate::service::RestoreService;

/// Composition root shared by the RPC and web layers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub restore: Arc<RestoreService>,
}

impl AppContext {
    /// Wire up the adapters selected by `config`. Requires a tokio runtime.
    pub fn new(config: AppConfig) -> Result<Self> {
        let containers = adapters::container_control(&config);
        Self::with_components(config, containers, Arc::new(TarGzExtractor::new()))
    }

    pub fn with_components(
        config: AppConfig,
        containers: Arc<dyn ContainerControl>,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Result<Self> {
        let restore = RestoreService::new(&config, containers, extractor)?;
        Ok(Self {
            config: Arc::new(config),
            restore: Arc::new(restore),
        })
    }
}
