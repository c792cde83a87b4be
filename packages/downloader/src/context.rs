use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    DownloadSettings, catalog::CatalogApi, progress::ProgressListener,
    registry::CollectionRegistry, stats::StatsAggregator, tags::TagWriter,
    template::NameTemplates,
};

/// Shared state handed to every track of a run. Cloning is cheap.
#[derive(Clone)]
pub struct DownloadContext {
    pub api: Arc<dyn CatalogApi>,
    pub tag_writer: Arc<dyn TagWriter>,
    pub templates: Arc<dyn NameTemplates>,
    pub settings: Arc<DownloadSettings>,
    pub stats: Arc<StatsAggregator>,
    pub registry: Arc<CollectionRegistry>,
    pub cancel: CancellationToken,
    pub progress_listeners: Arc<[ProgressListener]>,
}

impl std::fmt::Debug for DownloadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadContext")
            .field("settings", &self.settings)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress_listeners", &self.progress_listeners.len())
            .finish_non_exhaustive()
    }
}
