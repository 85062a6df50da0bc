//! # postmedia-pipeline: upload and display media for scheduled posts
//!
//! Ties the remote store and the local cache together into the two flows
//! the dashboard needs:
//!
//! - [`UploadWorkflow`]: local file → dated folder on the remote store, with
//!   a public display link for images. Never fails with an error; every
//!   result is a [`WorkflowOutcome`].
//! - [`MediaLoader`]: remote file id → displayable URL, served from the local
//!   cache when possible.
//!
//! [`MediaPipeline`] wires both to one store, credential holder, cache and
//! object URL registry.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use postmedia_pipeline::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let provider = Arc::new(CredentialStore::new(Arc::new(StaticAuthorizer::from_env(
//!     "POSTMEDIA_ACCESS_TOKEN",
//! ))));
//! let pipeline = MediaPipeline::from_config(PipelineConfig::from_env()?, provider)?;
//!
//! let file = LocalFile::from_path("photo.jpg").await?;
//! let outcome = pipeline.workflow().run(&file).await;
//! println!("{}", serde_json::to_string(&outcome.report())?);
//! # Ok(())
//! # }
//! ```

mod cancel;
pub mod config;
pub mod descriptor;
mod error;
pub mod loader;
pub mod telemetry;
pub mod workflow;

use std::sync::Arc;

use postmedia_cache::{BlobCache, BlobUrlManager, ObjectUrlRegistry, RedbBlobCache};
use postmedia_drive::{CredentialProvider, DriveClient, RemoteStore};
use tracing::info;

pub use cancel::CancelFlag;
pub use config::{MediaPolicy, PipelineConfig};
pub use descriptor::MediaDescriptor;
pub use error::{LoadError, PipelineError, PipelineResult};
pub use loader::{LoadObserver, MediaLoader, NoopObserver};
pub use workflow::{
    Clock, FixedClock, SystemClock, UploadWorkflow, WorkflowOutcome, WorkflowReport,
    WorkflowState,
};

/// Upload workflow and media loader sharing one set of collaborators.
#[derive(Clone)]
pub struct MediaPipeline {
    config: PipelineConfig,
    provider: Arc<dyn CredentialProvider>,
    cache: Arc<dyn BlobCache>,
    urls: Arc<ObjectUrlRegistry>,
    workflow: UploadWorkflow,
    loader: MediaLoader,
}

impl MediaPipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn RemoteStore>,
        provider: Arc<dyn CredentialProvider>,
        cache: Arc<dyn BlobCache>,
    ) -> Self {
        let urls = Arc::new(ObjectUrlRegistry::new());
        let workflow = UploadWorkflow::new(store.clone(), provider.clone(), config.clone())
            .with_cache(cache.clone());
        let loader = MediaLoader::new(
            cache.clone(),
            store,
            provider.clone(),
            urls.clone(),
            &config,
        );

        Self {
            config,
            provider,
            cache,
            urls,
            workflow,
            loader,
        }
    }

    /// HTTP remote store plus a redb cache at `config.cache_path`.
    /// The cache file is only opened on first use.
    pub fn from_config(
        config: PipelineConfig,
        provider: Arc<dyn CredentialProvider>,
    ) -> PipelineResult<Self> {
        let store = Arc::new(DriveClient::new(config.drive.clone())?);
        let cache = Arc::new(RedbBlobCache::new(config.cache_path.clone()));
        info!(
            "Media pipeline using {} with cache at {}",
            config.drive.api_base,
            config.cache_path.display()
        );
        Ok(Self::new(config, store, provider, cache))
    }

    /// Replace the upload workflow, e.g. to install a clock or refresh hook
    pub fn with_workflow<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(UploadWorkflow) -> UploadWorkflow,
    {
        self.workflow = configure(self.workflow);
        self
    }

    pub fn workflow(&self) -> &UploadWorkflow {
        &self.workflow
    }

    pub fn loader(&self) -> &MediaLoader {
        &self.loader
    }

    /// A fresh URL arena revoking into this pipeline's registry
    pub fn url_manager(&self) -> BlobUrlManager {
        BlobUrlManager::new(self.urls.clone())
    }

    pub fn registry(&self) -> &Arc<ObjectUrlRegistry> {
        &self.urls
    }

    pub fn provider(&self) -> &Arc<dyn CredentialProvider> {
        &self.provider
    }

    pub fn cache(&self) -> &Arc<dyn BlobCache> {
        &self.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CancelFlag, LoadObserver, MediaDescriptor, MediaLoader, MediaPipeline, MediaPolicy,
        NoopObserver, PipelineConfig, PipelineError, PipelineResult, UploadWorkflow,
        WorkflowOutcome,
    };
    pub use postmedia_cache::{BlobCache, BlobUrlManager, MemoryBlobCache, RedbBlobCache};
    pub use postmedia_drive::{
        AccessCredential, CredentialProvider, CredentialStore, FileId, LocalFile,
        MemoryRemoteStore, StaticAuthorizer, UploadReceipt,
    };
}
