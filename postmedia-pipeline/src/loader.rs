use std::sync::Arc;

use postmedia_cache::{is_object_url, BlobCache, BlobUrlManager, ObjectUrlRegistry};
use postmedia_drive::{is_video, AccessCredential, CredentialProvider, FileId, RemoteStore};
use tracing::{debug, instrument, warn};

use crate::{CancelFlag, LoadError, MediaDescriptor, PipelineConfig};

/// Progress callbacks for a single load.
pub trait LoadObserver: Send + Sync {
    fn on_loading_start(&self, _file_id: &FileId) {}

    fn on_success(&self, file_id: &FileId, url: &str);

    fn on_error(&self, file_id: &FileId, reason: &str);
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LoadObserver for NoopObserver {
    fn on_success(&self, _file_id: &FileId, _url: &str) {}

    fn on_error(&self, _file_id: &FileId, _reason: &str) {}
}

/// Turns a remote file id into something displayable.
///
/// Images come from the local cache when possible and are fetched (then
/// cached) otherwise; the result is an ephemeral `blob:` URL. Videos are
/// never fetched and resolve to a fixed placeholder. A credential the store
/// rejects is invalidated in `provider`.
#[derive(Clone)]
pub struct MediaLoader {
    cache: Arc<dyn BlobCache>,
    store: Arc<dyn RemoteStore>,
    provider: Arc<dyn CredentialProvider>,
    urls: Arc<ObjectUrlRegistry>,
    video_placeholder: String,
}

impl MediaLoader {
    pub fn new(
        cache: Arc<dyn BlobCache>,
        store: Arc<dyn RemoteStore>,
        provider: Arc<dyn CredentialProvider>,
        urls: Arc<ObjectUrlRegistry>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            cache,
            store,
            provider,
            urls,
            video_placeholder: config.video_placeholder_url.clone(),
        }
    }

    /// Registry the loader mints URLs in
    pub fn registry(&self) -> &Arc<ObjectUrlRegistry> {
        &self.urls
    }

    /// Resolve `file_id` to a displayable URL, reporting through `observer`.
    pub async fn load(
        &self,
        file_id: &FileId,
        credential: Option<&AccessCredential>,
        mime_type: &str,
        observer: &dyn LoadObserver,
    ) -> Option<String> {
        observer.on_loading_start(file_id);
        let result = self.resolve(file_id, credential, mime_type).await;
        report(file_id, result, observer)
    }

    /// Like [`load`](Self::load), but if `cancel` is set by the time the
    /// result is ready it is discarded: no success or error callback fires and
    /// any minted URL is released again.
    pub async fn load_cancellable(
        &self,
        file_id: &FileId,
        credential: Option<&AccessCredential>,
        mime_type: &str,
        observer: &dyn LoadObserver,
        cancel: &CancelFlag,
    ) -> Option<String> {
        observer.on_loading_start(file_id);
        let result = self.resolve(file_id, credential, mime_type).await;

        if cancel.is_cancelled() {
            debug!("Discarding load of {}: cancelled", file_id);
            if let Ok(url) = &result {
                self.urls.release(url);
            }
            return None;
        }
        report(file_id, result, observer)
    }

    /// Load and track the resulting URL in `urls` under the file id,
    /// releasing whatever URL that key held before.
    pub async fn load_into(
        &self,
        urls: &mut BlobUrlManager,
        file_id: &FileId,
        credential: Option<&AccessCredential>,
        mime_type: &str,
        observer: &dyn LoadObserver,
    ) -> Option<String> {
        let url = self.load(file_id, credential, mime_type, observer).await?;
        urls.add_url(file_id.as_str(), url.clone());
        Some(url)
    }

    /// Drive a media item through its loading state.
    ///
    /// Items that are not uploaded yet get a local preview instead. Returns
    /// whether the item ended up with a display URL.
    pub async fn load_descriptor(
        &self,
        media: &mut MediaDescriptor,
        credential: Option<&AccessCredential>,
        urls: &mut BlobUrlManager,
    ) -> bool {
        let Some(file_id) = media.file_id.clone() else {
            return media.preview(&self.urls, urls).is_some();
        };

        if let Some(url) = urls.get_url(file_id.as_str()) {
            media.mark_loaded(url);
            return true;
        }

        media.begin_loading();
        match self.resolve(&file_id, credential, &media.mime_type).await {
            Ok(url) => {
                urls.add_url(file_id.as_str(), url.clone());
                media.mark_loaded(url);
                true
            }
            Err(e) => {
                media.mark_failed(e.to_string());
                false
            }
        }
    }

    #[instrument(skip(self, credential))]
    async fn resolve(
        &self,
        file_id: &FileId,
        credential: Option<&AccessCredential>,
        mime_type: &str,
    ) -> Result<String, LoadError> {
        if is_video(mime_type) {
            return Ok(self.video_placeholder.clone());
        }

        if let Some(bytes) = self.cache.get(file_id.as_str()).await {
            debug!("Cache hit for {}", file_id);
            return Ok(self.urls.create(bytes, mime_type));
        }

        let credential = credential.ok_or(LoadError::CredentialRequired)?;
        let bytes = match self.store.download(credential, file_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.is_auth_failure() {
                    self.provider.invalidate_credential(credential);
                }
                return Err(e.into());
            }
        };
        debug!("Fetched {} ({} bytes)", file_id, bytes.len());

        self.cache.put(file_id.as_str(), bytes.clone()).await;
        Ok(self.urls.create(bytes, mime_type))
    }
}

fn report(
    file_id: &FileId,
    result: Result<String, LoadError>,
    observer: &dyn LoadObserver,
) -> Option<String> {
    match result {
        Ok(url) => {
            if !is_object_url(&url) {
                debug!("Using placeholder for {}", file_id);
            }
            observer.on_success(file_id, &url);
            Some(url)
        }
        Err(e) => {
            if e.needs_reauth() {
                warn!("Could not load {} without signing in again: {}", file_id, e);
            } else {
                warn!("Could not load {}: {}", file_id, e);
            }
            observer.on_error(file_id, &e.to_string());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use postmedia_cache::MemoryBlobCache;
    use postmedia_drive::{
        CredentialStore, DriveResult, FolderId, LocalFile, MemoryRemoteStore, StaticAuthorizer,
        StoreOp,
    };

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl LoadObserver for Recorder {
        fn on_loading_start(&self, file_id: &FileId) {
            self.events.lock().push(format!("start {}", file_id));
        }

        fn on_success(&self, file_id: &FileId, url: &str) {
            self.events.lock().push(format!("ok {} {}", file_id, url));
        }

        fn on_error(&self, file_id: &FileId, reason: &str) {
            self.events.lock().push(format!("err {} {}", file_id, reason));
        }
    }

    struct Fixture {
        cache: Arc<MemoryBlobCache>,
        store: Arc<MemoryRemoteStore>,
        provider: Arc<CredentialStore>,
        registry: Arc<ObjectUrlRegistry>,
        loader: MediaLoader,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(MemoryBlobCache::new());
        let store = Arc::new(MemoryRemoteStore::new());
        let registry = Arc::new(ObjectUrlRegistry::new());
        let provider = Arc::new(
            CredentialStore::new(Arc::new(StaticAuthorizer::new("tok")))
                .with_credential(credential()),
        );
        let loader = MediaLoader::new(
            cache.clone(),
            store.clone(),
            provider.clone(),
            registry.clone(),
            &PipelineConfig::default(),
        );
        Fixture {
            cache,
            store,
            provider,
            registry,
            loader,
        }
    }

    fn credential() -> AccessCredential {
        AccessCredential::new("tok")
    }

    #[tokio::test]
    async fn test_video_short_circuits() {
        let f = fixture();
        let observer = Recorder::default();
        let id = FileId::new("vid");

        let url = f
            .loader
            .load(&id, Some(&credential()), "video/mp4", &observer)
            .await;

        assert_eq!(url.as_deref(), Some("https://placehold.co/600x400?text=Video"));
        assert_eq!(f.cache.operation_count(), 0);
        assert_eq!(f.store.total_calls(), 0);
        assert_eq!(f.registry.live_count(), 0);
        assert_eq!(
            observer.events(),
            vec![
                "start vid".to_string(),
                "ok vid https://placehold.co/600x400?text=Video".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_cache_hit_needs_no_credential() {
        let f = fixture();
        f.cache.put("abc", Bytes::from_static(b"cached png")).await;

        let url = f
            .loader
            .load(&FileId::new("abc"), None, "image/png", &NoopObserver)
            .await
            .unwrap();

        assert!(is_object_url(&url));
        let entry = f.registry.resolve(&url).unwrap();
        assert_eq!(entry.bytes.as_ref(), b"cached png");
        assert_eq!(entry.mime_type, "image/png");
        assert_eq!(f.store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches() {
        let f = fixture();
        let id = f.store.insert_file("abc", "image/png", Bytes::from_static(b"remote png"));

        let first = f
            .loader
            .load(&id, Some(&credential()), "image/png", &NoopObserver)
            .await
            .unwrap();
        assert!(f.cache.contains("abc"));
        assert_eq!(f.registry.resolve(&first).unwrap().bytes.as_ref(), b"remote png");

        f.loader.load(&id, None, "image/png", &NoopObserver).await.unwrap();
        assert_eq!(f.store.calls(StoreOp::Download), 1);
    }

    #[tokio::test]
    async fn test_miss_without_credential() {
        let f = fixture();
        let observer = Recorder::default();

        let url = f
            .loader
            .load(&FileId::new("abc"), None, "image/jpeg", &observer)
            .await;

        assert!(url.is_none());
        assert_eq!(observer.events().last().unwrap(), "err abc credential required");
        assert_eq!(f.store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_download_failure_reports_error() {
        let f = fixture();
        let observer = Recorder::default();

        let url = f
            .loader
            .load(&FileId::new("gone"), Some(&credential()), "image/jpeg", &observer)
            .await;

        assert!(url.is_none());
        assert!(observer.events().last().unwrap().starts_with("err gone"));
        assert!(!f.cache.contains("gone"));
        assert_eq!(f.registry.live_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_download_invalidates_credential() {
        let f = fixture();
        let id = f.store.insert_file("abc", "image/png", Bytes::from_static(b"png"));
        f.store.revoke_token("tok");
        let observer = Recorder::default();

        let held = f.provider.current();
        let url = f.loader.load(&id, held.as_ref(), "image/png", &observer).await;

        assert!(url.is_none());
        assert!(observer.events().last().unwrap().starts_with("err abc"));
        assert!(f.provider.current().is_none());
        assert!(f.provider.request_credential().await.is_err());
    }

    #[tokio::test]
    async fn test_server_error_keeps_credential() {
        let f = fixture();
        f.store.fail(StoreOp::Download, 500, "Backend Error");

        let url = f
            .loader
            .load(&FileId::new("abc"), Some(&credential()), "image/png", &NoopObserver)
            .await;

        assert!(url.is_none());
        assert_eq!(f.provider.current(), Some(credential()));
    }

    #[tokio::test]
    async fn test_load_into_replaces_previous_url() {
        let f = fixture();
        let id = f.store.insert_file("abc", "image/png", Bytes::from_static(b"png"));
        let mut urls = BlobUrlManager::new(f.registry.clone());

        let first = f
            .loader
            .load_into(&mut urls, &id, Some(&credential()), "image/png", &NoopObserver)
            .await
            .unwrap();
        let second = f
            .loader
            .load_into(&mut urls, &id, Some(&credential()), "image/png", &NoopObserver)
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(urls.get_url("abc"), Some(second.as_str()));
        assert_eq!(f.registry.live_count(), 1);
        assert!(f.registry.resolve(&first).is_none());

        urls.release_all();
        assert_eq!(f.registry.live_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_load_stays_silent() {
        let f = fixture();
        let id = f.store.insert_file("abc", "image/png", Bytes::from_static(b"png"));
        let observer = Recorder::default();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let url = f
            .loader
            .load_cancellable(&id, Some(&credential()), "image/png", &observer, &cancel)
            .await;

        assert!(url.is_none());
        assert_eq!(observer.events(), vec!["start abc".to_string()]);
        assert_eq!(f.registry.live_count(), 0);
        // the fetch itself still completed and was cached
        assert!(f.cache.contains("abc"));
    }

    /// Delegates to a memory store and raises `cancel` while `trigger` runs
    struct CancelDuring {
        inner: MemoryRemoteStore,
        cancel: CancelFlag,
        trigger: StoreOp,
    }

    impl CancelDuring {
        fn tick(&self, op: StoreOp) {
            if op == self.trigger {
                self.cancel.cancel();
            }
        }
    }

    #[async_trait]
    impl RemoteStore for CancelDuring {
        async fn find_folder(
            &self,
            credential: &AccessCredential,
            name: &str,
            parent: &FolderId,
        ) -> DriveResult<Option<FolderId>> {
            self.tick(StoreOp::FindFolder);
            self.inner.find_folder(credential, name, parent).await
        }

        async fn create_folder(
            &self,
            credential: &AccessCredential,
            name: &str,
            parent: &FolderId,
        ) -> DriveResult<FolderId> {
            self.tick(StoreOp::CreateFolder);
            self.inner.create_folder(credential, name, parent).await
        }

        async fn upload_file(
            &self,
            credential: &AccessCredential,
            file: &LocalFile,
            parent: &FolderId,
        ) -> DriveResult<FileId> {
            self.tick(StoreOp::Upload);
            self.inner.upload_file(credential, file, parent).await
        }

        async fn share_publicly(
            &self,
            credential: &AccessCredential,
            file_id: &FileId,
        ) -> DriveResult<()> {
            self.tick(StoreOp::Share);
            self.inner.share_publicly(credential, file_id).await
        }

        async fn download(
            &self,
            credential: &AccessCredential,
            file_id: &FileId,
        ) -> DriveResult<Bytes> {
            self.tick(StoreOp::Download);
            self.inner.download(credential, file_id).await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_download_releases_url() {
        let cancel = CancelFlag::new();
        let store = Arc::new(CancelDuring {
            inner: MemoryRemoteStore::new(),
            cancel: cancel.clone(),
            trigger: StoreOp::Download,
        });
        let id = store.inner.insert_file("abc", "image/png", Bytes::from_static(b"png"));
        let cache = Arc::new(MemoryBlobCache::new());
        let registry = Arc::new(ObjectUrlRegistry::new());
        let provider = Arc::new(CredentialStore::new(Arc::new(StaticAuthorizer::new("tok"))));
        let loader = MediaLoader::new(
            cache.clone(),
            store.clone(),
            provider,
            registry.clone(),
            &PipelineConfig::default(),
        );
        let observer = Recorder::default();

        assert!(!cancel.is_cancelled());
        let url = loader
            .load_cancellable(&id, Some(&credential()), "image/png", &observer, &cancel)
            .await;

        assert!(url.is_none());
        assert_eq!(store.inner.calls(StoreOp::Download), 1);
        assert!(cache.contains("abc"));
        assert_eq!(observer.events(), vec!["start abc".to_string()]);
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn test_load_descriptor_states() {
        let f = fixture();
        f.store.insert_file("abc", "image/png", Bytes::from_static(b"png"));
        let mut urls = BlobUrlManager::new(f.registry.clone());

        let mut media = MediaDescriptor::parse_post_media(
            r#"[{"fileId":"abc","fileName":"a.png","mimeType":"image/png"},
                {"fileId":"zzz","fileName":"b.png","mimeType":"image/png"}]"#,
        );

        assert!(!f.loader.load_descriptor(&mut media[0], None, &mut urls).await);
        assert_eq!(media[0].error.as_deref(), Some("credential required"));

        assert!(
            f.loader
                .load_descriptor(&mut media[0], Some(&credential()), &mut urls)
                .await
        );
        assert!(media[0].error.is_none());
        assert!(!media[0].is_loading);
        assert_eq!(media[0].display_url.as_deref(), urls.get_url("abc"));

        assert!(
            !f.loader
                .load_descriptor(&mut media[1], Some(&credential()), &mut urls)
                .await
        );
        assert!(media[1].error.as_deref().unwrap().starts_with("download failed"));
    }
}
