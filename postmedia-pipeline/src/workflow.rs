//! Upload workflow as an explicit state machine.
//!
//! ```text
//! Start ─credential held──────────────┐
//!   └─none─→ RequestCredential ─denied─┼─→ Done(AuthFailure)
//!                                      ↓
//!                               ResolveFolder ─err─→ Done(classified)
//!                                      ↓
//!                                   Upload ─err─→ Done(classified)
//!                                      ↓
//!                               Done(Success)
//! ```
//!
//! Every transition is a separate [`UploadWorkflow::step`] call; [`UploadWorkflow::run`]
//! just drives the machine until it reaches `Done`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use postmedia_cache::BlobCache;
use postmedia_drive::{
    AccessCredential, CredentialProvider, DriveError, FolderId, FolderPath, FolderResolver,
    LocalFile, RemoteStore, UploadExecutor, UploadReceipt,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{CancelFlag, PipelineConfig};

/// Source of the current time, used to pick the dated upload folder
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Called with every credential granted during a workflow
pub type CredentialCallback = Arc<dyn Fn(&AccessCredential) + Send + Sync>;

/// Terminal result of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Success(UploadReceipt),

    /// Anything other than a credential problem; retrying may help
    TransientFailure { message: String },

    /// The credential was missing or rejected and has been discarded
    AuthFailure { message: String },
}

impl WorkflowOutcome {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::TransientFailure {
            message: message.into(),
        }
    }

    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::AuthFailure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::AuthFailure { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Success(_) => "File uploaded successfully",
            Self::TransientFailure { message } | Self::AuthFailure { message } => message,
        }
    }

    pub fn upload_data(&self) -> Option<&UploadReceipt> {
        match self {
            Self::Success(receipt) => Some(receipt),
            _ => None,
        }
    }

    pub fn into_upload_data(self) -> Option<UploadReceipt> {
        match self {
            Self::Success(receipt) => Some(receipt),
            _ => None,
        }
    }

    /// Flat view for the dashboard
    pub fn report(&self) -> WorkflowReport {
        WorkflowReport {
            success: self.is_success(),
            message: self.message().to_string(),
            upload_data: self.upload_data().cloned(),
            needs_reauth: self.needs_reauth(),
        }
    }
}

/// Wire shape of a [`WorkflowOutcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    pub success: bool,
    pub message: String,
    pub upload_data: Option<UploadReceipt>,
    pub needs_reauth: bool,
}

/// Position of one upload in the state machine.
///
/// The target path is fixed when the workflow starts, so a run straddling a
/// month boundary still lands in a single folder.
#[derive(Debug, Clone)]
pub enum WorkflowState {
    Start,
    RequestCredential {
        path: FolderPath,
    },
    ResolveFolder {
        credential: AccessCredential,
        path: FolderPath,
    },
    Upload {
        credential: AccessCredential,
        folder: FolderId,
    },
    Done(WorkflowOutcome),
}

impl WorkflowState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Uploads local files into `root/YYYY/MM` on the remote store.
///
/// `run` never returns an error: every failure, including a panic inside a
/// step, ends up as a [`WorkflowOutcome`].
#[derive(Clone)]
pub struct UploadWorkflow {
    provider: Arc<dyn CredentialProvider>,
    resolver: FolderResolver,
    executor: UploadExecutor,
    cache: Option<Arc<dyn BlobCache>>,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    on_credential_refresh: Option<CredentialCallback>,
}

impl UploadWorkflow {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        provider: Arc<dyn CredentialProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            provider,
            resolver: FolderResolver::new(store.clone()),
            executor: UploadExecutor::new(store, config.drive.clone()),
            cache: None,
            config,
            clock: Arc::new(SystemClock),
            on_credential_refresh: None,
        }
    }

    /// Keep a copy of every uploaded file in `cache`
    pub fn with_cache(mut self, cache: Arc<dyn BlobCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn on_credential_refresh<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AccessCredential) + Send + Sync + 'static,
    {
        self.on_credential_refresh = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Dated folder for an upload starting now
    pub fn target_path(&self) -> FolderPath {
        FolderPath::dated(&self.config.root_folder_name, &self.clock.now())
    }

    /// Advance `state` by one transition.
    pub async fn step(&self, state: WorkflowState, file: &LocalFile) -> WorkflowState {
        match state {
            WorkflowState::Start => {
                if !self.config.media_policy.permits(&file.mime_type) {
                    warn!("Rejected {} with type {}", file.name, file.mime_type);
                    return WorkflowState::Done(WorkflowOutcome::transient(format!(
                        "Unsupported file type {}: only {} files can be uploaded",
                        file.mime_type,
                        self.config.media_policy.allowed_prefixes.join(", ")
                    )));
                }

                let path = self.target_path();
                match self.provider.current() {
                    Some(credential) => WorkflowState::ResolveFolder { credential, path },
                    None => WorkflowState::RequestCredential { path },
                }
            }

            WorkflowState::RequestCredential { path } => {
                match self.provider.request_credential().await {
                    Ok(credential) => {
                        debug!("Credential granted for upload");
                        if let Some(callback) = &self.on_credential_refresh {
                            callback(&credential);
                        }
                        WorkflowState::ResolveFolder { credential, path }
                    }
                    Err(e) => {
                        warn!("Credential request failed: {:#}", e);
                        WorkflowState::Done(WorkflowOutcome::auth(format!(
                            "Authentication required: {}",
                            e
                        )))
                    }
                }
            }

            WorkflowState::ResolveFolder { credential, path } => {
                match self.resolver.resolve_or_create(&path, &credential).await {
                    Ok(folder) => WorkflowState::Upload { credential, folder },
                    Err(e) => WorkflowState::Done(self.classify(e, &credential)),
                }
            }

            WorkflowState::Upload { credential, folder } => {
                match self.executor.upload(file, &credential, &folder).await {
                    Ok(receipt) => {
                        if let Some(cache) = &self.cache {
                            cache.put(receipt.file_id.as_str(), file.bytes.clone()).await;
                        }
                        WorkflowState::Done(WorkflowOutcome::Success(receipt))
                    }
                    Err(e) => WorkflowState::Done(self.classify(e, &credential)),
                }
            }

            done @ WorkflowState::Done(_) => done,
        }
    }

    /// Map a remote store error to an outcome, discarding `credential` if
    /// the store rejected it.
    fn classify(&self, err: DriveError, credential: &AccessCredential) -> WorkflowOutcome {
        if err.is_auth_failure() {
            warn!("Remote store rejected the credential: {}", err);
            self.provider.invalidate_credential(credential);
            WorkflowOutcome::auth(format!("Authentication required: {}", err.user_message()))
        } else {
            warn!("Upload failed: {}", err);
            WorkflowOutcome::transient(format!("Upload failed: {}", err.user_message()))
        }
    }

    /// Upload one file.
    #[instrument(skip(self, file), fields(name = %file.name, mime = %file.mime_type))]
    pub async fn run(&self, file: &LocalFile) -> WorkflowOutcome {
        let drive = async {
            let mut state = WorkflowState::Start;
            loop {
                state = match self.step(state, file).await {
                    WorkflowState::Done(outcome) => return outcome,
                    next => next,
                };
            }
        };

        let outcome = match AssertUnwindSafe(drive).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!("Upload workflow panicked: {}", reason);
                WorkflowOutcome::transient(format!("Unexpected error: {}", reason))
            }
        };

        match &outcome {
            WorkflowOutcome::Success(receipt) => {
                info!("Upload of {} finished as {}", file.name, receipt.file_id)
            }
            other => info!("Upload of {} ended: {}", file.name, other.message()),
        }
        outcome
    }

    /// Like [`run`](Self::run), but yields `None` if `cancel` was set by the
    /// time the outcome is known. A started remote call is never interrupted.
    pub async fn run_cancellable(
        &self,
        file: &LocalFile,
        cancel: &CancelFlag,
    ) -> Option<WorkflowOutcome> {
        if cancel.is_cancelled() {
            return None;
        }
        let outcome = self.run(file).await;
        if cancel.is_cancelled() {
            debug!("Discarding outcome for {}: cancelled", file.name);
            return None;
        }
        Some(outcome)
    }

    /// Upload several files concurrently. Outcomes are in input order and a
    /// failure of one file never affects the others.
    pub async fn run_batch(&self, files: &[LocalFile]) -> Vec<WorkflowOutcome> {
        join_all(files.iter().map(|file| self.run(file))).await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeZone;
    use postmedia_cache::MemoryBlobCache;
    use postmedia_drive::{
        CredentialStore, DriveResult, FileId, MemoryRemoteStore, StaticAuthorizer, StoreOp,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn june_2025() -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()))
    }

    fn jpeg() -> LocalFile {
        LocalFile::new("a.jpg", "image/jpeg", Bytes::from_static(b"\xFF\xD8\xFFjpeg"))
    }

    fn signed_in(token: &str) -> Arc<CredentialStore> {
        Arc::new(
            CredentialStore::new(Arc::new(StaticAuthorizer::new(token)))
                .with_credential(AccessCredential::new(token)),
        )
    }

    fn workflow(store: Arc<MemoryRemoteStore>, provider: Arc<dyn CredentialProvider>) -> UploadWorkflow {
        UploadWorkflow::new(store, provider, PipelineConfig::default()).with_clock(june_2025())
    }

    #[tokio::test]
    async fn test_fresh_upload_lands_in_dated_folder() {
        let store = Arc::new(MemoryRemoteStore::new());
        let outcome = workflow(store.clone(), signed_in("tok")).run(&jpeg()).await;

        let receipt = outcome.upload_data().unwrap().clone();
        assert!(outcome.is_success());
        assert!(!outcome.needs_reauth());
        assert_eq!(
            receipt.display_url,
            Some(format!(
                "https://drive.google.com/uc?export=view&id={}",
                receipt.file_id
            ))
        );

        let root = store.folders_named("X_Post_MediaFiles", &FolderId::root());
        assert_eq!(root.len(), 1);
        let year = store.folders_named("2025", &root[0].id);
        assert_eq!(year.len(), 1);
        let month = store.folders_named("06", &year[0].id);
        assert_eq!(month.len(), 1);

        let stored = store.file(&receipt.file_id).unwrap();
        assert_eq!(stored.parent, month[0].id);
        assert!(stored.public);
    }

    #[tokio::test]
    async fn test_second_upload_reuses_folders() {
        let store = Arc::new(MemoryRemoteStore::new());
        let workflow = workflow(store.clone(), signed_in("tok"));

        assert!(workflow.run(&jpeg()).await.is_success());
        assert!(workflow.run(&jpeg()).await.is_success());

        assert_eq!(store.folder_count(), 3);
        assert_eq!(store.calls(StoreOp::CreateFolder), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rejected_credential_is_invalidated() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.revoke_token("stale");
        let provider = signed_in("stale");

        let outcome = workflow(store.clone(), provider.clone()).run(&jpeg()).await;

        assert!(outcome.needs_reauth());
        assert!(!outcome.is_success());
        assert!(provider.current().is_none());
        assert_eq!(store.calls(StoreOp::Upload), 0);
        assert!(logs_contain("rejected the credential"));
    }

    struct SequenceAuthorizer {
        grants: AtomicUsize,
    }

    #[async_trait]
    impl postmedia_drive::Authorizer for SequenceAuthorizer {
        async fn authorize(&self) -> anyhow::Result<AccessCredential> {
            let n = self.grants.fetch_add(1, Ordering::SeqCst);
            Ok(AccessCredential::new(format!("token-{}", n)))
        }
    }

    #[tokio::test]
    async fn test_late_rejection_keeps_fresh_credential() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.revoke_token("stale");
        let authorizer = Arc::new(SequenceAuthorizer {
            grants: AtomicUsize::new(0),
        });
        let provider = Arc::new(
            CredentialStore::new(authorizer.clone())
                .with_credential(AccessCredential::new("stale")),
        );
        let workflow = workflow(store.clone(), provider.clone());
        let file = jpeg();

        // First upload picks up the stale token and stops before the store
        let first = workflow.step(WorkflowState::Start, &file).await;
        assert!(matches!(first, WorkflowState::ResolveFolder { .. }));

        // Meanwhile another upload is rejected and obtains a fresh token
        let second = workflow.run(&file).await;
        assert!(second.needs_reauth());
        let fresh = provider.request_credential().await.unwrap();
        assert_eq!(fresh.secret(), "token-0");

        // The first upload's stale token is now rejected as well
        let done = workflow.step(first, &file).await;
        assert!(matches!(
            done,
            WorkflowState::Done(WorkflowOutcome::AuthFailure { .. })
        ));
        assert_eq!(provider.current(), Some(fresh));

        assert!(workflow.run(&file).await.is_success());
        assert_eq!(authorizer.grants.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_forbidden_is_auth_failure() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.fail(StoreOp::Upload, 403, "Insufficient permissions");
        let provider = signed_in("tok");

        let outcome = workflow(store, provider.clone()).run(&jpeg()).await;

        assert!(outcome.needs_reauth());
        assert!(outcome.message().contains("Insufficient permissions"));
        assert!(provider.current().is_none());
    }

    #[tokio::test]
    async fn test_denied_credential_request() {
        let store = Arc::new(MemoryRemoteStore::new());
        let provider = Arc::new(CredentialStore::new(Arc::new(StaticAuthorizer::denied())));

        let outcome = workflow(store.clone(), provider).run(&jpeg()).await;

        assert!(outcome.needs_reauth());
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.fail(StoreOp::CreateFolder, 500, "Backend Error");
        let provider = signed_in("tok");

        let outcome = workflow(store.clone(), provider.clone()).run(&jpeg()).await;

        assert_eq!(outcome, WorkflowOutcome::transient("Upload failed: Backend Error"));
        assert!(provider.current().is_some());
        assert_eq!(store.calls(StoreOp::Upload), 0);
    }

    #[tokio::test]
    async fn test_unsupported_type_makes_no_calls() {
        let store = Arc::new(MemoryRemoteStore::new());
        let provider = Arc::new(CredentialStore::new(Arc::new(StaticAuthorizer::new("tok"))));
        let pdf = LocalFile::new("doc.pdf", "application/pdf", Bytes::from_static(b"%PDF"));

        let outcome = workflow(store.clone(), provider.clone()).run(&pdf).await;

        assert!(matches!(outcome, WorkflowOutcome::TransientFailure { .. }));
        assert!(outcome.message().contains("application/pdf"));
        assert_eq!(store.total_calls(), 0);
        assert!(!provider.has_credential());
    }

    #[tokio::test]
    async fn test_refresh_callback_sees_new_credential() {
        let store = Arc::new(MemoryRemoteStore::new());
        let provider = Arc::new(CredentialStore::new(Arc::new(StaticAuthorizer::new("fresh"))));
        let refreshed = Arc::new(AtomicUsize::new(0));
        let seen = refreshed.clone();

        let workflow = workflow(store, provider).on_credential_refresh(move |credential| {
            assert_eq!(credential.secret(), "fresh");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(workflow.run(&jpeg()).await.is_success());
        assert!(workflow.run(&jpeg()).await.is_success());
        assert_eq!(refreshed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_step_by_step() {
        let store = Arc::new(MemoryRemoteStore::new());
        let workflow = workflow(store, Arc::new(CredentialStore::new(Arc::new(StaticAuthorizer::new("tok")))));
        let file = jpeg();

        let state = workflow.step(WorkflowState::Start, &file).await;
        let WorkflowState::RequestCredential { path } = &state else {
            panic!("expected credential request, got {state:?}");
        };
        assert_eq!(path.to_string(), "X_Post_MediaFiles/2025/06");

        let state = workflow.step(state, &file).await;
        assert!(matches!(state, WorkflowState::ResolveFolder { .. }));
        let state = workflow.step(state, &file).await;
        assert!(matches!(state, WorkflowState::Upload { .. }));
        let state = workflow.step(state, &file).await;
        assert!(state.is_done());

        let again = workflow.step(state.clone(), &file).await;
        assert!(again.is_done());
    }

    #[tokio::test]
    async fn test_success_populates_cache() {
        let store = Arc::new(MemoryRemoteStore::new());
        let cache = Arc::new(MemoryBlobCache::new());
        let workflow = workflow(store, signed_in("tok")).with_cache(cache.clone());

        let outcome = workflow.run(&jpeg()).await;
        let file_id = outcome.upload_data().unwrap().file_id.clone();

        assert_eq!(cache.get(file_id.as_str()).await, Some(jpeg().bytes));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let store = Arc::new(MemoryRemoteStore::new());
        let files = vec![
            jpeg(),
            LocalFile::new("notes.txt", "text/plain", Bytes::from_static(b"hi")),
            LocalFile::new("clip.mp4", "video/mp4", Bytes::from_static(b"mp4")),
        ];

        let outcomes = workflow(store, signed_in("tok")).run_batch(&files).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert!(!outcomes[1].is_success());
        assert!(outcomes[2].is_success());
        assert_eq!(outcomes[2].upload_data().unwrap().display_url, None);
    }

    #[tokio::test]
    async fn test_cancelled_outcome_is_dropped() {
        let store = Arc::new(MemoryRemoteStore::new());
        let workflow = workflow(store.clone(), signed_in("tok"));
        let cancel = CancelFlag::new();

        assert!(workflow.run_cancellable(&jpeg(), &cancel).await.is_some());

        cancel.cancel();
        let uploads = store.calls(StoreOp::Upload);
        assert!(workflow.run_cancellable(&jpeg(), &cancel).await.is_none());
        assert_eq!(store.calls(StoreOp::Upload), uploads);
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
    async fn test_cancel_during_upload_suppresses_outcome() {
        let cancel = CancelFlag::new();
        let store = Arc::new(CancelDuring {
            inner: MemoryRemoteStore::new(),
            cancel: cancel.clone(),
            trigger: StoreOp::Upload,
        });
        let workflow = UploadWorkflow::new(store.clone(), signed_in("tok"), PipelineConfig::default())
            .with_clock(june_2025());

        let outcome = workflow.run_cancellable(&jpeg(), &cancel).await;

        assert!(outcome.is_none());
        assert!(cancel.is_cancelled());
        // The upload itself still ran to completion
        assert_eq!(store.inner.calls(StoreOp::Upload), 1);
        assert_eq!(store.inner.calls(StoreOp::Share), 1);
    }

    struct PanickingProvider;

    #[async_trait]
    impl CredentialProvider for PanickingProvider {
        fn current(&self) -> Option<AccessCredential> {
            None
        }

        async fn request_credential(&self) -> anyhow::Result<AccessCredential> {
            panic!("consent window crashed")
        }

        fn invalidate_credential(&self, _rejected: &AccessCredential) {}
    }

    #[tokio::test]
    async fn test_panic_becomes_transient_failure() {
        let store = Arc::new(MemoryRemoteStore::new());
        let outcome = workflow(store, Arc::new(PanickingProvider)).run(&jpeg()).await;

        assert!(matches!(outcome, WorkflowOutcome::TransientFailure { .. }));
        assert!(outcome.message().contains("consent window crashed"));
    }

    #[test]
    fn test_report_shape() {
        let report = WorkflowOutcome::auth("Authentication required: expired").report();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["needsReauth"], true);
        assert!(json["uploadData"].is_null());
    }
}
