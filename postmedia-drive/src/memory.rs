use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{AccessCredential, DriveError, DriveResult, FileId, FolderId, LocalFile, RemoteStore};

/// Remote store operations, for call counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FindFolder,
    CreateFolder,
    Upload,
    Share,
    Download,
}

#[derive(Debug, Clone)]
pub struct FolderRecord {
    pub id: FolderId,
    pub name: String,
    pub parent: FolderId,
    pub trashed: bool,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
    pub parent: FolderId,
    pub public: bool,
}

#[derive(Default)]
struct State {
    folders: Vec<FolderRecord>,
    files: HashMap<FileId, StoredFile>,
    calls: HashMap<StoreOp, usize>,
    failures: HashMap<StoreOp, (u16, String)>,
    revoked: HashSet<String>,
}

/// In-memory [`RemoteStore`] with the same search-by-parent semantics as the
/// real store.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<State>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `op` fail with the given status
    pub fn fail(&self, op: StoreOp, status: u16, message: impl Into<String>) {
        self.state.lock().failures.insert(op, (status, message.into()));
    }

    pub fn clear_failure(&self, op: StoreOp) {
        self.state.lock().failures.remove(&op);
    }

    /// Reject every call made with this token with a 401
    pub fn revoke_token(&self, token: &str) {
        self.state.lock().revoked.insert(token.to_string());
    }

    /// Seed a folder, e.g. a trashed one that must not be matched
    pub fn insert_folder(&self, name: &str, parent: &FolderId, trashed: bool) -> FolderId {
        let id = FolderId::new(format!("folder-{}", Uuid::new_v4().simple()));
        self.state.lock().folders.push(FolderRecord {
            id: id.clone(),
            name: name.to_string(),
            parent: parent.clone(),
            trashed,
        });
        id
    }

    /// Seed a stored file
    pub fn insert_file(&self, id: &str, mime_type: &str, bytes: Bytes) -> FileId {
        let file_id = FileId::new(id);
        self.state.lock().files.insert(
            file_id.clone(),
            StoredFile {
                name: id.to_string(),
                mime_type: mime_type.to_string(),
                bytes,
                parent: FolderId::root(),
                public: false,
            },
        );
        file_id
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    /// Live (non-trashed) folders named `name` under `parent`
    pub fn folders_named(&self, name: &str, parent: &FolderId) -> Vec<FolderRecord> {
        self.state
            .lock()
            .folders
            .iter()
            .filter(|f| !f.trashed && f.name == name && &f.parent == parent)
            .cloned()
            .collect()
    }

    pub fn folder_count(&self) -> usize {
        self.state.lock().folders.len()
    }

    pub fn file(&self, id: &FileId) -> Option<StoredFile> {
        self.state.lock().files.get(id).cloned()
    }

    fn enter(&self, op: StoreOp, credential: &AccessCredential) -> DriveResult<()> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if state.revoked.contains(credential.secret()) {
            return Err(DriveError::status(401, "Invalid Credentials"));
        }
        if let Some((status, message)) = state.failures.get(&op) {
            return Err(DriveError::status(*status, message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn find_folder(
        &self,
        credential: &AccessCredential,
        name: &str,
        parent: &FolderId,
    ) -> DriveResult<Option<FolderId>> {
        self.enter(StoreOp::FindFolder, credential)?;
        Ok(self.folders_named(name, parent).into_iter().next().map(|f| f.id))
    }

    async fn create_folder(
        &self,
        credential: &AccessCredential,
        name: &str,
        parent: &FolderId,
    ) -> DriveResult<FolderId> {
        self.enter(StoreOp::CreateFolder, credential)?;
        Ok(self.insert_folder(name, parent, false))
    }

    async fn upload_file(
        &self,
        credential: &AccessCredential,
        file: &LocalFile,
        parent: &FolderId,
    ) -> DriveResult<FileId> {
        self.enter(StoreOp::Upload, credential)?;
        let id = FileId::new(format!("file-{}", Uuid::new_v4().simple()));
        self.state.lock().files.insert(
            id.clone(),
            StoredFile {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
                bytes: file.bytes.clone(),
                parent: parent.clone(),
                public: false,
            },
        );
        Ok(id)
    }

    async fn share_publicly(
        &self,
        credential: &AccessCredential,
        file_id: &FileId,
    ) -> DriveResult<()> {
        self.enter(StoreOp::Share, credential)?;
        let mut state = self.state.lock();
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| DriveError::status(404, format!("File not found: {}", file_id)))?;
        file.public = true;
        Ok(())
    }

    async fn download(&self, credential: &AccessCredential, file_id: &FileId) -> DriveResult<Bytes> {
        self.enter(StoreOp::Download, credential)?;
        self.state
            .lock()
            .files
            .get(file_id)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| DriveError::status(404, format!("File not found: {}", file_id)))
    }
}
