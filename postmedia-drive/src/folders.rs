use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{AccessCredential, DriveError, DriveResult, FolderId, FolderPath, RemoteStore};

/// Finds or creates a folder chain on the remote store.
///
/// Every level is searched before anything is created, so resolving the same
/// path repeatedly converges on the same folder without duplicates.
#[derive(Clone)]
pub struct FolderResolver {
    store: Arc<dyn RemoteStore>,
    root: FolderId,
}

impl FolderResolver {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            root: FolderId::root(),
        }
    }

    /// Start resolution somewhere other than the store's root
    pub fn with_root(mut self, root: FolderId) -> Self {
        self.root = root;
        self
    }

    /// Walk `path` from the root, returning the id of the last segment.
    ///
    /// The first failing call aborts resolution; its error is returned as is
    /// so callers can tell credential rejections from other failures.
    #[instrument(skip(self, credential), fields(path = %path))]
    pub async fn resolve_or_create(
        &self,
        path: &FolderPath,
        credential: &AccessCredential,
    ) -> DriveResult<FolderId> {
        let mut current = self.root.clone();

        for segment in path.segments() {
            if segment.trim().is_empty() {
                return Err(DriveError::invalid(format!(
                    "Empty folder name in path {}",
                    path
                )));
            }

            current = match self.store.find_folder(credential, segment, &current).await? {
                Some(existing) => existing,
                None => {
                    debug!("Folder {} missing under {}, creating", segment, current);
                    self.store.create_folder(credential, segment, &current).await?
                }
            };
        }

        Ok(current)
    }
}
