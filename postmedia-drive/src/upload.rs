use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{AccessCredential, DriveConfig, DriveResult, FileId, FolderId, LocalFile, RemoteStore};

/// Outcome of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub file_id: FileId,
    /// Public display link. `None` when the file is not an image or when
    /// sharing it failed; the upload itself still succeeded.
    #[serde(rename = "imageUrl")]
    pub display_url: Option<String>,
    pub file_name: String,
    pub mime_type: String,
}

/// Uploads one file and, for images, publishes a display link.
#[derive(Clone)]
pub struct UploadExecutor {
    store: Arc<dyn RemoteStore>,
    config: DriveConfig,
}

impl UploadExecutor {
    pub fn new(store: Arc<dyn RemoteStore>, config: DriveConfig) -> Self {
        Self { store, config }
    }

    /// Upload `file` into `folder`.
    ///
    /// Only the upload call can fail the operation. Sharing an image is best
    /// effort: a failure is logged and leaves `display_url` unset.
    #[instrument(skip(self, file, credential), fields(name = %file.name, mime = %file.mime_type))]
    pub async fn upload(
        &self,
        file: &LocalFile,
        credential: &AccessCredential,
        folder: &FolderId,
    ) -> DriveResult<UploadReceipt> {
        let file_id = self.store.upload_file(credential, file, folder).await?;
        info!("Uploaded {} as {}", file.name, file_id);

        let display_url = if file.is_image() {
            match self.store.share_publicly(credential, &file_id).await {
                Ok(()) => Some(self.config.display_url(file_id.as_str())),
                Err(e) => {
                    warn!("Could not share {} publicly: {}", file_id, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(UploadReceipt {
            file_id,
            display_url,
            file_name: file.name.clone(),
            mime_type: file.mime_type.clone(),
        })
    }
}
