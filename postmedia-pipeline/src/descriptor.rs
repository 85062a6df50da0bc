use postmedia_cache::{BlobUrlManager, ObjectUrlRegistry};
use postmedia_drive::{FileId, LocalFile, UploadReceipt};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

/// Per-item media state held by a post form.
///
/// Created either from a freshly selected local file (no remote id yet) or
/// from stored post metadata (remote id, nothing displayable yet), then
/// updated in place as loading or uploading progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Local content, present only until uploaded
    pub file: Option<LocalFile>,
    pub file_name: String,
    pub file_id: Option<FileId>,
    pub mime_type: String,
    pub display_url: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
    local_key: String,
}

/// Media entry as stored in post metadata
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMediaRecord {
    file_id: String,
    #[serde(default)]
    file_name: String,
    mime_type: String,
}

impl MediaDescriptor {
    pub fn from_local(file: LocalFile) -> Self {
        Self {
            file_name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            file: Some(file),
            file_id: None,
            display_url: None,
            is_loading: false,
            error: None,
            local_key: format!("local:{}", Uuid::new_v4().simple()),
        }
    }

    pub fn from_remote<N, M>(file_name: N, file_id: FileId, mime_type: M) -> Self
    where
        N: Into<String>,
        M: Into<String>,
    {
        Self {
            file: None,
            file_name: file_name.into(),
            file_id: Some(file_id),
            mime_type: mime_type.into(),
            display_url: None,
            is_loading: false,
            error: None,
            local_key: format!("local:{}", Uuid::new_v4().simple()),
        }
    }

    /// Parse the media list stored with a post.
    ///
    /// Malformed entries are logged and skipped; they never abort the batch.
    pub fn parse_post_media(json: &str) -> Vec<Self> {
        let items = match serde_json::from_str::<serde_json::Value>(json) {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(serde_json::Value::Null) => return Vec::new(),
            Ok(other) => {
                warn!("Post media metadata is not a list: {}", other);
                return Vec::new();
            }
            Err(e) => {
                warn!("Unparseable post media metadata: {}", e);
                return Vec::new();
            }
        };

        items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| {
                match serde_json::from_value::<PostMediaRecord>(item) {
                    Ok(record) if !record.file_id.trim().is_empty() => Some(Self::from_remote(
                        record.file_name,
                        FileId::new(record.file_id),
                        record.mime_type,
                    )),
                    Ok(_) => {
                        warn!("Skipping media entry {} without a file id", index);
                        None
                    }
                    Err(e) => {
                        warn!("Skipping malformed media entry {}: {}", index, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Key this item's object URL is tracked under
    pub fn url_key(&self) -> &str {
        match &self.file_id {
            Some(id) => id.as_str(),
            None => &self.local_key,
        }
    }

    pub fn needs_upload(&self) -> bool {
        self.file_id.is_none() && self.file.is_some()
    }

    pub fn begin_loading(&mut self) {
        self.is_loading = true;
        self.error = None;
    }

    pub fn mark_loaded<S: Into<String>>(&mut self, url: S) {
        self.display_url = Some(url.into());
        self.is_loading = false;
        self.error = None;
    }

    pub fn mark_failed<S: Into<String>>(&mut self, error: S) {
        self.is_loading = false;
        self.error = Some(error.into());
    }

    /// Record a finished upload.
    ///
    /// The local bytes are dropped and the local preview URL is released, so
    /// the item is from now on tracked under its file id only. Without a
    /// public link the item has no display URL until it is loaded again.
    pub fn mark_uploaded(&mut self, receipt: &UploadReceipt, urls: &mut BlobUrlManager) {
        urls.release_url(&self.local_key);
        self.file = None;
        self.file_id = Some(receipt.file_id.clone());
        self.file_name = receipt.file_name.clone();
        self.mime_type = receipt.mime_type.clone();
        self.display_url = receipt.display_url.clone();
        self.is_loading = false;
        self.error = None;
    }

    /// Show the not-yet-uploaded local file through an object URL.
    pub fn preview(
        &mut self,
        registry: &ObjectUrlRegistry,
        urls: &mut BlobUrlManager,
    ) -> Option<String> {
        let file = self.file.as_ref()?;
        let url = registry.create(file.bytes.clone(), file.mime_type.clone());
        urls.add_url(self.local_key.clone(), url.clone());
        self.display_url = Some(url.clone());
        Some(url)
    }
}
