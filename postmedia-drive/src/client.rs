use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::FOLDER_MIME_TYPE;
use crate::{AccessCredential, DriveConfig, DriveError, DriveResult, FileId, FolderId, LocalFile};

/// Remote object store primitives used by the pipeline
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Find a non-trashed folder with exactly this name under `parent`
    async fn find_folder(
        &self,
        credential: &AccessCredential,
        name: &str,
        parent: &FolderId,
    ) -> DriveResult<Option<FolderId>>;

    /// Create a folder under `parent`
    async fn create_folder(
        &self,
        credential: &AccessCredential,
        name: &str,
        parent: &FolderId,
    ) -> DriveResult<FolderId>;

    /// Upload a file's bytes under `parent`
    async fn upload_file(
        &self,
        credential: &AccessCredential,
        file: &LocalFile,
        parent: &FolderId,
    ) -> DriveResult<FileId>;

    /// Grant read access to anyone holding the link
    async fn share_publicly(&self, credential: &AccessCredential, file_id: &FileId)
        -> DriveResult<()>;

    /// Fetch a file's content
    async fn download(&self, credential: &AccessCredential, file_id: &FileId) -> DriveResult<Bytes>;
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileRef>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// JSON-over-HTTPS client for the remote store
#[derive(Debug, Clone)]
pub struct DriveClient {
    http: reqwest::Client,
    config: DriveConfig,
}

impl DriveClient {
    pub fn new(config: DriveConfig) -> DriveResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            config,
        })
    }

    /// Reuse an existing HTTP client
    pub fn with_http_client(http: reqwest::Client, config: DriveConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.config.api_base)
    }
}

/// Quote a value for use inside a search query string literal
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn folder_query(name: &str, parent: &FolderId) -> String {
    format!(
        "name = '{}' and mimeType = '{}' and '{}' in parents and trashed = false",
        escape_query_value(name),
        FOLDER_MIME_TYPE,
        escape_query_value(parent.as_str())
    )
}

/// Turn a non-2xx response into a [`DriveError::Status`], keeping the
/// store's `{error:{message}}` text when present.
async fn ensure_success(response: Response) -> DriveResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| fallback_message(status, &body));

    Err(DriveError::status(status.as_u16(), message))
}

fn fallback_message(status: StatusCode, body: &str) -> String {
    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.trim().to_string()
    }
}

/// Build a `multipart/related` body: JSON metadata part then media part.
fn multipart_related(boundary: &str, metadata: &serde_json::Value, file: &LocalFile) -> Bytes {
    let mut body = BytesMut::with_capacity(file.bytes.len() + 512);
    body.put_slice(format!("--{}\r\n", boundary).as_bytes());
    body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.put_slice(metadata.to_string().as_bytes());
    body.put_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.put_slice(format!("Content-Type: {}\r\n\r\n", file.mime_type).as_bytes());
    body.put_slice(&file.bytes);
    body.put_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body.freeze()
}

#[async_trait]
impl RemoteStore for DriveClient {
    #[instrument(skip(self, credential))]
    async fn find_folder(
        &self,
        credential: &AccessCredential,
        name: &str,
        parent: &FolderId,
    ) -> DriveResult<Option<FolderId>> {
        let query = folder_query(name, parent);
        let response = self
            .http
            .get(self.files_url())
            .bearer_auth(credential.secret())
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id, name)"),
                ("spaces", "drive"),
            ])
            .send()
            .await?;
        let list: FileList = ensure_success(response).await?.json().await?;

        Ok(list.files.into_iter().next().map(|f| FolderId::new(f.id)))
    }

    #[instrument(skip(self, credential))]
    async fn create_folder(
        &self,
        credential: &AccessCredential,
        name: &str,
        parent: &FolderId,
    ) -> DriveResult<FolderId> {
        let metadata = json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent.as_str()],
        });
        let response = self
            .http
            .post(self.files_url())
            .bearer_auth(credential.secret())
            .query(&[("fields", "id")])
            .json(&metadata)
            .send()
            .await?;
        let created: FileRef = ensure_success(response).await?.json().await?;

        debug!("Created folder {} ({})", name, created.id);
        Ok(FolderId::new(created.id))
    }

    #[instrument(skip(self, credential, file), fields(name = %file.name, size = file.size()))]
    async fn upload_file(
        &self,
        credential: &AccessCredential,
        file: &LocalFile,
        parent: &FolderId,
    ) -> DriveResult<FileId> {
        let boundary = format!("postmedia-{}", Uuid::new_v4().simple());
        let metadata = json!({
            "name": file.name,
            "mimeType": file.mime_type,
            "parents": [parent.as_str()],
        });
        let body = multipart_related(&boundary, &metadata, file);

        let response = self
            .http
            .post(format!("{}/files", self.config.upload_base))
            .bearer_auth(credential.secret())
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;
        let uploaded: FileRef = ensure_success(response).await?.json().await?;

        Ok(FileId::new(uploaded.id))
    }

    #[instrument(skip(self, credential))]
    async fn share_publicly(
        &self,
        credential: &AccessCredential,
        file_id: &FileId,
    ) -> DriveResult<()> {
        let response = self
            .http
            .post(format!("{}/{}/permissions", self.files_url(), file_id))
            .bearer_auth(credential.secret())
            .json(&json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    #[instrument(skip(self, credential))]
    async fn download(&self, credential: &AccessCredential, file_id: &FileId) -> DriveResult<Bytes> {
        let response = self
            .http
            .get(format!("{}/{}", self.files_url(), file_id))
            .bearer_auth(credential.secret())
            .query(&[("alt", "media")])
            .send()
            .await?;
        Ok(ensure_success(response).await?.bytes().await?)
    }
}
