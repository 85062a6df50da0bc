use std::time::Duration;

/// Default metadata API base
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Default media upload API base
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Default base of public display links
pub const DEFAULT_DISPLAY_BASE: &str = "https://drive.google.com/uc";

/// Mime type the store uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Endpoints and transport settings for [`DriveClient`](crate::DriveClient)
#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// Base URL for metadata calls (search, create, permissions, download)
    pub api_base: String,

    /// Base URL for media uploads
    pub upload_base: String,

    /// Base of the public display link built after sharing an image
    pub display_base: String,

    /// Per-request timeout. `None` keeps the transport default.
    pub request_timeout: Option<Duration>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
            display_base: DEFAULT_DISPLAY_BASE.to_string(),
            request_timeout: None,
        }
    }
}

impl DriveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point both API bases at one host (used against local test servers)
    pub fn with_base_url<S: AsRef<str>>(mut self, base: S) -> Self {
        let base = base.as_ref().trim_end_matches('/');
        self.api_base = format!("{}/drive/v3", base);
        self.upload_base = format!("{}/upload/drive/v3", base);
        self
    }

    pub fn with_api_base<S: Into<String>>(mut self, base: S) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_upload_base<S: Into<String>>(mut self, base: S) -> Self {
        self.upload_base = base.into();
        self
    }

    pub fn with_display_base<S: Into<String>>(mut self, base: S) -> Self {
        self.display_base = base.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Public display link for an uploaded file
    pub fn display_url(&self, file_id: &str) -> String {
        format!("{}?export=view&id={}", self.display_base, file_id)
    }
}
