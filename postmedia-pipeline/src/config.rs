//! Pipeline configuration.
//!
//! Built with `Default` plus `with_*` setters, or from `POSTMEDIA_*`
//! environment variables:
//!
//! ```bash
//! export POSTMEDIA_ROOT_FOLDER=X_Post_MediaFiles
//! export POSTMEDIA_ALLOWED_MIME=image/,video/
//! export POSTMEDIA_CACHE_PATH=/var/lib/postmedia/cache.redb
//! export POSTMEDIA_REQUEST_TIMEOUT_SECS=30
//! ```

use std::path::PathBuf;
use std::time::Duration;

use postmedia_drive::DriveConfig;

use crate::{PipelineError, PipelineResult};

pub const ENV_PREFIX: &str = "POSTMEDIA_";

/// Top-level folder every upload lands under
pub const DEFAULT_ROOT_FOLDER: &str = "X_Post_MediaFiles";

/// Displayed in place of videos, which are never fetched
pub const DEFAULT_VIDEO_PLACEHOLDER: &str = "https://placehold.co/600x400?text=Video";

pub const DEFAULT_CACHE_PATH: &str = "postmedia-cache.redb";

/// Which MIME types may be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPolicy {
    /// Accepted MIME prefixes, e.g. `image/`
    pub allowed_prefixes: Vec<String>,
}

impl Default for MediaPolicy {
    fn default() -> Self {
        Self {
            allowed_prefixes: vec!["image/".to_string(), "video/".to_string()],
        }
    }
}

impl MediaPolicy {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.allowed_prefixes.push(prefix.into());
        self
    }

    pub fn permits(&self, mime_type: &str) -> bool {
        self.allowed_prefixes
            .iter()
            .any(|prefix| mime_type.starts_with(prefix.as_str()))
    }
}

/// Configuration for the upload workflow and media loader
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// First segment of every upload folder path (`root/YYYY/MM`)
    pub root_folder_name: String,

    /// Reference reported for video media instead of fetching it
    pub video_placeholder_url: String,

    pub media_policy: MediaPolicy,

    /// Location of the persistent blob cache
    pub cache_path: PathBuf,

    /// Remote store endpoints
    pub drive: DriveConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root_folder_name: DEFAULT_ROOT_FOLDER.to_string(),
            video_placeholder_url: DEFAULT_VIDEO_PLACEHOLDER.to_string(),
            media_policy: MediaPolicy::default(),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            drive: DriveConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `POSTMEDIA_*` environment variables
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overridden by any `POSTMEDIA_*` pairs in `vars`
    pub fn from_vars<I, K, V>(vars: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value: String = value.into();

            match name {
                "ROOT_FOLDER" => config.root_folder_name = value,
                "VIDEO_PLACEHOLDER" => config.video_placeholder_url = value,
                "CACHE_PATH" => config.cache_path = PathBuf::from(value),
                "ALLOWED_MIME" => {
                    config.media_policy = MediaPolicy::new(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(str::to_string),
                    )
                }
                "API_BASE" => config.drive.api_base = value,
                "UPLOAD_BASE" => config.drive.upload_base = value,
                "DISPLAY_BASE" => config.drive.display_base = value,
                "REQUEST_TIMEOUT_SECS" => {
                    let secs = value.trim().parse::<u64>().map_err(|e| {
                        PipelineError::config(key.as_ref(), format!("{} ({})", e, value))
                    })?;
                    config.drive.request_timeout = Some(Duration::from_secs(secs));
                }
                _ => {}
            }
        }

        if config.root_folder_name.trim().is_empty() {
            return Err(PipelineError::config(
                "POSTMEDIA_ROOT_FOLDER",
                "root folder name must not be empty",
            ));
        }

        Ok(config)
    }

    pub fn with_root_folder<S: Into<String>>(mut self, name: S) -> Self {
        self.root_folder_name = name.into();
        self
    }

    pub fn with_video_placeholder<S: Into<String>>(mut self, url: S) -> Self {
        self.video_placeholder_url = url.into();
        self
    }

    pub fn with_media_policy(mut self, policy: MediaPolicy) -> Self {
        self.media_policy = policy;
        self
    }

    pub fn with_cache_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_path = path.into();
        self
    }

    pub fn with_drive(mut self, drive: DriveConfig) -> Self {
        self.drive = drive;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_images_and_videos() {
        let policy = MediaPolicy::default();
        assert!(policy.permits("image/jpeg"));
        assert!(policy.permits("video/mp4"));
        assert!(!policy.permits("application/pdf"));
        assert!(policy.clone().with_prefix("application/pdf").permits("application/pdf"));
    }

    #[test]
    fn test_from_vars_overrides() {
        let config = PipelineConfig::from_vars([
            ("POSTMEDIA_ROOT_FOLDER", "Scheduled"),
            ("POSTMEDIA_ALLOWED_MIME", "image/, audio/ ,"),
            ("POSTMEDIA_REQUEST_TIMEOUT_SECS", "15"),
            ("POSTMEDIA_API_BASE", "http://localhost:9000/drive/v3"),
            ("UNRELATED", "ignored"),
        ])
        .unwrap();

        assert_eq!(config.root_folder_name, "Scheduled");
        assert_eq!(config.media_policy, MediaPolicy::new(["image/", "audio/"]));
        assert_eq!(config.drive.request_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.drive.api_base, "http://localhost:9000/drive/v3");
        assert_eq!(config.video_placeholder_url, DEFAULT_VIDEO_PLACEHOLDER);
    }

    #[test]
    fn test_from_vars_rejects_bad_timeout() {
        let err = PipelineConfig::from_vars([("POSTMEDIA_REQUEST_TIMEOUT_SECS", "soon")])
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    #[test]
    fn test_from_vars_rejects_empty_root() {
        assert!(PipelineConfig::from_vars([("POSTMEDIA_ROOT_FOLDER", " ")]).is_err());
    }
}
