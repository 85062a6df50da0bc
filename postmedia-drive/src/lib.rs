//! # postmedia-drive: remote object store access
//!
//! Everything that talks to the remote store on behalf of the media
//! pipeline:
//!
//! - [`RemoteStore`]: the store primitives (folder search/create, upload,
//!   sharing, download), implemented over HTTPS by [`DriveClient`] and in
//!   memory by [`MemoryRemoteStore`].
//! - [`CredentialProvider`]: the bearer token holder, with
//!   [`CredentialStore`] as the default single-writer implementation.
//! - [`FolderResolver`]: idempotent find-or-create of a folder chain.
//! - [`UploadExecutor`]: upload plus best-effort public sharing of images.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ UploadExecutor   │  ← upload + share
//! │ FolderResolver   │  ← search-before-create
//! ├──────────────────┤
//! │ RemoteStore      │  ← wire primitives
//! └──────────────────┘
//! ```

pub mod auth;
mod client;
mod config;
mod error;
pub mod folders;
pub mod memory;
mod types;
pub mod upload;

#[cfg(feature = "oauth2-client")]
pub mod oauth2_client;

pub use auth::{AccessCredential, Authorizer, CredentialProvider, CredentialStore, StaticAuthorizer};
pub use client::{DriveClient, RemoteStore};
pub use config::{
    DriveConfig, DEFAULT_API_BASE, DEFAULT_DISPLAY_BASE, DEFAULT_UPLOAD_BASE, FOLDER_MIME_TYPE,
};
pub use error::{DriveError, DriveResult};
pub use folders::FolderResolver;
pub use memory::{MemoryRemoteStore, StoreOp};
pub use types::{is_image, is_video, FileId, FolderId, FolderPath, LocalFile};
pub use upload::{UploadExecutor, UploadReceipt};

#[cfg(feature = "oauth2-client")]
pub use oauth2_client::OAuth2Authorizer;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AccessCredential, CredentialProvider, DriveClient, DriveConfig, DriveError, DriveResult,
        FileId, FolderId, FolderPath, FolderResolver, LocalFile, RemoteStore, UploadExecutor,
        UploadReceipt,
    };
}
