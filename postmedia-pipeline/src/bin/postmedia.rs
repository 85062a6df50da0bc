use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use postmedia_cache::{is_object_url, BlobCache};
use postmedia_drive::{
    Authorizer, CredentialProvider, CredentialStore, FileId, LocalFile, StaticAuthorizer,
};
use postmedia_pipeline::{telemetry, MediaPipeline, NoopObserver, PipelineConfig};
use tracing::{info, warn};

const ACCESS_TOKEN_VAR: &str = "POSTMEDIA_ACCESS_TOKEN";

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload and fetch media for scheduled posts", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files into the dated media folder
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Resolve a stored file to something displayable
    Show {
        file_id: String,

        /// MIME type recorded with the post
        #[arg(long, default_value = "image/jpeg")]
        mime: String,

        /// Write the fetched bytes here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Manage the local media cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Drop every cached file
    Clear,

    /// Drop one cached file
    Delete { file_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    telemetry::init_tracing();
    let args = Args::parse();

    let config = PipelineConfig::from_env()?;
    let provider: Arc<CredentialStore> = Arc::new(CredentialStore::new(authorizer()?));
    let pipeline = MediaPipeline::from_config(config, provider.clone())?;

    match args.command {
        Command::Upload { paths } => upload(&pipeline, &paths).await,
        Command::Show { file_id, mime, out } => {
            show(&pipeline, provider.as_ref(), &file_id, &mime, out).await
        }
        Command::Cache { action } => {
            match action {
                CacheAction::Clear => {
                    pipeline.cache().clear().await;
                    info!("Cache cleared");
                }
                CacheAction::Delete { file_id } => {
                    pipeline.cache().delete(&file_id).await;
                    info!("Removed {} from cache", file_id);
                }
            }
            Ok(())
        }
    }
}

async fn upload(pipeline: &MediaPipeline, paths: &[PathBuf]) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = LocalFile::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        files.push(file);
    }

    let outcomes = pipeline.workflow().run_batch(&files).await;
    let reports: Vec<_> = outcomes.iter().map(|o| o.report()).collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);

    if outcomes.iter().any(|o| o.needs_reauth()) {
        warn!("Some uploads need a new access token in {}", ACCESS_TOKEN_VAR);
    }
    Ok(())
}

async fn show(
    pipeline: &MediaPipeline,
    provider: &CredentialStore,
    file_id: &str,
    mime: &str,
    out: Option<PathBuf>,
) -> Result<()> {
    let credential = match provider.current() {
        Some(credential) => Some(credential),
        None => provider.request_credential().await.ok(),
    };

    let file_id = FileId::new(file_id);
    let url = pipeline
        .loader()
        .load(&file_id, credential.as_ref(), mime, &NoopObserver)
        .await
        .with_context(|| format!("could not load {}", file_id))?;

    println!("{}", url);

    if let Some(out) = out {
        if !is_object_url(&url) {
            warn!("{} is not stored locally, nothing written", url);
            return Ok(());
        }
        let entry = pipeline
            .registry()
            .resolve(&url)
            .context("object URL released before it was read")?;
        tokio::fs::write(&out, &entry.bytes)
            .await
            .with_context(|| format!("writing {}", out.display()))?;
        pipeline.registry().release(&url);
        info!("Wrote {} bytes to {}", entry.bytes.len(), out.display());
    }
    Ok(())
}

#[cfg(feature = "oauth2-client")]
fn authorizer() -> Result<Arc<dyn Authorizer>> {
    use postmedia_drive::OAuth2Authorizer;

    let (Ok(client_id), Ok(client_secret)) = (
        std::env::var("POSTMEDIA_OAUTH_CLIENT_ID"),
        std::env::var("POSTMEDIA_OAUTH_CLIENT_SECRET"),
    ) else {
        return Ok(Arc::new(StaticAuthorizer::from_env(ACCESS_TOKEN_VAR)));
    };

    let redirect = std::env::var("POSTMEDIA_OAUTH_REDIRECT_URI")
        .unwrap_or_else(|_| "http://localhost:8080/oauth/callback".to_string());
    let mut authorizer = OAuth2Authorizer::google(client_id, client_secret, redirect)?;
    if let Ok(refresh_token) = std::env::var("POSTMEDIA_OAUTH_REFRESH_TOKEN") {
        authorizer = authorizer.with_refresh_token(refresh_token);
    }
    Ok(Arc::new(authorizer))
}

#[cfg(not(feature = "oauth2-client"))]
fn authorizer() -> Result<Arc<dyn Authorizer>> {
    Ok(Arc::new(StaticAuthorizer::from_env(ACCESS_TOKEN_VAR)))
}
