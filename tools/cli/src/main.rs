//! driveocr CLI - image to text through Google Drive.
//!
//! `serve` runs the upload web front end, `auth` performs the one-time
//! Google authorization, and `convert` extracts text from every image in a
//! local directory.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use driveocr_ocr::{
    BatchEntry, BatchOrchestrator, ConversionPipeline, PipelineConfig, RetryConfig, Submission,
};
use driveocr_server::{AppState, ServerConfig};
use driveocr_storage::gdrive::AuthConfig;
use driveocr_storage::{
    Authenticator, Credential, CredentialManager, CredentialSource, DriveClientConfig, DriveDocumentService,
    GoogleOAuth, TokenStore,
};

/// Extensions picked up by `convert`.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff"];

#[derive(Parser)]
#[command(name = "driveocr")]
#[command(about = "driveocr - Extract text from images with Google Drive")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Deployment settings, each overridable from the environment or `.env`.
#[derive(Args, Debug, Clone)]
struct Settings {
    /// Directory for temporary uploads and result files.
    #[arg(long, env = "UPLOAD_FOLDER", default_value = "uploads", global = true)]
    upload_folder: PathBuf,

    /// Maximum request body size in bytes.
    #[arg(long, env = "MAX_CONTENT_LENGTH", default_value_t = driveocr_server::DEFAULT_MAX_CONTENT_LENGTH, global = true)]
    max_content_length: usize,

    /// Google OAuth client-secret file.
    #[arg(long, env = "GOOGLE_CREDENTIALS_PATH", default_value = "credentials/client_secret.json", global = true)]
    credentials_path: PathBuf,

    /// Inline client-secret JSON; takes precedence over the file.
    #[arg(long, env = "GOOGLE_CREDENTIALS_JSON", hide_env_values = true, global = true)]
    credentials_json: Option<String>,

    /// Where the authorized token is kept.
    #[arg(long, env = "TOKEN_PATH", default_value = "token.json", global = true)]
    token_path: PathBuf,

    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0", global = true)]
    host: String,

    /// Port to bind.
    #[arg(long, env = "PORT", default_value_t = 5000, global = true)]
    port: u16,

    /// MIME type sent with every upload.
    #[arg(long, env = "UPLOAD_MIME_TYPE", default_value = "image/jpeg", global = true)]
    upload_mime_type: String,

    /// Seconds to wait for the browser authorization.
    #[arg(long, env = "AUTH_TIMEOUT_SECS", default_value_t = 300, global = true)]
    auth_timeout_secs: u64,

    /// Loopback port for the authorization callback (0 picks a free one).
    #[arg(long, env = "OAUTH_CALLBACK_PORT", default_value_t = 0, global = true)]
    oauth_callback_port: u16,

    /// Timeout for each Drive request, in seconds.
    #[arg(long, env = "DRIVE_TIMEOUT_SECS", default_value_t = 120, global = true)]
    drive_timeout_secs: u64,

    /// Retries when deleting the temporary Drive document fails.
    #[arg(long, env = "DELETE_RETRIES", default_value_t = 2, global = true)]
    delete_retries: u32,

    /// Print the authorization URL instead of opening a browser.
    #[arg(long, global = true)]
    no_browser: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the upload web server.
    Serve,

    /// Authorize with Google and store the token.
    Auth,

    /// Extract text from every image in a directory.
    Convert {
        /// Directory containing the images.
        dir: PathBuf,

        /// Directory for the result file (default: the upload folder).
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    bootstrap_directories(&cli.settings)
        .await
        .context("Failed to create required directories")?;

    match cli.command {
        Commands::Serve => cmd_serve(&cli.settings).await,
        Commands::Auth => cmd_auth(&cli.settings).await,
        Commands::Convert { dir, output_dir } => {
            cmd_convert(&cli.settings, &dir, output_dir.as_deref()).await
        }
    }
}

impl Settings {
    /// The credential manager and the token that aborts its browser handshake.
    fn credential_manager(&self) -> Result<(Arc<CredentialManager>, CancellationToken)> {
        let oauth = GoogleOAuth::new(AuthConfig {
            callback_port: self.oauth_callback_port,
            timeout: Duration::from_secs(self.auth_timeout_secs),
            open_browser: !self.no_browser,
            ..AuthConfig::default()
        })
        .context("Failed to set up OAuth client")?;
        let cancel = oauth.cancellation_token();

        let source = CredentialSource::new(
            Some(self.credentials_path.clone()),
            self.credentials_json.clone(),
        );

        let manager = Arc::new(CredentialManager::new(Authenticator::new(
            TokenStore::new(&self.token_path),
            source,
            Arc::new(oauth),
        )));

        Ok((manager, cancel))
    }

    fn orchestrator(
        &self,
        credentials: Arc<CredentialManager>,
        work_dir: &Path,
    ) -> Result<BatchOrchestrator> {
        let service = DriveDocumentService::new(DriveClientConfig {
            timeout: Duration::from_secs(self.drive_timeout_secs),
            ..DriveClientConfig::default()
        })
        .context("Failed to create Drive client")?;

        let pipeline = ConversionPipeline::new(
            Arc::new(service),
            PipelineConfig {
                upload_mime_type: self.upload_mime_type.clone(),
                delete_retry: RetryConfig::new(self.delete_retries),
            },
        );

        Ok(BatchOrchestrator::new(pipeline, credentials, work_dir))
    }
}

/// Create the upload folder and the parents of the credential and token files.
async fn bootstrap_directories(settings: &Settings) -> Result<()> {
    tokio::fs::create_dir_all(&settings.upload_folder)
        .await
        .with_context(|| format!("Cannot create {}", settings.upload_folder.display()))?;

    for file in [&settings.credentials_path, &settings.token_path] {
        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
    }

    Ok(())
}

/// Obtain a credential, letting Ctrl-C abort a pending browser handshake.
async fn authenticate(
    credentials: &CredentialManager,
    cancel: &CancellationToken,
) -> driveocr_common::Result<Credential> {
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, abandoning authorization");
                cancel.cancel();
            }
        }
    });

    let result = credentials.get().await;
    watcher.abort();
    result
}

/// Authorize up front, then serve.
async fn cmd_serve(settings: &Settings) -> Result<()> {
    let (credentials, cancel) = settings.credential_manager()?;
    authenticate(&credentials, &cancel)
        .await
        .context("Failed to obtain Google credentials")?;

    let orchestrator = settings.orchestrator(credentials, &settings.upload_folder)?;
    let config = ServerConfig {
        host: settings.host.clone(),
        port: settings.port,
        max_content_length: settings.max_content_length,
    };

    info!("Upload folder: {}", settings.upload_folder.display());
    info!("Max content length: {} bytes", config.max_content_length);

    driveocr_server::serve(&config, AppState::new(orchestrator))
        .await
        .context("Server error")?;

    Ok(())
}

async fn cmd_auth(settings: &Settings) -> Result<()> {
    let (credentials, cancel) = settings.credential_manager()?;
    let credential = authenticate(&credentials, &cancel)
        .await
        .context("Authorization failed")?;

    println!("Authorized successfully!");
    println!(
        "  Token: {}",
        credentials.authenticator().store().path().display()
    );
    if let Some(expires_at) = credential.expires_at {
        println!("  Expires: {}", expires_at);
    }
    println!("  Refreshable: {}", credential.can_refresh());

    Ok(())
}

async fn cmd_convert(settings: &Settings, dir: &Path, output_dir: Option<&Path>) -> Result<()> {
    let images = collect_images(dir)
        .await
        .with_context(|| format!("Failed to read {}", dir.display()))?;

    if images.is_empty() {
        warn!("No images found in {}", dir.display());
        return Ok(());
    }

    let work_dir = output_dir.unwrap_or(&settings.upload_folder);
    tokio::fs::create_dir_all(work_dir)
        .await
        .with_context(|| format!("Cannot create {}", work_dir.display()))?;

    let mut files = Vec::with_capacity(images.len());
    for path in &images {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.push(Submission::new(filename, data));
    }

    let (credentials, cancel) = settings.credential_manager()?;
    authenticate(&credentials, &cancel)
        .await
        .context("Failed to obtain Google credentials")?;

    let orchestrator = settings.orchestrator(credentials, work_dir)?;
    let result = orchestrator
        .run_batch(files)
        .await
        .context("Failed to obtain Google credentials")?;

    for entry in result.file_entries() {
        match entry {
            BatchEntry::Converted { filename, text, .. } => {
                println!("Processed {} ({} chars)", filename, text.chars().count())
            }
            BatchEntry::Failed { filename, error, .. } => {
                println!("Failed to process {}: {}", filename, error)
            }
            BatchEntry::Output { .. } => {}
        }
    }

    println!(
        "\nExtraction complete: {} succeeded, {} failed",
        result.succeeded(),
        result.failed()
    );
    println!("  Output: {}", result.output_path.display());

    Ok(())
}

/// Image files directly inside `dir`, sorted by name.
async fn collect_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }

        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);

        if is_image {
            images.push(path);
        }
    }

    images.sort();
    Ok(images)
}
