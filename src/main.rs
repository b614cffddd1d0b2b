//! b2-uploadr - Resumable multipart uploads to Backblaze B2
//!
//! Uploads one file, or stdin, and reports progress as it goes.

use anyhow::{bail, Context};
use b2_uploadr::b2::{B2Client, B2ClientConfig};
use b2_uploadr::config::Config;
use b2_uploadr::upload::{UploadMetadata, UploadOptions, UploadParams};
use b2_uploadr::{logging, metrics, Upload, UploadEvent, UploadSource};
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// b2-uploadr - Upload a file to Backblaze B2
#[derive(Parser, Debug)]
#[command(name = "b2-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overrides the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    /// File to upload, or `-` for stdin
    file: String,

    /// File name in the bucket
    #[arg(short, long)]
    key: String,

    /// Target bucket id, overrides b2.bucket_id
    #[arg(long)]
    bucket_id: Option<String>,

    /// Content type (B2 detects it from the name when omitted)
    #[arg(long)]
    content_type: Option<String>,

    /// Content-Disposition served on download
    #[arg(long)]
    content_disposition: Option<String>,

    /// Custom file info, repeatable
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
    meta: Vec<(String, String)>,
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Config::default(),
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    logging::init_subscriber(&config.logging)?;

    info!("Starting b2-uploadr v{}", b2_uploadr::VERSION);

    let body = if args.file == "-" {
        UploadSource::reader(tokio::io::stdin())
    } else {
        let path = Path::new(&args.file);
        if !path.is_file() {
            bail!("File not found: {}", args.file);
        }
        UploadSource::file(path)
    };

    let bucket = args
        .bucket_id
        .clone()
        .or_else(|| config.b2.bucket_id.clone())
        .filter(|id| !id.is_empty() && !id.starts_with("${"))
        .context("No bucket id: pass --bucket-id or set b2.bucket_id")?;

    let client = B2Client::new(B2ClientConfig::from_config(&config.b2)?)?;

    let metadata = UploadMetadata {
        mime_type: args.content_type.clone(),
        content_disposition: args.content_disposition.clone(),
        custom_metadata: args.meta.iter().cloned().collect::<HashMap<_, _>>(),
    };
    let upload = Upload::new(
        Arc::new(client),
        UploadParams {
            bucket,
            key: args.key.clone(),
            body,
            metadata,
        },
        UploadOptions::from(&config.upload),
    );

    info!(
        key = %upload.key(),
        total_bytes = ?upload.total_bytes(),
        part_size = upload.part_size(),
        "Uploading"
    );

    let mut events = upload.subscribe();
    let reporter = tokio::spawn(async move {
        let mut last_percent = 0;
        while let Some(event) = events.recv().await {
            match event {
                UploadEvent::StateChanged(snapshot) => {
                    info!(state = %snapshot.state, uploaded_bytes = snapshot.uploaded_bytes, "State changed");
                }
                UploadEvent::Progress(snapshot) => match snapshot.total_bytes {
                    Some(total) if total > 0 => {
                        let percent = snapshot.uploaded_bytes * 100 / total;
                        if percent >= last_percent + 10 || (percent == 100 && last_percent < 100) {
                            last_percent = percent;
                            info!(percent = percent, uploaded_bytes = snapshot.uploaded_bytes, "Progress");
                        }
                    }
                    _ => debug!(uploaded_bytes = snapshot.uploaded_bytes, "Progress"),
                },
                UploadEvent::Failed(err) => {
                    error!(error = %err, kind = err.kind().as_str(), "Upload failed");
                }
            }
        }
    });

    upload.start();
    let outcome = tokio::select! {
        result = upload.wait() => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, canceling upload");
            upload.cancel();
            upload.wait().await
        }
    };
    reporter.abort();

    if config.metrics.enabled {
        print!("{}", metrics::gather_text());
    }

    match outcome {
        Ok(()) => {
            info!(
                key = %upload.key(),
                bytes = upload.uploaded_bytes(),
                file_id = ?upload.file_id(),
                "Upload complete"
            );
            Ok(())
        }
        Err(err) => bail!("Upload failed: {}", err),
    }
}
