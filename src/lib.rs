//! b2-uploadr Library
//!
//! Resumable, parallel multipart uploads to Backblaze B2.
//!
//! # Features
//!
//! - **Any Source**: buffers, text, byte arrays, streams, readers and files
//! - **Multipart**: large sources become B2 large files, uploaded in parallel
//! - **Resumable**: pause and resume without re-sending confirmed parts
//! - **Events**: state, progress and failure notifications in emission order
//!
//! # Example
//!
//! ```no_run
//! use b2_uploadr::b2::{B2Client, B2ClientConfig};
//! use b2_uploadr::config::Config;
//! use b2_uploadr::upload::{Upload, UploadMetadata, UploadOptions, UploadParams, UploadSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let client = B2Client::new(B2ClientConfig::from_config(&config.b2)?)?;
//!
//!     let upload = Upload::new(
//!         Arc::new(client),
//!         UploadParams {
//!             bucket: "4a48fe8875c6214145260818".into(),
//!             key: "backups/db.tar".into(),
//!             body: UploadSource::file("db.tar"),
//!             metadata: UploadMetadata::default(),
//!         },
//!         UploadOptions::from(&config.upload),
//!     );
//!     upload.start();
//!     upload.wait().await.map_err(|e| anyhow::anyhow!("{}", e))?;
//!     Ok(())
//! }
//! ```

pub mod b2;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use upload::{Upload, UploadError, UploadEvent, UploadSource, UploadState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
