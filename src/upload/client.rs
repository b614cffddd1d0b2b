//! Storage client seam
//!
//! The engine talks to object storage only through [`StorageClient`]. The
//! production implementation is [`crate::b2::B2Client`]; tests plug in fakes.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Storage client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("B2 API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Response error: {0}")]
    Response(String),

    #[error("Request aborted")]
    Aborted,
}

impl StorageError {
    /// Transport failures, timeouts, throttling and server errors are retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Request(_) => true,
            StorageError::Api { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StorageError::Response(err.to_string())
        } else {
            StorageError::Request(err.to_string())
        }
    }
}

/// Identifies the upload a request belongs to, echoed back on transfer ticks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTag {
    pub bucket: String,
    pub key: String,
    pub file_id: Option<String>,
    pub part_number: Option<u32>,
}

/// Byte-level progress of one in-flight request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTick {
    pub request_id: uuid::Uuid,
    pub tag: RequestTag,
    pub loaded: u64,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct StartLargeFileRequest {
    pub bucket: String,
    pub file_name: String,
    pub content_type: String,
    pub file_info: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartLargeFileResponse {
    pub file_id: String,
}

#[derive(Debug, Clone)]
pub struct UploadPartRequest {
    pub file_id: String,
    pub part_number: u32,
    pub content_length: u64,
    pub content_sha1: String,
    pub body: Bytes,
    pub tag: RequestTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPartResponse {
    pub file_id: String,
    pub part_number: u32,
    pub content_length: u64,
    /// `None` when neither the body nor the headers carried it
    pub content_sha1: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadFileRequest {
    pub bucket: String,
    pub file_name: String,
    pub content_type: String,
    pub content_length: u64,
    pub content_sha1: String,
    /// Already prefixed per the store's header convention
    pub custom_headers: HashMap<String, String>,
    pub body: Bytes,
    pub tag: RequestTag,
}

/// File description returned by whole-body uploads and large-file completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResponse {
    pub file_id: String,
    pub file_name: String,
    pub content_length: u64,
    pub content_sha1: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelLargeFileResponse {
    pub file_id: String,
    pub file_name: String,
}

/// Operations the upload engine requires from object storage
///
/// Every call takes a cancellation token; implementations abort the in-flight
/// request when it fires and return [`StorageError::Aborted`].
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn start_large_file(
        &self,
        request: StartLargeFileRequest,
        cancel: &CancellationToken,
    ) -> Result<StartLargeFileResponse, StorageError>;

    async fn upload_part(
        &self,
        request: UploadPartRequest,
        cancel: &CancellationToken,
    ) -> Result<UploadPartResponse, StorageError>;

    async fn finish_large_file(
        &self,
        file_id: &str,
        part_sha1_array: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<FileResponse, StorageError>;

    async fn cancel_large_file(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<CancelLargeFileResponse, StorageError>;

    async fn upload_file(
        &self,
        request: UploadFileRequest,
        cancel: &CancellationToken,
    ) -> Result<FileResponse, StorageError>;

    /// Subscribe to byte-level upload progress, if the transport reports it
    fn transfer_ticks(&self) -> Option<broadcast::Receiver<TransferTick>> {
        None
    }
}
