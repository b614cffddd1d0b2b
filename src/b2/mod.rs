//! Backblaze B2 client
//!
//! Implements [`StorageClient`] over the B2 native API (v2) with `reqwest`.
//!
//! # Features
//!
//! - **Authorization caching**: `b2_authorize_account` runs once and is
//!   repeated a single time when a call reports an expired or bad token
//! - **Retries**: JSON API calls are retried with exponential backoff when
//!   the failure is retryable; part and file uploads are attempted once
//! - **Upload URL pooling**: upload URLs are reused after a successful upload
//!   and dropped after a failed one
//! - **Progress**: request bodies publish [`TransferTick`]s
//!
//! # Example
//!
//! ```no_run
//! use b2_uploadr::b2::{B2Client, B2ClientConfig, Credentials, RetryPolicy};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = B2ClientConfig {
//!     endpoint: "https://api.backblazeb2.com".to_string(),
//!     credentials: Credentials::new("key-id", "application-key"),
//!     timeout: None,
//!     retry: RetryPolicy::default(),
//! };
//! let client = B2Client::new(config)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Tracing
//!
//! | Operation | Span Name |
//! |-----------|-----------|
//! | b2_authorize_account | `b2.authorize_account` |
//! | b2_start_large_file | `b2.start_large_file` |
//! | b2_upload_part | `b2.upload_part` |
//! | b2_finish_large_file | `b2.finish_large_file` |
//! | b2_cancel_large_file | `b2.cancel_large_file` |
//! | b2_upload_file | `b2.upload_file` |
//! | b2_get_file_info | `b2.get_file_info` |
//! | b2_delete_file_version | `b2.delete_file_version` |

pub mod credentials;
pub mod progress;
pub mod retry;

pub use credentials::{Credentials, CredentialsError, CredentialsProvider};
pub use progress::ProgressChannel;
pub use retry::RetryPolicy;

use crate::config::B2Config;
use crate::upload::client::{
    CancelLargeFileResponse, FileResponse, StartLargeFileRequest, StartLargeFileResponse,
    StorageClient, StorageError, TransferTick, UploadFileRequest, UploadPartRequest,
    UploadPartResponse,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const API_PATH: &str = "b2api/v2";
const FILE_NAME_HEADER: &str = "X-Bz-File-Name";
const CONTENT_SHA1_HEADER: &str = "X-Bz-Content-Sha1";
const PART_NUMBER_HEADER: &str = "X-Bz-Part-Number";
const LAST_MODIFIED_INFO: &str = "src_last_modified_millis";
const LAST_MODIFIED_HEADER: &str = "x-bz-info-src_last_modified_millis";

/// Everything except unreserved characters and `/`
const B2_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Percent-encode a file name or file info value for a B2 header
pub fn encode_header_value(value: &str) -> String {
    utf8_percent_encode(value, B2_ENCODE_SET).to_string()
}

/// B2 client configuration
#[derive(Debug, Clone)]
pub struct B2ClientConfig {
    pub endpoint: String,
    pub credentials: Credentials,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl B2ClientConfig {
    /// Build from the `b2` configuration section, resolving credentials
    pub fn from_config(config: &B2Config) -> Result<Self, CredentialsError> {
        Ok(Self {
            endpoint: config.endpoint.clone(),
            credentials: CredentialsProvider::resolve(config)?,
            timeout: config.timeout(),
            retry: RetryPolicy::from(&config.retry),
        })
    }
}

/// Result of `b2_authorize_account`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub recommended_part_size: Option<u64>,
    #[serde(default)]
    pub absolute_minimum_part_size: Option<u64>,
}

/// File version as described by the B2 API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub content_length: u64,
    #[serde(default)]
    pub content_sha1: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_info: HashMap<String, String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub upload_timestamp: Option<i64>,
}

impl From<FileVersion> for FileResponse {
    fn from(file: FileVersion) -> Self {
        FileResponse {
            file_id: file.file_id,
            file_name: file.file_name,
            content_length: file.content_length,
            // Large files report "none"
            content_sha1: file.content_sha1.filter(|sha1| sha1 != "none"),
        }
    }
}

/// Result of `b2_delete_file_version`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedFile {
    pub file_id: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadTarget {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UploadedPart {
    file_id: Option<String>,
    part_number: Option<u32>,
    content_length: Option<u64>,
    content_sha1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct B2ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Token failures that a fresh `b2_authorize_account` can fix
fn is_expired_auth(err: &StorageError) -> bool {
    matches!(
        err,
        StorageError::Api { status: 401, code, .. }
            if code == "expired_auth_token" || code == "bad_auth_token"
    )
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn response_header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn error_for_status(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<B2ErrorBody>(&text) {
        Ok(body) => (body.code, body.message),
        Err(_) => (
            status
                .canonical_reason()
                .unwrap_or("unknown")
                .to_ascii_lowercase()
                .replace(' ', "_"),
            text,
        ),
    };
    Err(StorageError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, StorageError> {
    response
        .json::<T>()
        .await
        .map_err(|e| StorageError::Response(e.to_string()))
}

/// B2 client
pub struct B2Client {
    config: B2ClientConfig,
    http_client: reqwest::Client,
    authorization: tokio::sync::Mutex<Option<Arc<Authorization>>>,
    upload_targets: Mutex<HashMap<String, Vec<UploadTarget>>>,
    progress: ProgressChannel,
}

impl B2Client {
    /// Create a new B2 client
    pub fn new(config: B2ClientConfig) -> Result<Self, StorageError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
            authorization: tokio::sync::Mutex::new(None),
            upload_targets: Mutex::new(HashMap::new()),
            progress: ProgressChannel::default(),
        })
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    /// Cached account authorization, authorizing on first use
    pub async fn authorization(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<Authorization>, StorageError> {
        let mut cached = self.authorization.lock().await;
        if let Some(auth) = cached.as_ref() {
            return Ok(Arc::clone(auth));
        }

        let auth = Arc::new(self.authorize_account(cancel).await?);
        info!(
            account_id = %auth.account_id,
            api_url = %auth.api_url,
            recommended_part_size = ?auth.recommended_part_size,
            "Authorized B2 account"
        );
        *cached = Some(Arc::clone(&auth));
        Ok(auth)
    }

    #[tracing::instrument(
        name = "b2.authorize_account",
        skip(self, cancel),
        fields(b2.endpoint = %self.endpoint()),
        err
    )]
    async fn authorize_account(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Authorization, StorageError> {
        let url = format!("{}/{}/b2_authorize_account", self.endpoint(), API_PATH);
        let url = url.as_str();
        let credentials = &self.config.credentials;

        self.config
            .retry
            .run("b2_authorize_account", cancel, || async move {
                let request = self.http_client.get(url).basic_auth(
                    credentials.application_key_id(),
                    Some(credentials.application_key()),
                );
                let response = self.send(request, cancel).await?;
                parse_json::<Authorization>(response).await
            })
            .await
    }

    async fn invalidate(&self, stale: &Arc<Authorization>) {
        let mut cached = self.authorization.lock().await;
        if cached.as_ref().is_some_and(|auth| Arc::ptr_eq(auth, stale)) {
            *cached = None;
        }
    }

    /// Run `op` with the account authorization, re-authorizing once if the
    /// token was rejected
    async fn with_authorization<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, StorageError>
    where
        F: Fn(Arc<Authorization>) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let auth = self.authorization(cancel).await?;
        match op(Arc::clone(&auth)).await {
            Err(err) if is_expired_auth(&err) => {
                warn!(error = %err, "B2 authorization rejected, re-authorizing");
                self.invalidate(&auth).await;
                let auth = self.authorization(cancel).await?;
                op(auth).await
            }
            result => result,
        }
    }

    /// POST a JSON API call, with retries
    async fn api_call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<T, StorageError> {
        self.config
            .retry
            .run(operation, cancel, || async move {
                self.with_authorization(cancel, |auth| async move {
                    let url = format!(
                        "{}/{}/{}",
                        auth.api_url.trim_end_matches('/'),
                        API_PATH,
                        operation
                    );
                    let request = self
                        .http_client
                        .post(url)
                        .header(AUTHORIZATION, auth.authorization_token.as_str())
                        .json(body);
                    let response = self.send(request, cancel).await?;
                    parse_json::<T>(response).await
                })
                .await
            })
            .await
    }

    async fn send(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, StorageError> {
        let request = match self.config.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::Aborted),
            response = request.send() => response?,
        };
        error_for_status(response).await
    }

    async fn upload_target(
        &self,
        pool_key: &str,
        operation: &'static str,
        body: Value,
        cancel: &CancellationToken,
    ) -> Result<UploadTarget, StorageError> {
        let pooled = self
            .upload_targets
            .lock()
            .get_mut(pool_key)
            .and_then(Vec::pop);
        if let Some(target) = pooled {
            return Ok(target);
        }
        debug!(operation = operation, "Requesting upload URL");
        self.api_call(operation, &body, cancel).await
    }

    fn release_target(&self, pool_key: String, target: UploadTarget) {
        self.upload_targets
            .lock()
            .entry(pool_key)
            .or_default()
            .push(target);
    }

    fn forget_targets(&self, pool_key: &str) {
        self.upload_targets.lock().remove(pool_key);
    }

    /// Describe a file version
    #[tracing::instrument(
        name = "b2.get_file_info",
        skip(self, cancel),
        fields(b2.file_id = %file_id),
        err
    )]
    pub async fn get_file_info(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<FileVersion, StorageError> {
        self.api_call("b2_get_file_info", &json!({ "fileId": file_id }), cancel)
            .await
    }

    /// Delete one version of a file
    #[tracing::instrument(
        name = "b2.delete_file_version",
        skip(self, cancel),
        fields(b2.file_name = %file_name, b2.file_id = %file_id),
        err
    )]
    pub async fn delete_file_version(
        &self,
        file_name: &str,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeletedFile, StorageError> {
        let body = json!({ "fileName": file_name, "fileId": file_id });
        let deleted: DeletedFile = self
            .api_call("b2_delete_file_version", &body, cancel)
            .await?;
        info!(file_id = %deleted.file_id, "Deleted file version");
        Ok(deleted)
    }
}

#[async_trait]
impl StorageClient for B2Client {
    #[tracing::instrument(
        name = "b2.start_large_file",
        skip(self, request, cancel),
        fields(
            b2.bucket_id = %request.bucket,
            b2.file_name = %request.file_name,
            b2.file_id = tracing::field::Empty
        ),
        err
    )]
    async fn start_large_file(
        &self,
        request: StartLargeFileRequest,
        cancel: &CancellationToken,
    ) -> Result<StartLargeFileResponse, StorageError> {
        let mut file_info = request.file_info;
        file_info
            .entry(LAST_MODIFIED_INFO.to_string())
            .or_insert_with(|| now_millis().to_string());

        let body = json!({
            "bucketId": request.bucket,
            "fileName": request.file_name,
            "contentType": request.content_type,
            "fileInfo": file_info,
        });
        let file: FileVersion = self.api_call("b2_start_large_file", &body, cancel).await?;

        tracing::Span::current().record("b2.file_id", file.file_id.as_str());
        Ok(StartLargeFileResponse {
            file_id: file.file_id,
        })
    }

    #[tracing::instrument(
        name = "b2.upload_part",
        skip(self, request, cancel),
        fields(
            b2.file_id = %request.file_id,
            b2.part_number = request.part_number,
            upload.bytes = request.content_length,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload_part(
        &self,
        request: UploadPartRequest,
        cancel: &CancellationToken,
    ) -> Result<UploadPartResponse, StorageError> {
        let pool_key = format!("file:{}", request.file_id);
        let target = self
            .upload_target(
                &pool_key,
                "b2_get_upload_part_url",
                json!({ "fileId": request.file_id }),
                cancel,
            )
            .await?;

        let http_request = self
            .http_client
            .post(target.upload_url.as_str())
            .header(AUTHORIZATION, target.authorization_token.as_str())
            .header(PART_NUMBER_HEADER, request.part_number)
            .header(CONTENT_LENGTH, request.content_length)
            .header(CONTENT_SHA1_HEADER, request.content_sha1.as_str())
            .body(self.progress.body(request.body, request.tag));

        let response = self.send(http_request, cancel).await?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());
        let header_sha1 = response_header(&response, CONTENT_SHA1_HEADER);
        let part: UploadedPart = parse_json(response).await?;
        self.release_target(pool_key, target);

        Ok(UploadPartResponse {
            file_id: part.file_id.unwrap_or(request.file_id),
            part_number: part.part_number.unwrap_or(request.part_number),
            content_length: part.content_length.unwrap_or(request.content_length),
            content_sha1: part.content_sha1.or(header_sha1),
        })
    }

    #[tracing::instrument(
        name = "b2.finish_large_file",
        skip(self, part_sha1_array, cancel),
        fields(b2.file_id = %file_id, parts_count = part_sha1_array.len()),
        err
    )]
    async fn finish_large_file(
        &self,
        file_id: &str,
        part_sha1_array: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<FileResponse, StorageError> {
        let body = json!({ "fileId": file_id, "partSha1Array": part_sha1_array });
        let file: FileVersion = self.api_call("b2_finish_large_file", &body, cancel).await?;
        self.forget_targets(&format!("file:{}", file_id));
        Ok(file.into())
    }

    #[tracing::instrument(
        name = "b2.cancel_large_file",
        skip(self, cancel),
        fields(b2.file_id = %file_id),
        err
    )]
    async fn cancel_large_file(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<CancelLargeFileResponse, StorageError> {
        let body = json!({ "fileId": file_id });
        let canceled: DeletedFile = self.api_call("b2_cancel_large_file", &body, cancel).await?;
        self.forget_targets(&format!("file:{}", file_id));
        Ok(CancelLargeFileResponse {
            file_id: canceled.file_id,
            file_name: canceled.file_name,
        })
    }

    #[tracing::instrument(
        name = "b2.upload_file",
        skip(self, request, cancel),
        fields(
            b2.bucket_id = %request.bucket,
            b2.file_name = %request.file_name,
            upload.bytes = request.content_length,
            b2.file_id = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload_file(
        &self,
        request: UploadFileRequest,
        cancel: &CancellationToken,
    ) -> Result<FileResponse, StorageError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.custom_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StorageError::Config(format!("Invalid header name '{}': {}", name, e)))?;
            let header_value = HeaderValue::from_str(&encode_header_value(value))
                .map_err(|e| StorageError::Config(format!("Invalid header value for '{}': {}", name, e)))?;
            headers.insert(header_name, header_value);
        }
        let last_modified = HeaderName::from_static(LAST_MODIFIED_HEADER);
        if !headers.contains_key(&last_modified) {
            headers.insert(last_modified, HeaderValue::from(now_millis()));
        }

        let pool_key = format!("bucket:{}", request.bucket);
        let target = self
            .upload_target(
                &pool_key,
                "b2_get_upload_url",
                json!({ "bucketId": request.bucket }),
                cancel,
            )
            .await?;

        let http_request = self
            .http_client
            .post(target.upload_url.as_str())
            .header(AUTHORIZATION, target.authorization_token.as_str())
            .header(FILE_NAME_HEADER, encode_header_value(&request.file_name))
            .header(CONTENT_TYPE, request.content_type.as_str())
            .header(CONTENT_LENGTH, request.content_length)
            .header(CONTENT_SHA1_HEADER, request.content_sha1.as_str())
            .headers(headers)
            .body(self.progress.body(request.body, request.tag));

        let response = self.send(http_request, cancel).await?;
        let span = tracing::Span::current();
        span.record("http.status_code", response.status().as_u16());
        let header_sha1 = response_header(&response, CONTENT_SHA1_HEADER);
        let file: FileVersion = parse_json(response).await?;
        self.release_target(pool_key, target);

        span.record("b2.file_id", file.file_id.as_str());
        let mut response = FileResponse::from(file);
        response.content_sha1 = response.content_sha1.or(header_sha1);
        Ok(response)
    }

    fn transfer_ticks(&self) -> Option<broadcast::Receiver<TransferTick>> {
        Some(self.progress.subscribe())
    }
}
