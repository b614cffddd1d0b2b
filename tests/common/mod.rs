//! Shared helpers for integration tests
//!
//! `FakeStorage` is an in-memory `StorageClient` that records every call and
//! can be told to misbehave.

#![allow(dead_code)]

use async_trait::async_trait;
use b2_uploadr::upload::client::{
    CancelLargeFileResponse, FileResponse, StartLargeFileRequest, StartLargeFileResponse,
    StorageClient, StorageError, UploadFileRequest, UploadPartRequest, UploadPartResponse,
};
use b2_uploadr::upload::{UploadEvent, UploadState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const MIB: u64 = 1024 * 1024;

/// One recorded storage call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    StartLargeFile {
        file_name: String,
        content_type: String,
        file_info: HashMap<String, String>,
    },
    UploadPart {
        file_id: String,
        part_number: u32,
        content_length: u64,
        content_sha1: String,
    },
    FinishLargeFile {
        file_id: String,
        part_sha1_array: Vec<String>,
    },
    CancelLargeFile {
        file_id: String,
    },
    UploadFile {
        file_name: String,
        content_type: String,
        content_length: u64,
        content_sha1: String,
        custom_headers: HashMap<String, String>,
    },
}

#[derive(Default)]
pub struct FakeStorage {
    calls: parking_lot::Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    block_uploads: bool,
    block_from_part: Option<u32>,
    block_finish: bool,
    omit_checksums: bool,
    fail_part: Option<u32>,
    fail_start: bool,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every part and file upload takes `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Part and file uploads never finish unless canceled
    pub fn blocking_uploads(mut self) -> Self {
        self.block_uploads = true;
        self
    }

    /// Parts numbered `part_number` and above never finish unless canceled
    pub fn blocking_from_part(mut self, part_number: u32) -> Self {
        self.block_from_part = Some(part_number);
        self
    }

    /// Finishing a large file never completes unless canceled
    pub fn blocking_finish(mut self) -> Self {
        self.block_finish = true;
        self
    }

    /// Part responses carry no checksum
    pub fn omitting_checksums(mut self) -> Self {
        self.omit_checksums = true;
        self
    }

    /// Uploading this part fails with a server error
    pub fn failing_part(mut self, part_number: u32) -> Self {
        self.fail_part = Some(part_number);
        self
    }

    /// Starting a large file fails
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| pred(call)).count()
    }

    pub fn start_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::StartLargeFile { .. }))
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CancelLargeFile { file_id } => Some(file_id),
                _ => None,
            })
            .collect()
    }

    pub fn part_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UploadPart { part_number, .. } => Some(part_number),
                _ => None,
            })
            .collect();
        numbers.sort_unstable();
        numbers
    }

    pub fn finish_calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::FinishLargeFile {
                    file_id,
                    part_sha1_array,
                } => Some((file_id, part_sha1_array)),
                _ => None,
            })
            .collect()
    }

    pub fn upload_file_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::UploadFile { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    async fn transfer(&self, block: bool, cancel: &CancellationToken) -> Result<(), StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if block {
            cancel.cancelled().await;
            return Err(StorageError::Aborted);
        }
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(()),
            _ = cancel.cancelled() => Err(StorageError::Aborted),
        }
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn start_large_file(
        &self,
        request: StartLargeFileRequest,
        _cancel: &CancellationToken,
    ) -> Result<StartLargeFileResponse, StorageError> {
        self.record(Call::StartLargeFile {
            file_name: request.file_name,
            content_type: request.content_type,
            file_info: request.file_info,
        });
        if self.fail_start {
            return Err(StorageError::Api {
                status: 400,
                code: "bad_request".into(),
                message: "bucket not found".into(),
            });
        }
        Ok(StartLargeFileResponse {
            file_id: "large-file-1".into(),
        })
    }

    async fn upload_part(
        &self,
        request: UploadPartRequest,
        cancel: &CancellationToken,
    ) -> Result<UploadPartResponse, StorageError> {
        self.record(Call::UploadPart {
            file_id: request.file_id.clone(),
            part_number: request.part_number,
            content_length: request.content_length,
            content_sha1: request.content_sha1.clone(),
        });
        let block = self.block_uploads
            || self
                .block_from_part
                .is_some_and(|first| request.part_number >= first);
        self.transfer(block, cancel).await?;

        if self.fail_part == Some(request.part_number) {
            return Err(StorageError::Api {
                status: 500,
                code: "internal_error".into(),
                message: "part rejected".into(),
            });
        }
        Ok(UploadPartResponse {
            file_id: request.file_id,
            part_number: request.part_number,
            content_length: request.content_length,
            content_sha1: (!self.omit_checksums).then_some(request.content_sha1),
        })
    }

    async fn finish_large_file(
        &self,
        file_id: &str,
        part_sha1_array: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<FileResponse, StorageError> {
        self.record(Call::FinishLargeFile {
            file_id: file_id.to_string(),
            part_sha1_array,
        });
        if self.block_finish {
            cancel.cancelled().await;
            return Err(StorageError::Aborted);
        }
        Ok(FileResponse {
            file_id: file_id.to_string(),
            file_name: "large".into(),
            content_length: 0,
            content_sha1: None,
        })
    }

    async fn cancel_large_file(
        &self,
        file_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<CancelLargeFileResponse, StorageError> {
        self.record(Call::CancelLargeFile {
            file_id: file_id.to_string(),
        });
        Ok(CancelLargeFileResponse {
            file_id: file_id.to_string(),
            file_name: "large".into(),
        })
    }

    async fn upload_file(
        &self,
        request: UploadFileRequest,
        cancel: &CancellationToken,
    ) -> Result<FileResponse, StorageError> {
        self.record(Call::UploadFile {
            file_name: request.file_name.clone(),
            content_type: request.content_type,
            content_length: request.content_length,
            content_sha1: request.content_sha1.clone(),
            custom_headers: request.custom_headers,
        });
        self.transfer(self.block_uploads, cancel).await?;

        Ok(FileResponse {
            file_id: "small-file-1".into(),
            file_name: request.file_name,
            content_length: request.content_length,
            content_sha1: Some(request.content_sha1),
        })
    }
}

/// Drain every event currently queued
pub fn drain(events: &mut mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// States announced by `StateChanged` events, in order
pub fn states(events: &[UploadEvent]) -> Vec<UploadState> {
    events
        .iter()
        .filter_map(|event| match event {
            UploadEvent::StateChanged(snapshot) => Some(snapshot.state),
            _ => None,
        })
        .collect()
}

/// Number of `Failed` events
pub fn failures(events: &[UploadEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, UploadEvent::Failed(_)))
        .count()
}

/// Poll `check` until it holds, panicking after five seconds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Hex SHA-1, as the engine sends it
pub fn sha1_of(data: &[u8]) -> String {
    b2_uploadr::upload::checksum::sha1_hex(data)
}
