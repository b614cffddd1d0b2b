//! Upload engine
//!
//! Drives one upload from source to storage: single whole-body upload when the
//! source fits in one part, otherwise a B2 large file (start, parts, finish).
//!
//! # State machine
//!
//! ```text
//! none ──start──▶ running ──▶ success
//!   │               │  ▲ └───▶ error
//!   │             pause start
//!   │               ▼  │
//!   │             paused
//!   └──── cancel (from none, running, paused) ───▶ canceled
//! ```
//!
//! Up to `max_parallel` workers pull parts from a shared chunk producer and
//! from parts left pending by an earlier run. Each part moves through a status
//! table (pending, locked, confirmed); a locked part is never dispatched twice.

use super::checksum;
use super::chunker::{self, PartSizer, RawDataPart};
use super::client::{
    RequestTag, StartLargeFileRequest, StorageClient, StorageError, TransferTick,
    UploadFileRequest, UploadPartRequest,
};
use super::part_size::{self, PartLimits, MAX_PARALLEL};
use super::source::UploadSource;
use super::{UploadError, UploadEvent, UploadSnapshot, UploadState};
use crate::metrics;
use bytes::Bytes;
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Content type that lets B2 pick one from the file name
pub const DEFAULT_CONTENT_TYPE: &str = "b2/x-auto";

/// Header prefix for custom file info on whole-body uploads
pub const FILE_INFO_HEADER_PREFIX: &str = "X-Bz-Info-";

/// File info key B2 serves back as `Content-Disposition`
pub const CONTENT_DISPOSITION_INFO: &str = "b2-content-disposition";

/// Optional object metadata
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    pub mime_type: Option<String>,
    pub content_disposition: Option<String>,
    pub custom_metadata: HashMap<String, String>,
}

/// What to upload and where
#[derive(Debug)]
pub struct UploadParams {
    /// B2 bucket id
    pub bucket: String,
    pub key: String,
    pub body: UploadSource,
    pub metadata: UploadMetadata,
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub limits: PartLimits,
    pub max_parallel: usize,
    /// Stagger part sizes when more parts than workers are expected
    pub vary_part_sizes: bool,
    /// Substitute a placeholder when a checksum cannot be computed
    pub development: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            limits: PartLimits::default(),
            max_parallel: MAX_PARALLEL,
            vary_part_sizes: true,
            development: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartStatus {
    Pending,
    Locked,
    Confirmed,
}

#[derive(Debug)]
struct PartEntry {
    status: PartStatus,
    /// Kept until confirmed so a later run can retry the part
    data: Option<Bytes>,
    is_last_part: bool,
    size: u64,
    /// Bytes already counted into `uploaded_bytes`
    counted: u64,
}

struct Inner {
    state: UploadState,
    total_bytes: Option<u64>,
    uploaded_bytes: u64,
    multipart: Option<bool>,
    file_id: Option<String>,
    part_checksums: Vec<Option<String>>,
    parts: BTreeMap<u32, PartEntry>,
    produced_bytes: u64,
    producer_done: bool,
    finalizing: bool,
    error: Option<Arc<UploadError>>,
    started_at: Option<Instant>,
    remote_cancel_requested: bool,
    remote_cancel: Option<JoinHandle<()>>,
    listeners: Vec<mpsc::UnboundedSender<UploadEvent>>,
}

impl Inner {
    fn snapshot(&self) -> UploadSnapshot {
        UploadSnapshot {
            state: self.state,
            total_bytes: self.total_bytes,
            uploaded_bytes: self.uploaded_bytes,
        }
    }

    fn emit(&mut self, event: UploadEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_progress(&mut self) {
        if !self.state.is_terminal() {
            let snapshot = self.snapshot();
            self.emit(UploadEvent::Progress(snapshot));
        }
    }

    fn all_confirmed(&self) -> bool {
        self.parts
            .values()
            .all(|part| part.status == PartStatus::Confirmed)
    }
}

type SessionFuture = Shared<BoxFuture<'static, Result<String, StorageError>>>;

/// One resumable upload
pub struct Upload {
    bucket: String,
    key: String,
    metadata: UploadMetadata,
    client: Arc<dyn StorageClient>,
    options: UploadOptions,
    part_size: u64,
    producer: tokio::sync::Mutex<BoxStream<'static, io::Result<RawDataPart>>>,
    session: Mutex<Option<SessionFuture>>,
    permits: Semaphore,
    abort: CancellationToken,
    terminal: watch::Sender<UploadState>,
    inner: Mutex<Inner>,
}

/// Holds a part in the locked state; unlocks it again unless confirmed
struct PartLock<'a> {
    upload: &'a Upload,
    part_number: u32,
    armed: bool,
}

impl PartLock<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartLock<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.upload.inner.lock();
        if let Some(entry) = inner.parts.get_mut(&self.part_number) {
            if entry.status == PartStatus::Locked {
                entry.status = PartStatus::Pending;
            }
        }
    }
}

impl Upload {
    /// Prepare an upload
    ///
    /// Estimates the source size and fixes the part size. Nothing is read or
    /// sent until [`Upload::start`].
    pub fn new(
        client: Arc<dyn StorageClient>,
        params: UploadParams,
        options: UploadOptions,
    ) -> Arc<Self> {
        let total_bytes = params.body.byte_length();
        let part_size = part_size::part_size(total_bytes, &options.limits);
        let max_parallel = options.max_parallel.max(1);
        let vary = options.vary_part_sizes
            && total_bytes.is_some_and(|total| total.div_ceil(part_size) > max_parallel as u64);

        debug!(
            bucket = %params.bucket,
            key = %params.key,
            total_bytes = ?total_bytes,
            part_size = part_size,
            vary_part_sizes = vary,
            "Prepared upload"
        );

        let producer = chunker::produce(
            params.body,
            PartSizer::new(part_size, options.limits.min_part_size, vary),
        );
        let (terminal, _) = watch::channel(UploadState::None);

        Arc::new(Self {
            bucket: params.bucket,
            key: params.key,
            metadata: params.metadata,
            client,
            part_size,
            producer: tokio::sync::Mutex::new(producer),
            session: Mutex::new(None),
            permits: Semaphore::new(max_parallel),
            abort: CancellationToken::new(),
            terminal,
            options: UploadOptions {
                max_parallel,
                ..options
            },
            inner: Mutex::new(Inner {
                state: UploadState::None,
                total_bytes,
                uploaded_bytes: 0,
                multipart: None,
                file_id: None,
                part_checksums: Vec::new(),
                parts: BTreeMap::new(),
                produced_bytes: 0,
                producer_done: false,
                finalizing: false,
                error: None,
                started_at: None,
                remote_cancel_requested: false,
                remote_cancel: None,
                listeners: Vec::new(),
            }),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn state(&self) -> UploadState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.inner.lock().total_bytes
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.inner.lock().uploaded_bytes
    }

    /// `None` until the first part decides it
    pub fn is_multipart(&self) -> Option<bool> {
        self.inner.lock().multipart
    }

    pub fn file_id(&self) -> Option<String> {
        self.inner.lock().file_id.clone()
    }

    /// Confirmed checksums, indexed by `part_number - 1`
    pub fn part_checksums(&self) -> Vec<Option<String>> {
        self.inner.lock().part_checksums.clone()
    }

    pub fn error(&self) -> Option<Arc<UploadError>> {
        self.inner.lock().error.clone()
    }

    /// Receive every event emitted from now on, in order
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UploadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().listeners.push(tx);
        rx
    }

    /// Start or resume the upload
    ///
    /// Accepted from `none` and `paused`. The run is spawned on the current
    /// tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Cannot start upload outside a tokio runtime");
                return false;
            }
        };

        {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, UploadState::None | UploadState::Paused) {
                return false;
            }
            inner.started_at.get_or_insert_with(Instant::now);
            self.transition(&mut inner, UploadState::Running);
        }

        info!(bucket = %self.bucket, key = %self.key, "Upload running");
        handle.spawn(Arc::clone(self).run());
        true
    }

    /// Stop dispatching new parts; in-flight parts still complete
    ///
    /// Accepted from `none` and `running`.
    pub fn pause(&self) -> bool {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, UploadState::None | UploadState::Running) {
            return false;
        }
        self.transition(&mut inner, UploadState::Paused);
        info!(bucket = %self.bucket, key = %self.key, "Upload paused");
        true
    }

    /// Cancel the upload
    ///
    /// Accepted from `none`, `running`, `paused` and `error`. Aborts in-flight
    /// requests unless the upload already failed, and cancels a started large
    /// file on the server on a best-effort basis unless it is being finished.
    pub fn cancel(self: &Arc<Self>) -> bool {
        let mut inner = self.inner.lock();
        let already_failed = match inner.state {
            UploadState::None | UploadState::Running | UploadState::Paused => false,
            UploadState::Error => true,
            UploadState::Success | UploadState::Canceled => return false,
        };

        // A finish already in flight may have completed the file on the server
        if already_failed || !inner.finalizing {
            self.cancel_remote_session(&mut inner);
        } else {
            debug!(key = %self.key, "Finish in flight, skipping remote cancel");
        }

        if !already_failed {
            info!(bucket = %self.bucket, key = %self.key, "Upload canceled");
            self.abort.cancel();
            let err = Arc::new(UploadError::Canceled);
            inner.error = Some(Arc::clone(&err));
            self.transition(&mut inner, UploadState::Canceled);
            inner.emit(UploadEvent::Failed(err));
            metrics::record_upload_failure("canceled", "canceled");
        }
        true
    }

    /// Wait until the upload is terminal and any remote cancel has finished
    pub async fn wait(&self) -> Result<(), Arc<UploadError>> {
        let mut rx = self.terminal.subscribe();
        let state = match rx.wait_for(UploadState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };

        let remote_cancel = self.inner.lock().remote_cancel.take();
        if let Some(handle) = remote_cancel {
            if let Err(e) = handle.await {
                warn!(error = %e, "Remote cancel task failed");
            }
        }

        match state {
            UploadState::Success => Ok(()),
            _ => Err(self
                .error()
                .unwrap_or_else(|| Arc::new(UploadError::Canceled))),
        }
    }

    fn transition(&self, inner: &mut Inner, state: UploadState) {
        debug!(from = %inner.state, to = %state, key = %self.key, "Upload state change");
        inner.state = state;
        self.terminal.send_replace(state);
        let snapshot = inner.snapshot();
        inner.emit(UploadEvent::StateChanged(snapshot));
    }

    async fn run(self: Arc<Self>) {
        let ticks = self.client.transfer_ticks();
        let workers = try_join_all(
            (0..self.options.max_parallel).map(|_| Arc::clone(&self).worker()),
        );

        let result = match ticks {
            Some(ticks) => {
                tokio::pin!(workers);
                let follow = self.follow_ticks(ticks);
                tokio::pin!(follow);
                tokio::select! {
                    result = &mut workers => result,
                    () = &mut follow => workers.await,
                }
            }
            None => workers.await,
        };

        let outcome = match result {
            Ok(_) => self.finish_if_complete().await,
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            self.fail(err);
        }
    }

    async fn worker(self: Arc<Self>) -> Result<(), UploadError> {
        loop {
            if self.state() != UploadState::Running {
                return Ok(());
            }
            let Some(part) = self.next_part().await? else {
                return Ok(());
            };
            self.handle_data_part(part).await?;
        }
    }

    /// A pending part from an earlier attempt, or the next produced part
    async fn next_part(&self) -> Result<Option<RawDataPart>, UploadError> {
        if let Some(part) = self.pending_part() {
            return Ok(Some(part));
        }

        let mut producer = self.producer.lock().await;
        if let Some(part) = self.pending_part() {
            return Ok(Some(part));
        }
        if self.inner.lock().producer_done {
            return Ok(None);
        }

        let next = tokio::select! {
            next = producer.next() => next,
            _ = self.abort.cancelled() => return Err(UploadError::Canceled),
        };

        let mut inner = self.inner.lock();
        match next {
            Some(Ok(part)) => {
                if part.part_number > self.options.limits.max_parts {
                    return Err(UploadError::TooManyParts {
                        max: self.options.limits.max_parts,
                    });
                }
                inner.produced_bytes += part.len();
                if part.is_last_part {
                    inner.producer_done = true;
                    inner.total_bytes = Some(inner.produced_bytes);
                }
                inner.parts.insert(
                    part.part_number,
                    PartEntry {
                        status: PartStatus::Pending,
                        data: Some(part.data.clone()),
                        is_last_part: part.is_last_part,
                        size: part.len(),
                        counted: 0,
                    },
                );
                Ok(Some(part))
            }
            Some(Err(e)) => Err(UploadError::unknown(e)),
            None => {
                inner.producer_done = true;
                inner.total_bytes = Some(inner.produced_bytes);
                Ok(None)
            }
        }
    }

    fn pending_part(&self) -> Option<RawDataPart> {
        let inner = self.inner.lock();
        inner
            .parts
            .iter()
            .find(|(_, entry)| entry.status == PartStatus::Pending)
            .and_then(|(part_number, entry)| {
                entry.data.clone().map(|data| RawDataPart {
                    part_number: *part_number,
                    data,
                    is_last_part: entry.is_last_part,
                })
            })
    }

    fn lock_part(&self, part_number: u32) -> Option<PartLock<'_>> {
        let mut inner = self.inner.lock();
        if inner.state != UploadState::Running {
            return None;
        }
        let entry = inner.parts.get_mut(&part_number)?;
        if entry.status != PartStatus::Pending {
            return None;
        }
        entry.status = PartStatus::Locked;
        Some(PartLock {
            upload: self,
            part_number,
            armed: true,
        })
    }

    async fn handle_data_part(&self, part: RawDataPart) -> Result<(), UploadError> {
        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit.map_err(UploadError::unknown)?,
            _ = self.abort.cancelled() => return Err(UploadError::Canceled),
        };

        let Some(lock) = self.lock_part(part.part_number) else {
            debug!(part_number = part.part_number, "Part locked or upload not running, skipping");
            return Ok(());
        };

        if part.is_empty() {
            debug!(part_number = part.part_number, "Empty part, nothing to upload");
            self.confirm_part(lock, None);
            return Ok(());
        }

        if part.part_number == 1 && part.is_last_part {
            self.upload_whole(part, lock).await
        } else {
            self.upload_part(part, lock).await
        }
    }

    async fn upload_whole(&self, part: RawDataPart, lock: PartLock<'_>) -> Result<(), UploadError> {
        self.inner.lock().multipart = Some(false);

        let content_sha1 = checksum::compute(part.data.clone(), self.options.development).await?;
        let request = UploadFileRequest {
            bucket: self.bucket.clone(),
            file_name: self.key.clone(),
            content_type: self.content_type(),
            content_length: part.len(),
            content_sha1: content_sha1.clone(),
            custom_headers: self.info_headers(),
            body: part.data,
            tag: self.tag(None, Some(1)),
        };

        match self.client.upload_file(request, &self.abort).await {
            Ok(response) => {
                info!(
                    file_id = %response.file_id,
                    key = %self.key,
                    bytes = response.content_length,
                    "Uploaded file in one request"
                );
                self.confirm_part(lock, Some(content_sha1));
                Ok(())
            }
            Err(e) => {
                metrics::record_part_failure();
                Err(UploadError::PutFailed(e))
            }
        }
    }

    async fn upload_part(&self, part: RawDataPart, lock: PartLock<'_>) -> Result<(), UploadError> {
        self.inner.lock().multipart = Some(true);

        let file_id = self.ensure_session().await?;
        let part_number = part.part_number;
        let content_sha1 = checksum::compute(part.data.clone(), self.options.development).await?;
        let request = UploadPartRequest {
            file_id: file_id.clone(),
            part_number,
            content_length: part.len(),
            content_sha1,
            body: part.data,
            tag: self.tag(Some(file_id), Some(part_number)),
        };

        let response = self
            .client
            .upload_part(request, &self.abort)
            .await
            .map_err(|source| {
                metrics::record_part_failure();
                UploadError::UploadPartFailed {
                    part_number,
                    source,
                }
            })?;

        let Some(checksum) = response.content_sha1 else {
            metrics::record_part_failure();
            return Err(UploadError::ChecksumMissing { part_number });
        };

        debug!(part_number = part_number, bytes = response.content_length, "Uploaded part");
        self.confirm_part(lock, Some(checksum));
        Ok(())
    }

    /// File id of the large file, starting it exactly once
    async fn ensure_session(&self) -> Result<String, UploadError> {
        if let Some(file_id) = self.inner.lock().file_id.clone() {
            return Ok(file_id);
        }

        let session = self
            .session
            .lock()
            .get_or_insert_with(|| self.start_session())
            .clone();
        let file_id = session.await.map_err(UploadError::MultipartInitFailed)?;

        let mut inner = self.inner.lock();
        if inner.file_id.is_none() {
            info!(file_id = %file_id, key = %self.key, "Started large file");
            inner.file_id = Some(file_id.clone());
        }
        Ok(file_id)
    }

    fn start_session(&self) -> SessionFuture {
        let client = Arc::clone(&self.client);
        let abort = self.abort.clone();
        let request = StartLargeFileRequest {
            bucket: self.bucket.clone(),
            file_name: self.key.clone(),
            content_type: self.content_type(),
            file_info: self.file_info(),
        };

        async move {
            client
                .start_large_file(request, &abort)
                .await
                .map(|response| response.file_id)
        }
        .boxed()
        .shared()
    }

    fn confirm_part(&self, lock: PartLock<'_>, checksum: Option<String>) {
        let part_number = lock.part_number;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(entry) = inner.parts.get_mut(&part_number) else {
            return;
        };
        entry.status = PartStatus::Confirmed;
        entry.data = None;
        let remaining = entry.size - entry.counted;
        entry.counted = entry.size;
        let size = entry.size;

        if let Some(checksum) = checksum {
            let index = (part_number - 1) as usize;
            if inner.part_checksums.len() <= index {
                inner.part_checksums.resize(index + 1, None);
            }
            inner.part_checksums[index] = Some(checksum);
        }

        inner.uploaded_bytes += remaining;
        inner.emit_progress();
        drop(guard);

        lock.disarm();
        metrics::record_part_success(size);
    }

    async fn finish_if_complete(&self) -> Result<(), UploadError> {
        let (multipart, file_id, checksums) = {
            let mut inner = self.inner.lock();
            if inner.state != UploadState::Running
                || inner.finalizing
                || !inner.producer_done
                || !inner.all_confirmed()
            {
                return Ok(());
            }
            inner.finalizing = true;
            (
                inner.multipart,
                inner.file_id.clone(),
                inner.part_checksums.clone(),
            )
        };

        let method = match multipart {
            Some(true) => {
                let file_id = file_id.ok_or(UploadError::MissingFileId)?;
                let part_sha1_array = checksums
                    .into_iter()
                    .enumerate()
                    .map(|(index, checksum)| {
                        checksum.ok_or(UploadError::ChecksumMissing {
                            part_number: index as u32 + 1,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let parts_count = part_sha1_array.len();

                self.client
                    .finish_large_file(&file_id, part_sha1_array, &self.abort)
                    .await
                    .map_err(UploadError::MultipartFinalizeFailed)?;

                info!(file_id = %file_id, parts = parts_count, "Finished large file");
                metrics::record_multipart_parts(parts_count);
                "multipart"
            }
            Some(false) => "single",
            None => "empty",
        };

        self.succeed(method);
        Ok(())
    }

    fn succeed(&self, method: &str) {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, UploadState::Running | UploadState::Paused) {
            return;
        }
        self.transition(&mut inner, UploadState::Success);

        let elapsed = inner
            .started_at
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or_default();
        metrics::record_upload_success(method, elapsed);
        info!(
            key = %self.key,
            bytes = inner.uploaded_bytes,
            method = method,
            duration_ms = (elapsed * 1000.0) as u64,
            "Upload completed"
        );
    }

    fn fail(&self, err: UploadError) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            debug!(error = %err, state = %inner.state, "Ignoring error after terminal state");
            return;
        }

        error!(key = %self.key, error = %err, kind = err.kind().as_str(), "Upload failed");
        metrics::record_upload_failure("error", err.kind().as_str());

        let err = Arc::new(err);
        inner.error = Some(Arc::clone(&err));
        self.transition(&mut inner, UploadState::Error);
        inner.emit(UploadEvent::Failed(err));
    }

    fn cancel_remote_session(self: &Arc<Self>, inner: &mut Inner) {
        if inner.remote_cancel_requested {
            return;
        }
        let file_id = inner.file_id.clone();
        let pending = self.session.lock().clone();
        if file_id.is_none() && pending.is_none() {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Cannot cancel large file outside a tokio runtime");
                return;
            }
        };
        inner.remote_cancel_requested = true;

        let upload = Arc::clone(self);
        inner.remote_cancel = Some(handle.spawn(async move {
            let file_id = match (file_id, pending) {
                (Some(file_id), _) => file_id,
                (None, Some(session)) => match session.await {
                    Ok(file_id) => file_id,
                    Err(e) => {
                        debug!(error = %e, "Large file never started, nothing to cancel");
                        return;
                    }
                },
                (None, None) => return,
            };

            // The upload's own token may already be canceled
            let token = CancellationToken::new();
            match upload.client.cancel_large_file(&file_id, &token).await {
                Ok(_) => info!(file_id = %file_id, "Canceled large file"),
                Err(e) => warn!(file_id = %file_id, error = %e, "Failed to cancel large file"),
            }
        }));
    }

    async fn follow_ticks(&self, mut ticks: broadcast::Receiver<TransferTick>) {
        loop {
            match ticks.recv().await {
                Ok(tick) => self.apply_tick(&tick),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped = skipped, "Transfer ticks lagged");
                }
                Err(RecvError::Closed) => return,
            }
        }
    }

    fn apply_tick(&self, tick: &TransferTick) {
        let tag = &tick.tag;
        if tag.bucket != self.bucket || tag.key != self.key {
            return;
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let (Some(tick_file_id), Some(file_id)) = (&tag.file_id, &inner.file_id) {
            if tick_file_id != file_id {
                return;
            }
        }

        let part_number = tag.part_number.unwrap_or(1);
        let Some(entry) = inner.parts.get_mut(&part_number) else {
            return;
        };
        if entry.status != PartStatus::Locked {
            return;
        }
        let loaded = tick.loaded.min(entry.size);
        if loaded <= entry.counted {
            return;
        }
        inner.uploaded_bytes += loaded - entry.counted;
        entry.counted = loaded;
        inner.emit_progress();
    }

    fn tag(&self, file_id: Option<String>, part_number: Option<u32>) -> RequestTag {
        RequestTag {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            file_id,
            part_number,
        }
    }

    fn content_type(&self) -> String {
        self.metadata
            .mime_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
    }

    /// File info for a large file, keyed without header prefix
    fn file_info(&self) -> HashMap<String, String> {
        let mut info = self.metadata.custom_metadata.clone();
        if let Some(disposition) = &self.metadata.content_disposition {
            info.insert(CONTENT_DISPOSITION_INFO.to_string(), disposition.clone());
        }
        info
    }

    /// File info as `X-Bz-Info-*` headers for a whole-body upload
    fn info_headers(&self) -> HashMap<String, String> {
        self.file_info()
            .into_iter()
            .map(|(key, value)| (format!("{}{}", FILE_INFO_HEADER_PREFIX, key), value))
            .collect()
    }
}
