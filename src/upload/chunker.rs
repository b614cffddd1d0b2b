//! Chunk producer
//!
//! Turns an [`UploadSource`] into a lazy, single-pass sequence of numbered
//! parts. In-memory sources are sliced up front; streamed sources are buffered
//! until the buffer exceeds the current target size, then split.

use super::source::UploadSource;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use rand::Rng;
use std::io;
use tokio_util::io::ReaderStream;

/// Read size for reader and file sources
const READ_CAPACITY: usize = 64 * 1024;

/// One part of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDataPart {
    /// 1-based, strictly increasing
    pub part_number: u32,
    pub data: Bytes,
    pub is_last_part: bool,
}

impl RawDataPart {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Target size for each successive part
///
/// With variation enabled, every emitted part redraws the next target as
/// `max(min_part_size, part_size * r)` with `r` uniform above 0.75, so that
/// concurrently uploading parts do not all finish together.
#[derive(Debug, Clone)]
pub struct PartSizer {
    part_size: u64,
    min_part_size: u64,
    vary: bool,
    current: u64,
}

impl PartSizer {
    pub fn new(part_size: u64, min_part_size: u64, vary: bool) -> Self {
        let part_size = part_size.max(1);
        Self {
            part_size,
            min_part_size: min_part_size.min(part_size),
            vary,
            current: part_size,
        }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    fn advance(&mut self) {
        if !self.vary {
            return;
        }
        let mut rng = rand::rng();
        let r = loop {
            let r: f64 = rng.random();
            if r > 0.75 {
                break r;
            }
        };
        let next = (self.part_size as f64 * r) as u64;
        self.current = next.max(self.min_part_size).max(1);
    }
}

/// Produce the parts of `source`
///
/// The sequence is finite and cannot be restarted. Exactly one part, always
/// the final one, has `is_last_part` set; for an empty source that part is
/// empty.
pub fn produce(source: UploadSource, sizer: PartSizer) -> BoxStream<'static, io::Result<RawDataPart>> {
    match source {
        UploadSource::Buffer(buf) => slice_buffer(buf, sizer),
        UploadSource::Text(text) => slice_buffer(Bytes::from(text), sizer),
        UploadSource::Bytes(bytes) => slice_buffer(Bytes::from(bytes), sizer),
        UploadSource::Stream { stream, .. } => chunk_stream(stream, sizer),
        UploadSource::Reader { reader, .. } => {
            chunk_stream(ReaderStream::with_capacity(reader, READ_CAPACITY).boxed(), sizer)
        }
        UploadSource::File(path) => {
            let chunks = stream::once(tokio::fs::File::open(path))
                .map_ok(|file| ReaderStream::with_capacity(file, READ_CAPACITY))
                .try_flatten()
                .boxed();
            chunk_stream(chunks, sizer)
        }
    }
}

fn slice_buffer(buf: Bytes, mut sizer: PartSizer) -> BoxStream<'static, io::Result<RawDataPart>> {
    let mut parts = Vec::new();
    let mut offset = 0usize;
    let mut part_number = 1u32;

    loop {
        let target = sizer.current() as usize;
        let end = buf.len().min(offset.saturating_add(target));
        let is_last_part = end == buf.len();
        parts.push(Ok(RawDataPart {
            part_number,
            data: buf.slice(offset..end),
            is_last_part,
        }));
        if is_last_part {
            break;
        }
        offset = end;
        part_number += 1;
        sizer.advance();
    }

    stream::iter(parts).boxed()
}

struct StreamChunker {
    inner: BoxStream<'static, io::Result<Bytes>>,
    buffer: BytesMut,
    sizer: PartSizer,
    next_part_number: u32,
    finished: bool,
}

impl StreamChunker {
    fn emit(&mut self, data: Bytes, is_last_part: bool) -> RawDataPart {
        let part = RawDataPart {
            part_number: self.next_part_number,
            data,
            is_last_part,
        };
        self.next_part_number += 1;
        self.sizer.advance();
        part
    }
}

fn chunk_stream(
    inner: BoxStream<'static, io::Result<Bytes>>,
    sizer: PartSizer,
) -> BoxStream<'static, io::Result<RawDataPart>> {
    let state = StreamChunker {
        inner,
        buffer: BytesMut::new(),
        sizer,
        next_part_number: 1,
        finished: false,
    };

    stream::try_unfold(state, |mut state| async move {
        if state.finished {
            return Ok::<_, io::Error>(None);
        }
        loop {
            let target = state.sizer.current() as usize;
            if state.buffer.len() > target {
                let data = state.buffer.split_to(target).freeze();
                let part = state.emit(data, false);
                return Ok(Some((part, state)));
            }
            match state.inner.next().await {
                Some(chunk) => state.buffer.extend_from_slice(&chunk?),
                None => {
                    state.finished = true;
                    let data = state.buffer.split().freeze();
                    let part = state.emit(data, true);
                    return Ok(Some((part, state)));
                }
            }
        }
    })
    .boxed()
}
