//! Upload progress reporting
//!
//! Request bodies are handed to the HTTP client as a stream of slices. Each
//! slice pulled by the transport publishes a [`TransferTick`] with the running
//! byte count.

use crate::upload::client::{RequestTag, TransferTick};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::io;
use tokio::sync::broadcast;

/// Slice size handed to the transport
const SLICE_SIZE: usize = 64 * 1024;

/// Ticks buffered per subscriber before old ones are dropped
pub const TICK_CAPACITY: usize = 1024;

/// Broadcasts transfer ticks for every body it wraps
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    sender: broadcast::Sender<TransferTick>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(TICK_CAPACITY)
    }
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferTick> {
        self.sender.subscribe()
    }

    /// Request body that reports its progress under `tag`
    pub fn body(&self, data: Bytes, tag: RequestTag) -> reqwest::Body {
        reqwest::Body::wrap_stream(self.counting_stream(data, tag))
    }

    /// Slices of `data`, publishing a tick as each one is taken
    pub fn counting_stream(
        &self,
        data: Bytes,
        tag: RequestTag,
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let request_id = uuid::Uuid::new_v4();
        let total = data.len() as u64;
        let sender = self.sender.clone();
        let slices: Vec<Bytes> = (0..data.len())
            .step_by(SLICE_SIZE)
            .map(|start| data.slice(start..(start + SLICE_SIZE).min(data.len())))
            .collect();

        let mut loaded = 0u64;
        stream::iter(slices).map(move |slice| {
            loaded += slice.len() as u64;
            // No subscribers is fine
            let _ = sender.send(TransferTick {
                request_id,
                tag: tag.clone(),
                loaded,
                total,
            });
            Ok(slice)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag() -> RequestTag {
        RequestTag {
            bucket: "bucket".into(),
            key: "key".into(),
            file_id: Some("file".into()),
            part_number: Some(2),
        }
    }

    #[tokio::test]
    async fn test_ticks_follow_slices() {
        let channel = ProgressChannel::new(16);
        let mut ticks = channel.subscribe();
        let data = Bytes::from(vec![1u8; SLICE_SIZE * 2 + 10]);

        let slices: Vec<Bytes> = channel
            .counting_stream(data.clone(), tag())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(slices.len(), 3);
        assert_eq!(slices.concat(), data.to_vec());

        let mut loaded = Vec::new();
        while let Ok(tick) = ticks.try_recv() {
            assert_eq!(tick.total, data.len() as u64);
            assert_eq!(tick.tag, tag());
            loaded.push(tick.loaded);
        }
        assert_eq!(
            loaded,
            vec![SLICE_SIZE as u64, 2 * SLICE_SIZE as u64, data.len() as u64]
        );
    }

    #[tokio::test]
    async fn test_without_subscribers() {
        let channel = ProgressChannel::default();
        let slices: Vec<_> = channel
            .counting_stream(Bytes::from_static(b"abc"), tag())
            .collect()
            .await;
        assert_eq!(slices.len(), 1);
    }
}
