//! Bounded frame buffer
//!
//! Hands decoded frames from the (blocking) decoder to the detection side.
//! Capacity max(8, 2 x workers); a full buffer blocks the producer, which
//! is the back-pressure that keeps the decoder from racing ahead of the
//! detectors. Frames above the per-frame byte ceiling are refused.

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::frame::Frame;

/// Default per-frame byte ceiling (a 4K BGR frame is ~24 MB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

pub fn buffer_capacity(workers: usize) -> usize {
    (2 * workers).max(8)
}

/// Create a bounded producer/consumer pair.
pub fn frame_channel(workers: usize, max_frame_bytes: usize) -> (FrameProducer, FrameConsumer) {
    let capacity = buffer_capacity(workers);
    let (tx, rx) = mpsc::channel(capacity);
    (
        FrameProducer {
            tx,
            max_frame_bytes,
            capacity,
        },
        FrameConsumer { rx },
    )
}

/// Decoder-side handle. Pushes block when the buffer is full.
pub struct FrameProducer {
    tx: mpsc::Sender<Frame>,
    max_frame_bytes: usize,
    capacity: usize,
}

impl FrameProducer {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check_size(&self, frame: &Frame) -> Result<()> {
        if frame.byte_len() > self.max_frame_bytes {
            return Err(Error::ResourceExhausted(format!(
                "frame of {} bytes exceeds the {} byte ceiling",
                frame.byte_len(),
                self.max_frame_bytes
            )));
        }
        Ok(())
    }

    /// Blocking push for decoder threads. Errors when the consumer is gone.
    pub fn blocking_push(&self, frame: Frame) -> Result<()> {
        self.check_size(&frame)?;
        self.tx
            .blocking_send(frame)
            .map_err(|_| Error::Internal("frame buffer consumer dropped".into()))
    }

    /// Async push for in-task producers.
    pub async fn push(&self, frame: Frame) -> Result<()> {
        self.check_size(&frame)?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| Error::Internal("frame buffer consumer dropped".into()))
    }
}

/// Detection-side handle.
pub struct FrameConsumer {
    rx: mpsc::Receiver<Frame>,
}

impl FrameConsumer {
    /// Next frame, `None` once the producer is dropped and the buffer
    /// drained.
    pub async fn next(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CHANNELS_GRAY;

    fn small_frame() -> Frame {
        Frame::new(8, 8, CHANNELS_GRAY, vec![0u8; 64]).unwrap()
    }

    #[test]
    fn capacity_floor_is_eight() {
        assert_eq!(buffer_capacity(1), 8);
        assert_eq!(buffer_capacity(3), 8);
        assert_eq!(buffer_capacity(6), 12);
    }

    #[tokio::test]
    async fn buffer_never_exceeds_capacity() {
        let (producer, mut consumer) = frame_channel(1, DEFAULT_MAX_FRAME_BYTES);
        // Fill to capacity without a consumer
        for _ in 0..producer.capacity() {
            producer.push(small_frame()).await.unwrap();
        }
        // The next push must not complete until the consumer drains
        let extra = producer.push(small_frame());
        tokio::select! {
            _ = extra => panic!("push beyond capacity completed without a consumer"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
        }
        // Drain one, then the producer has room again
        assert!(consumer.next().await.is_some());
        producer.push(small_frame()).await.unwrap();
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let (producer, _consumer) = frame_channel(1, 16);
        let err = producer.push(small_frame()).await.unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
    }

    #[tokio::test]
    async fn consumer_sees_end_of_stream() {
        let (producer, mut consumer) = frame_channel(1, DEFAULT_MAX_FRAME_BYTES);
        producer.push(small_frame()).await.unwrap();
        drop(producer);
        assert!(consumer.next().await.is_some());
        assert!(consumer.next().await.is_none());
    }
}
