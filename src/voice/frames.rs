//! Bounded frame queue between the capture thread and the decode worker
//!
//! Backed by a `tokio::sync::broadcast` channel: when the decoder falls
//! behind, the oldest frames are overwritten and the receiver is told how
//! many it lost. Stale audio is worth less than a short gap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;

use super::CaptureError;

/// One fixed-size block of mono PCM samples in `[-1.0, 1.0]`
#[derive(Debug, Clone)]
pub struct Frame {
    sequence: u64,
    samples: Arc<[f32]>,
}

impl Frame {
    /// Position of this frame in capture order, starting at 0
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The PCM samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples in the frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame carries no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone)]
enum Message {
    Frame(Frame),
    Shutdown,
}

/// Producer side handed to a capture backend
///
/// Cheap to clone; every clone shares the same connection flag, so
/// [`FrameSink::disconnect`] stops delivery from all of them at once.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: broadcast::Sender<Message>,
    faults: Option<mpsc::UnboundedSender<CaptureError>>,
    connected: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
}

impl FrameSink {
    /// Attach a channel that receives capture faults raised mid-session
    #[must_use]
    pub fn with_faults(mut self, faults: mpsc::UnboundedSender<CaptureError>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Push one frame; never blocks
    ///
    /// Returns `false` once the sink has been disconnected.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        if !self.is_connected() {
            return false;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = Frame {
            sequence,
            samples: samples.into(),
        };

        // No receiver means the worker already exited; its fault is reported separately
        let _ = self.tx.send(Message::Frame(frame));
        true
    }

    /// Report a capture fault (device lost, stream error)
    pub fn fault(&self, error: CaptureError) {
        if !self.is_connected() {
            return;
        }
        if let Some(faults) = &self.faults {
            let _ = faults.send(error);
        }
    }

    /// Stop delivering frames and faults from every clone of this sink
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Whether frames are still being delivered
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Wake the consumer and tell it to stop, regardless of connection state
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

/// Consumer side drained by the decode worker
#[derive(Debug)]
pub struct FrameReceiver {
    rx: broadcast::Receiver<Message>,
    connected: Arc<AtomicBool>,
    dropped: u64,
    discarded: u64,
}

impl FrameReceiver {
    /// Block until the next frame arrives
    ///
    /// Returns `None` on shutdown, once every sink is gone, or as soon as the
    /// sink is disconnected; frames still queued at that point are discarded.
    /// Must not be called from inside an async context.
    pub fn blocking_next(&mut self) -> Option<Frame> {
        loop {
            let received = self.rx.blocking_recv();
            if let Some(outcome) = self.handle(received) {
                return outcome;
            }
        }
    }

    /// Wait for the next frame
    pub async fn next(&mut self) -> Option<Frame> {
        loop {
            let received = self.rx.recv().await;
            if let Some(outcome) = self.handle(received) {
                return outcome;
            }
        }
    }

    /// Frames overwritten because the consumer fell behind
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Queued frames thrown away after a disconnect
    #[must_use]
    pub const fn discarded(&self) -> u64 {
        self.discarded
    }

    fn handle(&mut self, received: Result<Message, RecvError>) -> Option<Option<Frame>> {
        match received {
            Ok(Message::Frame(_)) if !self.connected.load(Ordering::SeqCst) => {
                self.discarded = 1 + self.rx.len() as u64;
                Some(None)
            }
            Ok(Message::Frame(frame)) => Some(Some(frame)),
            Ok(Message::Shutdown) | Err(RecvError::Closed) => Some(None),
            Err(RecvError::Lagged(count)) => {
                self.dropped += count;
                tracing::warn!(
                    dropped = count,
                    total_dropped = self.dropped,
                    "decoder fell behind, dropped oldest audio frames"
                );
                None
            }
        }
    }
}

/// Create a frame queue holding at most `capacity` frames
///
/// The capacity is rounded up to the next power of two by the underlying
/// channel; zero is treated as one.
#[must_use]
pub fn frame_queue(capacity: usize) -> (FrameSink, FrameReceiver) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    let connected = Arc::new(AtomicBool::new(true));
    let sink = FrameSink {
        tx,
        faults: None,
        connected: Arc::clone(&connected),
        sequence: Arc::new(AtomicU64::new(0)),
    };
    let receiver = FrameReceiver {
        rx,
        connected,
        dropped: 0,
        discarded: 0,
    };
    (sink, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_arrive_in_capture_order() {
        let (sink, mut rx) = frame_queue(8);
        for i in 0..3 {
            assert!(sink.push(vec![i as f32; 4]));
        }

        for expected in 0..3 {
            let frame = rx.next().await.unwrap();
            assert_eq!(frame.sequence(), expected);
            assert_eq!(frame.len(), 4);
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let (sink, mut rx) = frame_queue(4);
        for i in 0..6 {
            sink.push(vec![i as f32]);
        }

        let first = rx.next().await.unwrap();
        assert_eq!(first.sequence(), 2);
        assert_eq!(rx.dropped(), 2);

        let rest: Vec<u64> = [rx.next().await, rx.next().await, rx.next().await]
            .into_iter()
            .map(|f| f.unwrap().sequence())
            .collect();
        assert_eq!(rest, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_disconnect_stops_every_clone() {
        let (sink, _rx) = frame_queue(4);
        let clone = sink.clone();
        sink.disconnect();

        assert!(!clone.is_connected());
        assert!(!clone.push(vec![0.0]));
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream_even_when_disconnected() {
        let (sink, mut rx) = frame_queue(4);
        sink.disconnect();
        sink.shutdown();

        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_discards_queued_frames() {
        let (sink, mut rx) = frame_queue(8);
        for _ in 0..5 {
            sink.push(vec![0.0; 2]);
        }
        sink.disconnect();

        assert!(rx.next().await.is_none());
        assert_eq!(rx.discarded(), 5);
    }

    #[tokio::test]
    async fn test_faults_are_forwarded_while_connected() {
        let (faults_tx, mut faults_rx) = mpsc::unbounded_channel();
        let (sink, _rx) = frame_queue(4);
        let sink = sink.with_faults(faults_tx);

        sink.fault(CaptureError::Device("unplugged".to_string()));
        assert_eq!(
            faults_rx.recv().await,
            Some(CaptureError::Device("unplugged".to_string()))
        );

        sink.disconnect();
        sink.fault(CaptureError::Device("late".to_string()));
        assert!(faults_rx.try_recv().is_err());
    }

    #[test]
    fn test_blocking_next_returns_none_when_sinks_dropped() {
        let (sink, mut rx) = frame_queue(4);
        sink.push(vec![0.5; 2]);
        drop(sink);

        assert!(rx.blocking_next().is_some());
        assert!(rx.blocking_next().is_none());
    }
}
