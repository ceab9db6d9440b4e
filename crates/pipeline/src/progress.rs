//! Per-job progress channels
//!
//! Workers push progress events onto a bounded single-consumer channel; the
//! session-side forwarder drains it and writes to the socket. Pushes from
//! the worker never block plugin work: intermediate events are dropped when
//! the consumer cannot keep up, while the final event of a job uses a
//! blocking push so the last value is never lost to overflow.

use tokio::sync::mpsc;

use clipsight_config::constants::PROGRESS_CHANNEL_CAPACITY;

/// Progress of one analysis job.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AnalysisProgress {
    /// Percentage, one decimal.
    pub progress: f64,
    /// Wall-clock seconds since the job started, two decimals.
    pub elapsed: f64,
    pub frames_analyzed: u64,
    pub total_frames: u64,
}

/// Progress of one transcription job.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TranscriptionProgress {
    /// Percentage, whole number.
    pub progress: u32,
    /// Processed audio duration formatted as MM:SS.
    pub elapsed: String,
}

/// Sending half of a job's progress channel, held by the worker.
#[derive(Debug, Clone)]
pub struct ProgressSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> ProgressSender<T> {
    pub fn channel() -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Non-blocking push. Dropped silently when the channel is full or the
    /// consumer is gone.
    pub fn send(&self, event: T) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Progress channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Blocking push for the final event of a job. Must be called from a
    /// blocking worker thread, never from the event loop.
    pub fn send_final(&self, event: T) {
        let _ = self.tx.blocking_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_never_blocks_when_full() {
        let (sender, mut rx) = ProgressSender::<u32>::channel();
        for i in 0..(PROGRESS_CHANNEL_CAPACITY as u32 + 50) {
            sender.send(i);
        }

        // Exactly the channel capacity made it through; the rest were dropped.
        let mut received = Vec::new();
        while let Ok(v) = rx.try_recv() {
            received.push(v);
        }
        assert_eq!(received.len(), PROGRESS_CHANNEL_CAPACITY);
        // FIFO order preserved for what was kept.
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_send_final_delivered_after_drain() {
        let (sender, mut rx) = ProgressSender::<u32>::channel();
        for i in 0..PROGRESS_CHANNEL_CAPACITY as u32 {
            sender.send(i);
        }

        let worker = std::thread::spawn(move || {
            sender.send_final(999);
        });

        // Drain until the final event arrives.
        let mut last = None;
        while let Some(v) = rx.blocking_recv() {
            last = Some(v);
            if v == 999 {
                break;
            }
        }
        worker.join().unwrap();
        assert_eq!(last, Some(999));
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (sender, rx) = ProgressSender::<u32>::channel();
        drop(rx);
        sender.send(1);
    }
}
