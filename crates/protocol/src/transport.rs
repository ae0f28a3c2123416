//! Paced, chunked display transport.
//!
//! The display is fed over a USB bulk endpoint: first the 16-byte header,
//! then the (encrypted) payload in profile-sized chunks. After the last chunk
//! the pump sleeps for whatever is left of the profile's frame interval.
//!
//! Hardware access sits behind [`BulkSink`] so the pump can be driven by
//! `rusb` in production and by an in-memory sink in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::frame::Frame;
use crate::profile::DeviceProfile;

/// Default deadline for a single bulk write.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("transfer timed out after {0:?}")]
    TransferTimeout(Duration),

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("another frame is in flight")]
    Busy,

    #[error("frame cancelled after {chunks_sent} chunks")]
    Cancelled { chunks_sent: usize },

    #[error("frame is {actual} bytes, profile expects {expected}")]
    InvalidFrameSize { actual: usize, expected: usize },

    #[error("I/O error: {0}")]
    Io(String),
}

/// A USB bulk OUT endpoint.
pub trait BulkSink {
    /// Write `data` to `endpoint`, returning the number of bytes accepted.
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;
}

/// A MIDI output port.
pub trait MidiSink {
    fn send(&mut self, message: &[u8]) -> Result<(), TransportError>;
}

impl MidiSink for Vec<Vec<u8>> {
    fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        self.push(message.to_vec());
        Ok(())
    }
}

/// Cooperative cancellation flag, checked between chunk writes.
///
/// Cancelling does not withdraw chunks already written; the device shows a
/// torn frame until the next complete one.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Split a payload into bulk writes of at most `chunk_size` bytes.
pub fn chunks(payload: &[u8], chunk_size: usize) -> std::slice::Chunks<'_, u8> {
    payload.chunks(chunk_size.max(1))
}

/// Time left in the frame budget, never negative.
pub fn remaining_budget(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Result of one frame transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub bytes: usize,
    pub chunks: usize,
    /// Time spent writing
    pub elapsed: Duration,
    /// Time spent pacing afterwards
    pub slept: Duration,
}

/// Single-producer frame writer for one device handle.
pub struct TransportPump<S> {
    profile: &'static DeviceProfile,
    sink: Mutex<S>,
    timeout: Duration,
    pacing: bool,
}

impl<S: BulkSink> TransportPump<S> {
    pub fn new(profile: &'static DeviceProfile, sink: S) -> Self {
        Self {
            profile,
            sink: Mutex::new(sink),
            timeout: DEFAULT_TRANSFER_TIMEOUT,
            pacing: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pacing(mut self, pacing: bool) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn profile(&self) -> &'static DeviceProfile {
        self.profile
    }

    /// Send one frame, waiting for any frame already in flight.
    pub fn send_frame(&self, frame: &Frame, cancel: &CancelToken) -> Result<FrameStats, TransportError> {
        let mut sink = self.sink.lock();
        self.write_frame(&mut *sink, frame, cancel)
    }

    /// Send one frame, or fail with `Busy` if another is in flight.
    pub fn try_send_frame(&self, frame: &Frame, cancel: &CancelToken) -> Result<FrameStats, TransportError> {
        let mut sink = self.sink.try_lock().ok_or(TransportError::Busy)?;
        self.write_frame(&mut *sink, frame, cancel)
    }

    pub fn into_inner(self) -> S {
        self.sink.into_inner()
    }

    fn write_frame(&self, sink: &mut S, frame: &Frame, cancel: &CancelToken) -> Result<FrameStats, TransportError> {
        let profile = self.profile;
        if frame.len() != profile.frame_len() {
            return Err(TransportError::InvalidFrameSize {
                actual: frame.len(),
                expected: profile.frame_len(),
            });
        }

        let start = Instant::now();
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled { chunks_sent: 0 });
        }
        self.write_all(sink, frame.header())?;

        let payload = frame.wire_payload(profile);
        let mut sent = 0;
        for chunk in chunks(&payload, profile.chunk_size) {
            if cancel.is_cancelled() {
                tracing::debug!(chunks_sent = sent, "frame cancelled");
                return Err(TransportError::Cancelled { chunks_sent: sent });
            }
            self.write_all(sink, chunk)?;
            sent += 1;
        }

        let elapsed = start.elapsed();
        let slept = if self.pacing {
            let budget = remaining_budget(profile.frame_interval, elapsed);
            if !budget.is_zero() {
                std::thread::sleep(budget);
            }
            budget
        } else {
            Duration::ZERO
        };

        tracing::trace!(chunks = sent, ?elapsed, ?slept, "frame sent");
        Ok(FrameStats {
            bytes: frame.len(),
            chunks: sent,
            elapsed,
            slept,
        })
    }

    fn write_all(&self, sink: &mut S, data: &[u8]) -> Result<(), TransportError> {
        let written = sink.write_bulk(self.profile.usb.endpoint, data, self.timeout)?;
        if written != data.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }
}
