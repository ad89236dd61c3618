//! Capture abstraction and the single-slot latest-frame buffer.
//!
//! `capture_task` is the only place that talks to the capture hardware: it
//! polls a `CaptureDevice` on a fixed interval and publishes every result
//! into a `FrameSlot`. Request handlers never capture directly; each consumer
//! holds a `FrameSource` and performs a single non-blocking acquire per
//! cycle. Publishing overwrites the previous slot content unconditionally, so
//! a slow consumer never blocks frame production and missed frames are
//! dropped silently.

extern crate alloc;

use alloc::{sync::Arc, vec::Vec};

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::{Duration, Instant, Timer};

/// One captured JPEG image.
///
/// The payload is a copy taken while the device still owned its buffer; by
/// the time a `Frame` is visible here the device buffer is already back in
/// its pool. Consumers release the frame by dropping their clone.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonically increasing per-publication sequence number.
    pub seq: u32,
    pub captured_at: Instant,
    pub data: Arc<[u8]>,
}

/// Outcome of one capture cycle as seen by consumers.
#[derive(Debug, Clone)]
pub enum FrameEvent {
    Captured(Frame),
    /// The device failed this cycle. Push-mode consumers skip it; the
    /// chunked stream ends its connection on it.
    CaptureFailed,
}

/// Abstraction over the camera hardware.
///
/// `init` failure is unrecoverable for the process lifetime; callers must
/// refuse to serve rather than stream garbage. `capture` failure is
/// transient and retried on the next cycle.
pub trait CaptureDevice {
    type Error: core::fmt::Debug;

    async fn init(&mut self) -> Result<(), Self::Error>;

    /// Produce the next completed frame as an owned JPEG byte sequence.
    async fn capture(&mut self) -> Result<Vec<u8>, Self::Error>;
}

struct SlotState {
    latest: Option<FrameEvent>,
    seq: u32,
}

/// Single-slot "latest wins" frame buffer shared between the capture task and
/// any number of stream consumers.
///
/// The mutex is held only for the copy in or out; no handler blocks while
/// holding the slot.
pub struct FrameSlot {
    state: Mutex<CriticalSectionRawMutex, SlotState>,
}

impl FrameSlot {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                latest: None,
                seq: 0,
            }),
        }
    }

    /// Publish a captured frame, discarding whatever was in the slot.
    pub async fn publish(
        &self,
        data: Vec<u8>,
    ) {
        let mut state = self.state.lock().await;
        state.seq += 1;
        state.latest = Some(FrameEvent::Captured(Frame {
            seq: state.seq,
            captured_at: Instant::now(),
            data: data.into(),
        }));
    }

    /// Publish a failed-cycle marker.
    pub async fn publish_failure(&self) {
        let mut state = self.state.lock().await;
        state.seq += 1;
        state.latest = Some(FrameEvent::CaptureFailed);
    }

    async fn take_after(
        &self,
        seen: u32,
    ) -> Option<(u32, FrameEvent)> {
        let state = self.state.lock().await;
        if state.seq > seen {
            state.latest.clone().map(|event| (state.seq, event))
        } else {
            None
        }
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-consumer accessor over a `FrameSlot`.
///
/// Tracks the last sequence number this consumer has seen, so each
/// publication is returned at most once per consumer and delivered sequence
/// numbers are monotonic.
pub struct FrameSource<'a> {
    slot: &'a FrameSlot,
    last_seq: u32,
}

impl<'a> FrameSource<'a> {
    pub fn new(slot: &'a FrameSlot) -> Self {
        Self { slot, last_seq: 0 }
    }

    /// Non-blocking acquire of the most recent unseen publication.
    ///
    /// Returns `None` when nothing new has been published since the last
    /// call. Intermediate frames this consumer never saw are simply skipped.
    pub async fn acquire(&mut self) -> Option<FrameEvent> {
        let (seq, event) = self.slot.take_after(self.last_seq).await?;
        self.last_seq = seq;
        Some(event)
    }
}

/// Background frame producer.
///
/// Runs as a dedicated task: polls the device on a fixed interval, publishes
/// frames into the slot, logs and skips failed cycles.
pub async fn capture_task<D: CaptureDevice>(
    mut device: D,
    slot: &FrameSlot,
    interval: Duration,
) -> ! {
    loop {
        match device.capture().await {
            Ok(data) => {
                tracing::trace!(len = data.len(), "frame captured");
                slot.publish(data).await;
            }
            Err(error) => {
                tracing::warn!(?error, "capture failed, skipping cycle");
                slot.publish_failure().await;
            }
        }
        Timer::after(interval).await;
    }
}
