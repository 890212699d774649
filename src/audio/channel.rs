//! Single-device audio arbitration
//!
//! One physical input stream and one physical output stream exist; at most
//! one logical consumer may record and at most one may play at any instant.
//! Acquiring a role held by a different consumer fails with a busy error
//! rather than queuing. The same consumer may hold both roles (full-duplex),
//! which is what allows barge-in detection during assistant playback.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::AudioSettings;
use crate::{Error, Result};

use super::frame::AudioFrame;

/// Settle time added after the output queue drains, covering the device
/// ring buffer still playing the final frame.
const DRAIN_TAIL: Duration = Duration::from_millis(120);

/// Logical consumers that may hold an audio role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consumer {
    /// Idle-phase wake word detection
    WakeDetector,
    /// An active conversation session
    Session,
    /// Sound cue playback between phases
    Cue,
    /// CLI diagnostics (test-mic, test-speaker)
    Diagnostics,
}

impl std::fmt::Display for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WakeDetector => write!(f, "wake_detector"),
            Self::Session => write!(f, "session"),
            Self::Cue => write!(f, "cue"),
            Self::Diagnostics => write!(f, "diagnostics"),
        }
    }
}

struct RouteState {
    input_holder: Option<Consumer>,
    input_epoch: u64,
    input_queue: VecDeque<AudioFrame>,
    dropped_since_acquire: u64,
    output_holder: Option<Consumer>,
    output_epoch: u64,
    sink: VecDeque<AudioFrame>,
    in_flight: bool,
    flush_gen: u64,
    fault: Option<String>,
}

struct ChannelInner {
    settings: AudioSettings,
    state: Mutex<RouteState>,
    input_ready: Notify,
    sink_consumed: Notify,
}

impl ChannelInner {
    fn state(&self) -> MutexGuard<'_, RouteState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn wake_all(&self) {
        self.input_ready.notify_waiters();
        self.sink_consumed.notify_waiters();
    }
}

/// Arbitrates the single input/output device pair between consumers.
///
/// Cloning is cheap; all clones share the same routing state.
#[derive(Clone)]
pub struct AudioChannel {
    inner: Arc<ChannelInner>,
}

impl AudioChannel {
    /// Create a channel for the given audio settings.
    #[must_use]
    pub fn new(settings: &AudioSettings) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                settings: settings.clone(),
                state: Mutex::new(RouteState {
                    input_holder: None,
                    input_epoch: 0,
                    input_queue: VecDeque::new(),
                    dropped_since_acquire: 0,
                    output_holder: None,
                    output_epoch: 0,
                    sink: VecDeque::new(),
                    in_flight: false,
                    flush_gen: 0,
                    fault: None,
                }),
                input_ready: Notify::new(),
                sink_consumed: Notify::new(),
            }),
        }
    }

    /// Audio settings this channel was built with.
    #[must_use]
    pub fn settings(&self) -> &AudioSettings {
        &self.inner.settings
    }

    /// Acquire the input role.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if a different consumer holds the role.
    pub fn acquire_input(&self, consumer: Consumer) -> Result<InputHandle> {
        let mut s = self.inner.state();
        match s.input_holder {
            Some(holder) if holder != consumer => {
                return Err(Error::Busy(format!("input held by {holder}")));
            }
            _ => {}
        }
        s.input_holder = Some(consumer);
        s.input_epoch += 1;
        s.input_queue.clear();
        s.dropped_since_acquire = 0;
        let epoch = s.input_epoch;
        drop(s);
        tracing::debug!(consumer = %consumer, "input role acquired");
        Ok(InputHandle {
            inner: Arc::clone(&self.inner),
            consumer,
            epoch,
        })
    }

    /// Acquire the output role.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if a different consumer holds the role.
    pub fn acquire_output(&self, consumer: Consumer) -> Result<OutputHandle> {
        let mut s = self.inner.state();
        match s.output_holder {
            Some(holder) if holder != consumer => {
                return Err(Error::Busy(format!("output held by {holder}")));
            }
            _ => {}
        }
        s.output_holder = Some(consumer);
        s.output_epoch += 1;
        s.sink.clear();
        let epoch = s.output_epoch;
        drop(s);
        tracing::debug!(consumer = %consumer, "output role acquired");
        Ok(OutputHandle {
            inner: Arc::clone(&self.inner),
            consumer,
            epoch,
        })
    }

    /// Atomically transfer the input role from one consumer to another.
    ///
    /// The swap happens under the routing lock: every frame fed is routed
    /// to whichever consumer holds the role at that instant, so no frame
    /// is lost or double-delivered across the handoff.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if `from` does not currently hold the role.
    pub fn handoff_input(&self, from: Consumer, to: Consumer) -> Result<InputHandle> {
        let mut s = self.inner.state();
        if s.input_holder != Some(from) {
            let held = s
                .input_holder
                .map_or_else(|| "nobody".to_string(), |c| c.to_string());
            return Err(Error::Busy(format!(
                "input handoff from {from} but held by {held}"
            )));
        }
        s.input_holder = Some(to);
        s.input_epoch += 1;
        s.input_queue.clear();
        s.dropped_since_acquire = 0;
        let epoch = s.input_epoch;
        drop(s);
        self.inner.input_ready.notify_waiters();
        tracing::debug!(from = %from, to = %to, "input role handed off");
        Ok(InputHandle {
            inner: Arc::clone(&self.inner),
            consumer: to,
            epoch,
        })
    }

    /// Current input role holder, if any.
    #[must_use]
    pub fn active_input(&self) -> Option<Consumer> {
        self.inner.state().input_holder
    }

    /// Current output role holder, if any.
    #[must_use]
    pub fn active_output(&self) -> Option<Consumer> {
        self.inner.state().output_holder
    }

    /// Discard buffered output on behalf of the holding consumer.
    ///
    /// Equivalent to [`OutputHandle::clear`] but callable from a task
    /// that shares the channel rather than the handle; the barge-in
    /// detector uses this to silence playback from the capture side.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if `consumer` does not hold the output role.
    pub fn clear_output(&self, consumer: Consumer) -> Result<()> {
        let mut s = self.inner.state();
        if s.output_holder != Some(consumer) {
            let held = s
                .output_holder
                .map_or_else(|| "nobody".to_string(), |c| c.to_string());
            return Err(Error::Busy(format!(
                "output clear by {consumer} but held by {held}"
            )));
        }
        let discarded = s.sink.len();
        s.sink.clear();
        s.flush_gen += 1;
        drop(s);
        self.inner.sink_consumed.notify_waiters();
        if discarded > 0 {
            tracing::debug!(frames = discarded, "output buffer cleared");
        }
        Ok(())
    }

    // --- engine side ---

    /// Route a captured frame to the current input holder.
    ///
    /// Called by the device engine (or a test feeder). With no holder the
    /// frame is discarded; with a full queue the oldest pending frame is
    /// evicted so the consumer always sees the freshest audio.
    pub fn feed(&self, frame: AudioFrame) {
        let mut s = self.inner.state();
        if s.input_holder.is_none() {
            return;
        }
        if s.input_queue.len() >= self.inner.settings.queue_frames {
            s.input_queue.pop_front();
            s.dropped_since_acquire += 1;
            if s.dropped_since_acquire == 1 {
                tracing::warn!("input consumer falling behind, dropping oldest frames");
            }
        }
        s.input_queue.push_back(frame);
        drop(s);
        self.inner.input_ready.notify_waiters();
    }

    /// Latch a device fault. All pending and future operations on the
    /// active handles fail with `Error::Device` until the fault clears.
    pub fn fault(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(error = %message, "audio device fault");
        self.inner.state().fault = Some(message);
        self.inner.wake_all();
    }

    /// Clear a latched fault after the engine recovers.
    pub fn clear_fault(&self) {
        self.inner.state().fault = None;
    }

    /// Pop the next output frame for the device, marking playback active.
    ///
    /// Returns the frame together with the flush generation it belongs to;
    /// the engine discards buffered samples whose generation is stale.
    #[must_use]
    pub fn try_pop_output(&self) -> Option<(AudioFrame, u64)> {
        let mut s = self.inner.state();
        let frame = s.sink.pop_front()?;
        s.in_flight = true;
        let generation = s.flush_gen;
        drop(s);
        self.inner.sink_consumed.notify_waiters();
        Some((frame, generation))
    }

    /// Mark the device ring empty, releasing `drained()` waiters.
    pub fn output_idle(&self) {
        self.inner.state().in_flight = false;
        self.inner.sink_consumed.notify_waiters();
    }

    /// Current flush generation; bumped on every output clear.
    #[must_use]
    pub fn flush_gen(&self) -> u64 {
        self.inner.state().flush_gen
    }

    /// Frames evicted since the current input holder acquired its role.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.inner.state().dropped_since_acquire
    }
}

/// Exclusive handle on the input role returning captured frames in order.
pub struct InputHandle {
    inner: Arc<ChannelInner>,
    consumer: Consumer,
    epoch: u64,
}

impl std::fmt::Debug for InputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputHandle")
            .field("consumer", &self.consumer)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl InputHandle {
    /// Wait for the next captured frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` on a latched device fault and
    /// `Error::Channel` if the role was revoked (handoff or release).
    pub async fn next_frame(&mut self) -> Result<AudioFrame> {
        loop {
            // Register as a waiter before checking state so a feed
            // landing in between is not lost.
            let mut ready = pin!(self.inner.input_ready.notified());
            ready.as_mut().enable();
            {
                let mut s = self.inner.state();
                if let Some(fault) = &s.fault {
                    return Err(Error::Device(fault.clone()));
                }
                if s.input_epoch != self.epoch {
                    return Err(Error::Channel(format!(
                        "input role revoked from {}",
                        self.consumer
                    )));
                }
                if let Some(frame) = s.input_queue.pop_front() {
                    return Ok(frame);
                }
            }
            ready.await;
        }
    }

    /// The consumer this handle belongs to.
    #[must_use]
    pub const fn consumer(&self) -> Consumer {
        self.consumer
    }
}

impl Drop for InputHandle {
    fn drop(&mut self) {
        let mut s = self.inner.state();
        if s.input_epoch == self.epoch && s.input_holder == Some(self.consumer) {
            s.input_holder = None;
            s.input_epoch += 1;
            s.input_queue.clear();
            drop(s);
            self.inner.input_ready.notify_waiters();
        }
    }
}

/// Exclusive handle on the output role accepting frames for playback.
pub struct OutputHandle {
    inner: Arc<ChannelInner>,
    consumer: Consumer,
    epoch: u64,
}

impl OutputHandle {
    /// Queue a frame for playback.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` on a latched fault and `Error::Channel`
    /// if the role was revoked.
    pub fn write(&self, frame: AudioFrame) -> Result<()> {
        let mut s = self.inner.state();
        if let Some(fault) = &s.fault {
            return Err(Error::Device(fault.clone()));
        }
        if s.output_epoch != self.epoch {
            return Err(Error::Channel(format!(
                "output role revoked from {}",
                self.consumer
            )));
        }
        s.sink.push_back(frame);
        Ok(())
    }

    /// Discard all buffered output immediately.
    ///
    /// Bumps the flush generation so the engine also drops any samples it
    /// has already pulled but not yet played. This is the barge-in path;
    /// it must not wait on the device.
    ///
    /// # Errors
    ///
    /// Returns `Error::Channel` if the role was revoked.
    pub fn clear(&self) -> Result<()> {
        let mut s = self.inner.state();
        if s.output_epoch != self.epoch {
            return Err(Error::Channel(format!(
                "output role revoked from {}",
                self.consumer
            )));
        }
        let discarded = s.sink.len();
        s.sink.clear();
        s.flush_gen += 1;
        drop(s);
        self.inner.sink_consumed.notify_waiters();
        if discarded > 0 {
            tracing::debug!(frames = discarded, "output buffer cleared");
        }
        Ok(())
    }

    /// Number of frames waiting to be pulled by the engine.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state().sink.len()
    }

    /// Wait until every queued frame has been pulled and played.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` on a latched fault and `Error::Channel`
    /// if the role was revoked.
    pub async fn drained(&self) -> Result<()> {
        loop {
            let mut consumed = pin!(self.inner.sink_consumed.notified());
            consumed.as_mut().enable();
            {
                let s = self.inner.state();
                if let Some(fault) = &s.fault {
                    return Err(Error::Device(fault.clone()));
                }
                if s.output_epoch != self.epoch {
                    return Err(Error::Channel(format!(
                        "output role revoked from {}",
                        self.consumer
                    )));
                }
                if s.sink.is_empty() && !s.in_flight {
                    break;
                }
            }
            consumed.await;
        }
        tokio::time::sleep(DRAIN_TAIL).await;
        Ok(())
    }

    /// The consumer this handle belongs to.
    #[must_use]
    pub const fn consumer(&self) -> Consumer {
        self.consumer
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        let mut s = self.inner.state();
        if s.output_epoch == self.epoch && s.output_holder == Some(self.consumer) {
            s.output_holder = None;
            s.output_epoch += 1;
            s.sink.clear();
            drop(s);
            self.inner.sink_consumed.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioSettings;

    fn channel() -> AudioChannel {
        AudioChannel::new(&AudioSettings::default())
    }

    #[test]
    fn second_consumer_gets_busy() {
        let ch = channel();
        let _input = ch.acquire_input(Consumer::WakeDetector).unwrap();
        let err = ch.acquire_input(Consumer::Session).unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
    }

    #[test]
    fn same_consumer_holds_both_roles() {
        let ch = channel();
        let _input = ch.acquire_input(Consumer::Session).unwrap();
        let _output = ch.acquire_output(Consumer::Session).unwrap();
        assert_eq!(ch.active_input(), Some(Consumer::Session));
        assert_eq!(ch.active_output(), Some(Consumer::Session));
    }

    #[test]
    fn dropping_handles_frees_both_roles() {
        let ch = channel();
        let input = ch.acquire_input(Consumer::Session).unwrap();
        let output = ch.acquire_output(Consumer::Session).unwrap();
        drop(input);
        drop(output);
        assert_eq!(ch.active_input(), None);
        assert_eq!(ch.active_output(), None);
        let _again = ch.acquire_input(Consumer::WakeDetector).unwrap();
    }

    #[test]
    fn handoff_requires_current_holder() {
        let ch = channel();
        let _input = ch.acquire_input(Consumer::WakeDetector).unwrap();
        let err = ch
            .handoff_input(Consumer::Session, Consumer::WakeDetector)
            .unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
    }

    #[tokio::test]
    async fn handoff_starts_new_holder_fresh() {
        let ch = channel();
        let wake = ch.acquire_input(Consumer::WakeDetector).unwrap();
        ch.feed(AudioFrame::new(vec![1], 24_000));
        let mut session = ch
            .handoff_input(Consumer::WakeDetector, Consumer::Session)
            .unwrap();
        ch.feed(AudioFrame::new(vec![2], 24_000));
        // frames queued before the handoff were meant for the old holder
        assert_eq!(session.next_frame().await.unwrap().samples, vec![2]);
        drop(wake);
        assert_eq!(ch.active_input(), Some(Consumer::Session));
    }

    #[tokio::test]
    async fn revoked_handle_errors_instead_of_stealing_frames() {
        let ch = channel();
        let mut wake = ch.acquire_input(Consumer::WakeDetector).unwrap();
        let _session = ch
            .handoff_input(Consumer::WakeDetector, Consumer::Session)
            .unwrap();
        let err = wake.next_frame().await.unwrap_err();
        assert!(matches!(err, Error::Channel(_)));
    }

    #[test]
    fn drop_releases_role() {
        let ch = channel();
        {
            let _input = ch.acquire_input(Consumer::WakeDetector).unwrap();
            assert_eq!(ch.active_input(), Some(Consumer::WakeDetector));
        }
        assert_eq!(ch.active_input(), None);
    }

    #[test]
    fn feed_without_holder_discards() {
        let ch = channel();
        ch.feed(AudioFrame::silence(720, 24_000));
        assert_eq!(ch.dropped_frames(), 0);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let settings = AudioSettings {
            queue_frames: 2,
            ..AudioSettings::default()
        };
        let ch = AudioChannel::new(&settings);
        let _input = ch.acquire_input(Consumer::WakeDetector).unwrap();
        ch.feed(AudioFrame::new(vec![1], 24_000));
        ch.feed(AudioFrame::new(vec![2], 24_000));
        ch.feed(AudioFrame::new(vec![3], 24_000));
        assert_eq!(ch.dropped_frames(), 1);
    }

    #[tokio::test]
    async fn frames_delivered_in_order() {
        let ch = channel();
        let mut input = ch.acquire_input(Consumer::Session).unwrap();
        ch.feed(AudioFrame::new(vec![1], 24_000));
        ch.feed(AudioFrame::new(vec![2], 24_000));
        assert_eq!(input.next_frame().await.unwrap().samples, vec![1]);
        assert_eq!(input.next_frame().await.unwrap().samples, vec![2]);
    }

    #[tokio::test]
    async fn fault_surfaces_to_waiting_consumer() {
        let ch = channel();
        let mut input = ch.acquire_input(Consumer::WakeDetector).unwrap();
        let ch2 = ch.clone();
        let waiter = tokio::spawn(async move { input.next_frame().await });
        tokio::task::yield_now().await;
        ch2.fault("stream died");
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }

    #[test]
    fn clear_output_requires_holder() {
        let ch = channel();
        let output = ch.acquire_output(Consumer::Session).unwrap();
        output.write(AudioFrame::silence(720, 24_000)).unwrap();

        let err = ch.clear_output(Consumer::Cue).unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
        assert_eq!(output.pending(), 1);

        ch.clear_output(Consumer::Session).unwrap();
        assert_eq!(output.pending(), 0);
    }

    #[tokio::test]
    async fn clear_discards_pending_output() {
        let ch = channel();
        let output = ch.acquire_output(Consumer::Session).unwrap();
        output.write(AudioFrame::silence(720, 24_000)).unwrap();
        output.write(AudioFrame::silence(720, 24_000)).unwrap();
        assert_eq!(output.pending(), 2);
        let gen_before = ch.flush_gen();
        output.clear().unwrap();
        assert_eq!(output.pending(), 0);
        assert_eq!(ch.flush_gen(), gen_before + 1);
        assert!(ch.try_pop_output().is_none());
    }
}
