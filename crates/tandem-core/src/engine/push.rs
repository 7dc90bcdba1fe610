//! Main-side source: pulls upstream audio and pushes it into the FIFO
//!
//! Runs inside the Main device's real-time callback. Overflow pressure is
//! handled with a two-state hysteresis machine: the fade-out on entering
//! `WaitingForSpace` and the fade-in on leaving it keep every transition
//! click-free, and the distinct enter/exit thresholds (1.2 blocks of free
//! space vs. half the capacity) stop the machine from chattering when the
//! fill level hovers at a boundary.

use std::sync::Arc;

use super::shared::{SharedState, SideFormat};
use super::DeviceSide;
use crate::delay::DelayLine;
use crate::types::AudioBlock;

/// Free-space multiple of the block size required to keep pushing normally
const OVERFLOW_HEADROOM: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushState {
    Normal,
    WaitingForSpace,
}

/// State owned by the push guard lock
pub(crate) struct PushGuard {
    pub state: PushState,
}

impl PushGuard {
    pub fn new() -> Self {
        Self {
            state: PushState::Normal,
        }
    }
}

/// The Main device's side of the player
pub struct PushSource {
    pub(crate) shared: Arc<SharedState>,
    delay: DelayLine,
    block_size: usize,
    sample_rate: f64,
    max_latency_ms: f64,
}

impl PushSource {
    pub(crate) fn new(shared: Arc<SharedState>, max_latency_ms: f64) -> Self {
        Self {
            shared,
            delay: DelayLine::new(2, max_latency_ms),
            block_size: 0,
            sample_rate: 0.0,
            max_latency_ms,
        }
    }

    /// Nominal sample rate recorded at the last `prepare`.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Current smoothed Main-side compensation delay, in samples.
    pub fn current_delay_samples(&self) -> f64 {
        self.delay.current_delay_samples()
    }

    /// Configure for the Main device's current settings. Non-real-time;
    /// invoked from the device's own lifecycle whenever it (re)opens.
    pub fn prepare(&mut self, num_channels: usize, block_size: usize, sample_rate: f64) {
        if let Some(source) = self.shared.source.lock().as_mut() {
            source.prepare(block_size, sample_rate);
        }

        self.delay.set_buffer_size(num_channels.max(1), self.max_latency_ms);
        self.delay.prepare(sample_rate);

        self.block_size = block_size;
        self.sample_rate = sample_rate;

        {
            // Exclude the Linked callback while the ratio and capacity move.
            let mut pop = self.shared.pop_guard.lock();
            *self.shared.main_format.lock() = SideFormat {
                block_size,
                sample_rate,
                num_channels,
            };
            // NB: always update the resampling ratio before resizing the
            // FIFO; the pop block size depends on the ratio.
            pop.update_resampling_ratio(&self.shared);
            self.shared.resize_fifo();
            pop.halt_until_half_filled();
        }

        self.shared.set_device_rate(DeviceSide::Main, sample_rate);
        self.shared.clear_reset(DeviceSide::Main);

        log::info!(
            "Main side prepared: {} channels, {} frames @ {} Hz",
            num_channels,
            block_size,
            sample_rate
        );
    }

    /// Produce one block for the Main device. Real-time.
    pub fn process(&mut self, block: &mut AudioBlock) {
        let observed = self.shared.device_rate(DeviceSide::Main);
        if observed > 0.0 && (observed - self.sample_rate).abs() > 0.5 {
            // The device is no longer running at the rate we prepared for;
            // hand the reconciliation to the drift monitor.
            block.clear();
            self.shared.flag_reset(DeviceSide::Main);
            return;
        }

        match self.shared.source.try_lock() {
            Some(mut source) => match source.as_mut() {
                Some(source) => source.process(block),
                None => block.clear(),
            },
            // Attach/detach in flight: one silent block instead of waiting.
            None => block.clear(),
        }

        if let Some(mut guard) = self.shared.push_guard.try_lock() {
            let free = self.shared.fifo.free_space();
            let n = block.num_samples();

            match guard.state {
                PushState::Normal => {
                    if free as f64 >= OVERFLOW_HEADROOM * n as f64 {
                        self.shared.fifo.push(block);
                    } else {
                        self.shared.fifo.push_with_ramp(block, 1.0, 0.0);
                        guard.state = PushState::WaitingForSpace;
                        self.shared.note_overrun();
                    }
                }
                PushState::WaitingForSpace => {
                    if free >= self.shared.fifo.capacity() / 2 {
                        self.shared.fifo.push_with_ramp(block, 0.0, 1.0);
                        guard.state = PushState::Normal;
                    }
                    // Still waiting: drop the block. Pushing dribbles while
                    // the other side refills would just thrash the machine.
                }
            }
        }

        let latency = self.shared.latency_ms() as f64;
        self.delay.set_delay_ms(latency.max(0.0));
        self.delay.process(block);
    }

    /// Release Main-side resources. Non-real-time; the caller must have
    /// deregistered the device callback first.
    pub fn release(&mut self) {
        if let Some(source) = self.shared.source.lock().as_mut() {
            source.release();
        }
        self.delay.release();
    }
}
