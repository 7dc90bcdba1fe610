//! Linked-side source: drains the FIFO through the ratio-tracking resampler
//!
//! Runs inside the Linked device's real-time callback. The mirror image of
//! the push side's pressure handling: a fresh (or freshly resized) FIFO is
//! only tapped once it is half full, and an underrun fades out instead of
//! clicking. The guard lock is held around the whole resample-read, so a
//! concurrent reconfiguration simply costs one silent block.

use std::sync::Arc;

use super::shared::{SharedState, SideFormat};
use super::DeviceSide;
use crate::delay::DelayLine;
use crate::resample::RatioResampler;
use crate::types::{AudioBlock, Sample};

/// Ready-sample multiple of the pop block required to keep draining normally
const UNDERRUN_HEADROOM: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PopState {
    Normal,
    WaitingToFill,
}

/// State owned by the pop guard lock: the resampler, its scratch buffers,
/// and the pressure state machine. Either side's `prepare` takes the lock
/// to retune the ratio; the Linked callback try-locks it to read.
pub(crate) struct PopGuard {
    pub state: PopState,
    resampler: Option<RatioResampler>,
    /// FIFO pop destination, sized for the largest input requirement
    input_block: AudioBlock,
    /// Resampled output chunk; drained into callback blocks with a carry
    /// offset so chunk and callback sizes need not match
    chunk: Vec<Vec<Sample>>,
    chunk_pos: usize,
    chunk_len: usize,
    linked_rate: f64,
    num_channels: usize,
}

impl PopGuard {
    pub fn new() -> Self {
        Self {
            state: PopState::WaitingToFill,
            resampler: None,
            input_block: AudioBlock::new(1, 0),
            chunk: Vec::new(),
            chunk_pos: 0,
            chunk_len: 0,
            linked_rate: 0.0,
            num_channels: 0,
        }
    }

    /// Build the resampler for the Linked device's current settings.
    /// Non-real-time, caller holds the guard.
    pub fn configure(
        &mut self,
        shared: &SharedState,
        num_channels: usize,
        block_size: usize,
        sample_rate: f64,
    ) -> crate::error::AudioResult<()> {
        // Until the Main side has prepared, its rate is unknown; resample
        // 1:1 rather than deriving a ratio from zero.
        let main_rate = shared.main_format.lock().sample_rate;
        let source_rate = if main_rate > 0.0 { main_rate } else { sample_rate };

        let resampler = RatioResampler::new(source_rate, sample_rate, num_channels, block_size)?;
        self.input_block = AudioBlock::new(num_channels, resampler.input_frames_max());
        self.chunk = vec![vec![0.0; block_size]; num_channels];
        self.chunk_pos = 0;
        self.chunk_len = 0;
        self.linked_rate = sample_rate;
        self.num_channels = num_channels;
        shared.set_pop_block_size(resampler.input_frames_next());
        self.resampler = Some(resampler);
        Ok(())
    }

    /// Retune the ratio after either side recorded a new nominal rate.
    /// Caller holds the guard; must run before any FIFO resize, since the
    /// pop block size feeds the capacity policy.
    pub fn update_resampling_ratio(&mut self, shared: &SharedState) {
        let Some(resampler) = self.resampler.as_mut() else {
            shared.set_pop_block_size(0);
            return;
        };
        let main_rate = shared.main_format.lock().sample_rate;
        let source_rate = if main_rate > 0.0 { main_rate } else { self.linked_rate };
        if let Err(e) = resampler.set_rates(source_rate, self.linked_rate) {
            log::warn!("Failed to update resampling ratio: {}", e);
        }
        shared.set_pop_block_size(resampler.input_frames_next());
    }

    /// Force the state machine back to `WaitingToFill`, e.g. right after a
    /// FIFO resize, so playback does not resume on a freshly cleared buffer.
    pub fn halt_until_half_filled(&mut self) {
        self.state = PopState::WaitingToFill;
        self.chunk_pos = 0;
        self.chunk_len = 0;
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Drop the resampler; the Linked device is closing.
    pub fn deconfigure(&mut self) {
        self.resampler = None;
        self.chunk_pos = 0;
        self.chunk_len = 0;
        self.state = PopState::WaitingToFill;
    }

    /// Fill the callback block from the carried chunk, resampling more out
    /// of the FIFO as needed. Real-time.
    fn read_into(&mut self, block: &mut AudioBlock, shared: &SharedState) {
        let n = block.num_samples();
        let mut filled = 0;

        while filled < n {
            if self.chunk_len == 0 && !self.produce_chunk(shared) {
                block.clear_from(filled);
                return;
            }

            let take = (n - filled).min(self.chunk_len);
            let channels = block.num_channels().min(self.num_channels);
            for ch in 0..channels {
                block.channel_mut(ch)[filled..filled + take]
                    .copy_from_slice(&self.chunk[ch][self.chunk_pos..self.chunk_pos + take]);
            }
            for ch in channels..block.num_channels() {
                block.channel_mut(ch)[filled..filled + take].fill(0.0);
            }
            filled += take;
            self.chunk_pos += take;
            self.chunk_len -= take;
        }
    }

    /// Run the state machine for one chunk and resample it out of the FIFO.
    /// Returns false when no audio should be produced (still filling).
    fn produce_chunk(&mut self, shared: &SharedState) -> bool {
        let Some(resampler) = self.resampler.as_mut() else {
            return false;
        };

        let needed = resampler.input_frames_next();
        let ready = shared.fifo.num_ready();
        let capacity = shared.fifo.capacity();

        let (gain_start, gain_end) = match self.state {
            PopState::WaitingToFill => {
                if capacity > 0 && ready >= capacity / 2 {
                    self.state = PopState::Normal;
                    (0.0, 1.0)
                } else {
                    return false;
                }
            }
            PopState::Normal => {
                if ready as f64 >= UNDERRUN_HEADROOM * needed as f64 {
                    (1.0, 1.0)
                } else {
                    // Not enough left for the next chunk after this one:
                    // fade out on what remains and wait for a refill.
                    self.state = PopState::WaitingToFill;
                    shared.note_underrun();
                    (1.0, 0.0)
                }
            }
        };

        self.input_block.set_num_samples(needed);
        let popped = shared
            .fifo
            .pop_with_ramp(&mut self.input_block, gain_start, gain_end);
        self.input_block.clear_from(popped);

        match resampler.process_into(self.input_block.planes(), &mut self.chunk) {
            Ok((_, produced)) => {
                self.chunk_pos = 0;
                self.chunk_len = produced;
                produced > 0
            }
            Err(e) => {
                log::warn!("Resampler failed in pop path: {}", e);
                false
            }
        }
    }
}

/// The Linked device's side of the player
pub struct PopSource {
    pub(crate) shared: Arc<SharedState>,
    delay: DelayLine,
    sample_rate: f64,
    max_latency_ms: f64,
}

impl PopSource {
    pub(crate) fn new(shared: Arc<SharedState>, max_latency_ms: f64) -> Self {
        Self {
            shared,
            delay: DelayLine::new(2, max_latency_ms),
            sample_rate: 0.0,
            max_latency_ms,
        }
    }

    /// Nominal sample rate recorded at the last `prepare`.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Current smoothed Linked-side compensation delay, in samples.
    pub fn current_delay_samples(&self) -> f64 {
        self.delay.current_delay_samples()
    }

    /// Configure for the Linked device's current settings. Non-real-time.
    pub fn prepare(
        &mut self,
        num_channels: usize,
        block_size: usize,
        sample_rate: f64,
    ) -> crate::error::AudioResult<()> {
        self.delay.set_buffer_size(num_channels.max(1), self.max_latency_ms);
        self.delay.prepare(sample_rate);
        self.sample_rate = sample_rate;

        {
            // Exclude the Main callback while the capacity moves.
            let _push = self.shared.push_guard.lock();
            let mut pop = self.shared.pop_guard.lock();
            *self.shared.linked_format.lock() = SideFormat {
                block_size,
                sample_rate,
                num_channels,
            };
            pop.configure(&self.shared, num_channels, block_size, sample_rate)?;
            // NB: ratio before resize, as on the push side.
            self.shared.resize_fifo();
            pop.halt_until_half_filled();
        }

        self.shared.set_device_rate(DeviceSide::Linked, sample_rate);
        self.shared.clear_reset(DeviceSide::Linked);

        let main_rate = self.shared.main_format.lock().sample_rate;
        let ratio = if main_rate > 0.0 { main_rate / sample_rate } else { 1.0 };
        log::info!(
            "Linked side prepared: {} channels, {} frames @ {} Hz (ratio {:.6})",
            num_channels,
            block_size,
            sample_rate,
            ratio
        );
        Ok(())
    }

    /// Produce one block for the Linked device. Real-time.
    pub fn process(&mut self, block: &mut AudioBlock) {
        let observed = self.shared.device_rate(DeviceSide::Linked);
        if observed > 0.0 && (observed - self.sample_rate).abs() > 0.5 {
            block.clear();
            self.shared.flag_reset(DeviceSide::Linked);
            return;
        }

        match self.shared.pop_guard.try_lock() {
            Some(mut guard) => guard.read_into(block, &self.shared),
            // A reconfiguration holds the guard: silence, never a stall.
            None => block.clear(),
        }

        let latency = self.shared.latency_ms() as f64;
        self.delay.set_delay_ms((-latency).max(0.0));
        self.delay.process(block);
    }

    /// Force the state machine to wait for a half-full FIFO before
    /// resuming. Callable whenever the buffer has been resized or cleared.
    pub fn halt_until_half_filled(&self) {
        self.shared.pop_guard.lock().halt_until_half_filled();
    }

    /// Release Linked-side resources. Non-real-time.
    pub fn release(&mut self) {
        self.delay.release();
        self.shared.pop_guard.lock().deconfigure();
    }
}
