//! Fractional delay line for latency compensation
//!
//! Each side of the player owns one of these and runs its output block
//! through it after the FIFO stage. The delay target is set in milliseconds
//! from the UI thread and tracked with a 50 ms linear ramp so a moving
//! latency slider never produces clicks. Reads are interpolated with a
//! 4-point cubic kernel, falling back to linear interpolation below one
//! sample of delay where no 4-tap neighbourhood exists yet.

use crate::types::{AudioBlock, LinearSmoothed, Sample, DEFAULT_SAMPLE_RATE};

/// Ramp time for delay changes
const DELAY_SMOOTHING_SECONDS: f64 = 0.05;

/// Extra history samples so the interpolator's taps stay in bounds
const INTERP_MARGIN: usize = 4;

/// Per-channel circular history with a smoothly ramped fractional delay
pub struct DelayLine {
    buffers: Vec<Vec<Sample>>,
    write_pos: usize,
    num_channels: usize,
    max_delay_ms: f64,
    max_delay_samples: usize,
    sample_rate: f64,
    delay_smoothed: LinearSmoothed,
    /// Buffer sizing requested via `set_buffer_size`, applied at `prepare`
    resize_pending: bool,
}

impl DelayLine {
    /// Create a delay line; the buffer is sized at the next `prepare` call.
    pub fn new(num_channels: usize, max_delay_ms: f64) -> Self {
        Self {
            buffers: Vec::new(),
            write_pos: 0,
            num_channels: num_channels.max(1),
            max_delay_ms: max_delay_ms.max(0.0),
            max_delay_samples: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            delay_smoothed: LinearSmoothed::new(0.0),
            resize_pending: true,
        }
    }

    /// Request a new channel count and maximum delay.
    ///
    /// The change is deferred until the next `prepare` call, which is the
    /// only place the history buffers are reallocated.
    pub fn set_buffer_size(&mut self, num_channels: usize, max_delay_ms: f64) {
        self.num_channels = num_channels.max(1);
        self.max_delay_ms = max_delay_ms.max(0.0);
        self.resize_pending = true;
    }

    /// True once the history matches the last requested size.
    pub fn is_buffer_ready(&self) -> bool {
        !self.resize_pending
    }

    /// Set the delay target in milliseconds (real-time safe; ramped).
    pub fn set_delay_ms(&mut self, delay_ms: f64) {
        let samples = self.sample_rate * 0.001 * delay_ms;
        self.set_delay_samples(samples);
    }

    /// Set the delay target in samples (real-time safe; ramped).
    ///
    /// The request is clamped to `[0, max_delay]`.
    pub fn set_delay_samples(&mut self, delay_samples: f64) {
        let clamped = delay_samples.clamp(0.0, self.max_delay_samples as f64);
        self.delay_smoothed.set_target(clamped);
    }

    /// Current smoothed delay in samples.
    pub fn current_delay_samples(&self) -> f64 {
        self.delay_smoothed.current()
    }

    /// Allocate the history for the current sample rate and apply any
    /// pending resize. Non-real-time.
    pub fn prepare(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.max_delay_samples = (sample_rate * 0.001 * self.max_delay_ms) as usize + 1;

        let len = self.max_delay_samples + INTERP_MARGIN;
        self.buffers = vec![vec![0.0; len]; self.num_channels];
        self.write_pos = 0;
        self.resize_pending = false;

        self.delay_smoothed.reset(sample_rate, DELAY_SMOOTHING_SECONDS);
    }

    /// Push the block through the delay in place, sample by sample.
    pub fn process(&mut self, block: &mut AudioBlock) {
        debug_assert!(!self.resize_pending, "DelayLine::prepare must run before process");
        if self.buffers.is_empty() {
            return;
        }

        let len = self.buffers[0].len();
        let channels = self.num_channels.min(block.num_channels());

        for i in 0..block.num_samples() {
            let delay = self.delay_smoothed.next();

            for ch in 0..channels {
                let buf = &mut self.buffers[ch];
                buf[self.write_pos] = block.channel(ch)[i];
                block.channel_mut(ch)[i] = read_fractional(buf, self.write_pos, delay);
            }
            self.write_pos = (self.write_pos + 1) % len;
        }
    }

    /// Clear the history and snap the smoothed delay to zero.
    pub fn release(&mut self) {
        for buf in &mut self.buffers {
            buf.fill(0.0);
        }
        self.write_pos = 0;
        self.delay_smoothed.set_current_and_target(0.0);
    }
}

/// Read `delay` samples behind `write_pos` with fractional interpolation.
///
/// `write_pos` is the index of the most recently written sample.
#[inline]
fn read_fractional(buf: &[Sample], write_pos: usize, delay: f64) -> Sample {
    let len = buf.len();
    let tap = |offset: usize| buf[(write_pos + len - offset) % len];

    if delay < 1.0 {
        // No 4-tap neighbourhood this close to the write head; linear
        // interpolation is exact at both endpoints and meets the cubic
        // kernel continuously at delay == 1.
        let t = delay as Sample;
        return tap(0) * (1.0 - t) + tap(1) * t;
    }

    let whole = delay.floor();
    let t = (delay - whole) as Sample;
    let d = whole as usize;

    // 4-point Catmull-Rom around the read position: s1 is `d` samples back,
    // s0 one newer, s2/s3 older.
    let s0 = tap(d - 1);
    let s1 = tap(d);
    let s2 = tap(d + 1);
    let s3 = tap(d + 2);

    let t2 = t * t;
    let t3 = t2 * t;
    let c0 = -0.5 * t3 + t2 - 0.5 * t;
    let c1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let c2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let c3 = 0.5 * t3 - 0.5 * t2;

    s0 * c0 + s1 * c1 + s2 * c2 + s3 * c3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_block(len: usize) -> AudioBlock {
        let mut block = AudioBlock::new(1, len);
        block.clear();
        block.channel_mut(0)[0] = 1.0;
        block
    }

    #[test]
    fn test_zero_delay_is_identity() {
        let mut delay = DelayLine::new(1, 100.0);
        delay.prepare(48000.0);

        let mut block = AudioBlock::new(1, 16);
        for (i, s) in block.channel_mut(0).iter_mut().enumerate() {
            *s = i as f32;
        }
        let expected: Vec<f32> = (0..16).map(|i| i as f32).collect();
        delay.process(&mut block);
        assert_eq!(block.channel(0), &expected[..]);
    }

    #[test]
    fn test_integer_delay_shifts_impulse() {
        let mut delay = DelayLine::new(1, 100.0);
        delay.prepare(48000.0);
        delay.set_delay_samples(10.0);

        // Let the 50 ms ramp settle on the target first
        let mut settle = AudioBlock::new(1, 48000 / 2);
        settle.clear();
        delay.process(&mut settle);

        let mut block = impulse_block(64);
        delay.process(&mut block);

        let out = block.channel(0);
        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
            .unwrap()
            .0;
        assert_eq!(peak, 10);
        assert!((out[10] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_delay_clamped_to_max() {
        let mut delay = DelayLine::new(1, 10.0);
        delay.prepare(1000.0); // max = 10 samples + 1
        delay.set_delay_samples(1_000_000.0);

        let mut settle = AudioBlock::new(1, 512);
        settle.clear();
        delay.process(&mut settle);

        assert!(delay.current_delay_samples() <= 11.0);
    }

    #[test]
    fn test_delay_change_ramps_without_jump() {
        let mut delay = DelayLine::new(1, 100.0);
        delay.prepare(1000.0);
        delay.set_delay_samples(50.0);

        let mut block = AudioBlock::new(1, 25);
        block.clear();
        delay.process(&mut block);

        // 50 ms ramp at 1 kHz = 50 samples; halfway through it the smoothed
        // delay sits near half the target.
        let mid = delay.current_delay_samples();
        assert!(mid > 15.0 && mid < 35.0, "smoothed delay jumped: {}", mid);
    }

    #[test]
    fn test_fractional_delay_interpolates() {
        let mut delay = DelayLine::new(1, 100.0);
        delay.prepare(1000.0);
        delay.set_delay_samples(4.5);

        let mut settle = AudioBlock::new(1, 512);
        settle.clear();
        delay.process(&mut settle);

        // Delay a constant signal: interpolation between equal samples must
        // reproduce the constant once the history has filled.
        let mut block = AudioBlock::new(1, 32);
        for s in block.channel_mut(0) {
            *s = 1.0;
        }
        delay.process(&mut block);
        let tail = &block.channel(0)[8..];
        for &s in tail {
            assert!((s - 1.0).abs() < 1e-4, "constant not preserved: {}", s);
        }
    }

    #[test]
    fn test_release_clears_history() {
        let mut delay = DelayLine::new(1, 100.0);
        delay.prepare(1000.0);
        delay.set_delay_samples(20.0);

        let mut block = AudioBlock::new(1, 64);
        for s in block.channel_mut(0) {
            *s = 1.0;
        }
        delay.process(&mut block);

        delay.release();
        assert_eq!(delay.current_delay_samples(), 0.0);

        let mut silent = AudioBlock::new(1, 64);
        silent.clear();
        delay.process(&mut silent);
        assert!(silent.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_resize_deferred_until_prepare() {
        let mut delay = DelayLine::new(1, 100.0);
        delay.prepare(48000.0);
        assert!(delay.is_buffer_ready());

        delay.set_buffer_size(2, 250.0);
        assert!(!delay.is_buffer_ready());

        delay.prepare(48000.0);
        assert!(delay.is_buffer_ready());
    }
}
