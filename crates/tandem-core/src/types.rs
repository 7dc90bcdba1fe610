//! Common types for tandem
//!
//! This module contains the fundamental audio types used throughout the
//! engine: the planar multi-channel block that flows between the device
//! callbacks and the core, and the ramped parameter value used for
//! click-free delay changes.

/// Audio sample type (32-bit float throughout the processing chain)
pub type Sample = f32;

/// Default sample rate assumed before a device reports its own
pub const DEFAULT_SAMPLE_RATE: f64 = 48000.0;

/// A planar multi-channel audio block
///
/// Each channel is a contiguous slice of samples. Device callbacks own one
/// pre-allocated block per side and adjust its working length to the frame
/// count the driver delivers; no allocation ever happens in the callback.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    channels: Vec<Vec<Sample>>,
    num_samples: usize,
}

impl AudioBlock {
    /// Create a block with the given channel count and capacity, filled with
    /// silence and with its working length set to the full capacity.
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        Self {
            channels: vec![vec![0.0; capacity]; num_channels],
            num_samples: capacity,
        }
    }

    /// Number of channels in the block
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Working length in samples per channel
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Set the working length (real-time safe: never allocates)
    ///
    /// Panics in debug builds if `len` exceeds the allocated capacity.
    #[inline]
    pub fn set_num_samples(&mut self, len: usize) {
        debug_assert!(
            self.channels.iter().all(|c| len <= c.len()),
            "set_num_samples beyond allocated capacity"
        );
        self.num_samples = len;
    }

    /// Get one channel's samples, limited to the working length
    #[inline]
    pub fn channel(&self, ch: usize) -> &[Sample] {
        &self.channels[ch][..self.num_samples]
    }

    /// Get one channel's samples mutably, limited to the working length
    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [Sample] {
        &mut self.channels[ch][..self.num_samples]
    }

    /// Fill the whole working region with silence
    pub fn clear(&mut self) {
        for ch in &mut self.channels {
            ch[..self.num_samples].fill(0.0);
        }
    }

    /// Clear the working region from `start` to the end, e.g. after a
    /// truncated FIFO pop.
    pub fn clear_from(&mut self, start: usize) {
        let end = self.num_samples;
        for ch in &mut self.channels {
            ch[start.min(end)..end].fill(0.0);
        }
    }

    /// Scale the working region by a gain factor
    pub fn apply_gain(&mut self, gain: Sample) {
        for ch in &mut self.channels {
            for s in &mut ch[..self.num_samples] {
                *s *= gain;
            }
        }
    }

    /// Deinterleave a device buffer `[L, R, L, R, ...]` into this block.
    ///
    /// Copies `min(self.num_channels, frame_channels)` channels; any
    /// remaining block channels are cleared. Sets the working length to the
    /// frame count.
    pub fn copy_from_interleaved(&mut self, data: &[Sample], frame_channels: usize) {
        let frames = if frame_channels == 0 { 0 } else { data.len() / frame_channels };
        self.set_num_samples(frames);
        let shared = self.channels.len().min(frame_channels);
        for ch in 0..shared {
            let dst = &mut self.channels[ch];
            for (i, frame) in data.chunks_exact(frame_channels).enumerate() {
                dst[i] = frame[ch];
            }
        }
        for ch in shared..self.channels.len() {
            self.channels[ch][..frames].fill(0.0);
        }
    }

    /// Raw per-channel storage, full capacity. Used to hand the block to
    /// APIs that take plain channel slices (e.g. the resampler).
    pub(crate) fn planes(&self) -> &[Vec<Sample>] {
        &self.channels
    }

    /// Interleave the working region into a device buffer.
    ///
    /// Channels the block does not have are written as silence.
    pub fn copy_to_interleaved(&self, data: &mut [Sample], frame_channels: usize) {
        for (i, frame) in data.chunks_exact_mut(frame_channels).enumerate() {
            for (ch, out) in frame.iter_mut().enumerate() {
                *out = if ch < self.channels.len() && i < self.num_samples {
                    self.channels[ch][i]
                } else {
                    0.0
                };
            }
        }
    }
}

/// A linearly ramped parameter value
///
/// Changing the target does not jump the current value; it ramps there over
/// a fixed time constant, one step per sample. Used by the delay line to
/// avoid clicks from discontinuous delay changes.
#[derive(Debug, Clone)]
pub struct LinearSmoothed {
    current: f64,
    target: f64,
    step: f64,
    steps_left: usize,
    ramp_samples: usize,
}

impl LinearSmoothed {
    pub fn new(initial: f64) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            steps_left: 0,
            ramp_samples: 0,
        }
    }

    /// Reset the ramp length and snap to the current target
    pub fn reset(&mut self, sample_rate: f64, ramp_seconds: f64) {
        self.ramp_samples = (sample_rate * ramp_seconds).round().max(1.0) as usize;
        self.current = self.target;
        self.step = 0.0;
        self.steps_left = 0;
    }

    /// Set a new target; the value ramps there over the configured length.
    /// Re-setting the current target is a no-op, so callers may write the
    /// target every block without restarting the ramp.
    pub fn set_target(&mut self, target: f64) {
        if (target - self.target).abs() < f64::EPSILON {
            return;
        }
        self.target = target;
        if self.ramp_samples == 0 {
            self.current = target;
            self.steps_left = 0;
            return;
        }
        self.steps_left = self.ramp_samples;
        self.step = (target - self.current) / self.ramp_samples as f64;
    }

    /// Snap both current and target to a value
    pub fn set_current_and_target(&mut self, value: f64) {
        self.current = value;
        self.target = value;
        self.steps_left = 0;
        self.step = 0.0;
    }

    /// Advance one sample and return the new current value
    #[inline]
    pub fn next(&mut self) -> f64 {
        if self.steps_left > 0 {
            self.current += self.step;
            self.steps_left -= 1;
            if self.steps_left == 0 {
                self.current = self.target;
            }
        }
        self.current
    }

    #[inline]
    pub fn current(&self) -> f64 {
        self.current
    }

    #[inline]
    pub fn is_smoothing(&self) -> bool {
        self.steps_left > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_interleave_roundtrip() {
        let mut block = AudioBlock::new(2, 4);
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        block.copy_from_interleaved(&data, 2);

        assert_eq!(block.num_samples(), 4);
        assert_eq!(block.channel(0), &[1.0, 3.0, 5.0, 7.0]);
        assert_eq!(block.channel(1), &[2.0, 4.0, 6.0, 8.0]);

        let mut out = [0.0; 8];
        block.copy_to_interleaved(&mut out, 2);
        assert_eq!(out, data);
    }

    #[test]
    fn test_block_channel_mismatch_cleared() {
        let mut block = AudioBlock::new(4, 4);
        block.apply_gain(0.0);
        for s in block.channel_mut(3) {
            *s = 9.0;
        }
        // Only 2 source channels: channels 2 and 3 must not keep stale data
        block.copy_from_interleaved(&[1.0, 2.0, 1.0, 2.0], 2);
        assert!(block.channel(2).iter().all(|&s| s == 0.0));
        assert!(block.channel(3).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_block_clear_from() {
        let mut block = AudioBlock::new(1, 4);
        for s in block.channel_mut(0) {
            *s = 1.0;
        }
        block.clear_from(2);
        assert_eq!(block.channel(0), &[1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_smoothed_ramps_linearly() {
        let mut v = LinearSmoothed::new(0.0);
        v.reset(1000.0, 0.01); // 10-sample ramp
        v.set_target(10.0);

        let mut last = 0.0;
        for i in 1..=10 {
            let x = v.next();
            assert!((x - i as f64).abs() < 1e-9);
            assert!(x > last);
            last = x;
        }
        assert!(!v.is_smoothing());
        assert_eq!(v.next(), 10.0);
    }

    #[test]
    fn test_smoothed_retarget_mid_ramp() {
        let mut v = LinearSmoothed::new(0.0);
        v.reset(1000.0, 0.01);
        v.set_target(10.0);
        for _ in 0..5 {
            v.next();
        }
        // Retarget restarts the ramp from the current value
        v.set_target(0.0);
        assert!((v.current() - 5.0).abs() < 1e-9);
        for _ in 0..10 {
            v.next();
        }
        assert_eq!(v.current(), 0.0);
    }
}
