//! Ratio-tracking resampler between the two device clocks
//!
//! The FIFO holds samples produced at the Main device's nominal rate; the
//! Linked device drains it at its own nominal rate. This wrapper owns a
//! `rubato` polynomial resampler with a fixed output chunk (the Linked
//! block size) and exposes the engine's ratio convention:
//! `ratio = main nominal rate / linked nominal rate`, so the input frames
//! required per output chunk (the "pop block size") scale with the ratio.
//!
//! Construction and rate changes happen only from non-real-time `prepare`
//! paths; `process_into` is allocation-free and safe in the callback.

use rubato::{FastFixedOut, PolynomialDegree, Resampler};

use crate::error::{AudioError, AudioResult};
use crate::types::Sample;

/// Headroom for ratio updates relative to the construction-time ratio.
/// Covers any realistic divergence between two device rates (44.1k..192k).
const MAX_RATIO_RELATIVE: f64 = 16.0;

/// Streaming resampler with a continuously adjustable rate ratio
pub struct RatioResampler {
    inner: FastFixedOut<Sample>,
    source_rate: f64,
    target_rate: f64,
    num_channels: usize,
    chunk_size: usize,
}

impl RatioResampler {
    /// Create a resampler producing `chunk_size` output frames per process
    /// call for `num_channels` channels.
    ///
    /// `source_rate` is the rate of the samples entering the FIFO (Main
    /// nominal), `target_rate` the rate they leave at (Linked nominal).
    pub fn new(
        source_rate: f64,
        target_rate: f64,
        num_channels: usize,
        chunk_size: usize,
    ) -> AudioResult<Self> {
        if source_rate <= 0.0 || target_rate <= 0.0 {
            return Err(AudioError::InvalidConfig(format!(
                "sample rates must be positive (source {}, target {})",
                source_rate, target_rate
            )));
        }
        if num_channels == 0 || chunk_size == 0 {
            return Err(AudioError::InvalidConfig(
                "resampler needs at least one channel and a non-empty chunk".into(),
            ));
        }

        let inner = FastFixedOut::new(
            target_rate / source_rate,
            MAX_RATIO_RELATIVE,
            PolynomialDegree::Cubic,
            chunk_size,
            num_channels,
        )
        .map_err(|e| AudioError::Resampler(e.to_string()))?;

        Ok(Self {
            inner,
            source_rate,
            target_rate,
            num_channels,
            chunk_size,
        })
    }

    /// Current ratio, engine convention: source (Main) rate over target
    /// (Linked) rate.
    pub fn ratio(&self) -> f64 {
        self.source_rate / self.target_rate
    }

    /// Update the rates, e.g. after either side's `prepare` recorded a new
    /// nominal rate. Clears the interpolation history: the buffered signal
    /// around a rate change is stale anyway.
    pub fn set_rates(&mut self, source_rate: f64, target_rate: f64) -> AudioResult<()> {
        if source_rate <= 0.0 || target_rate <= 0.0 {
            return Err(AudioError::InvalidConfig(format!(
                "sample rates must be positive (source {}, target {})",
                source_rate, target_rate
            )));
        }
        self.inner.reset();
        self.inner
            .set_resample_ratio(target_rate / source_rate, false)
            .map_err(|e| AudioError::Resampler(e.to_string()))?;
        self.source_rate = source_rate;
        self.target_rate = target_rate;
        Ok(())
    }

    /// Input frames required for the next output chunk (the pop block size).
    pub fn input_frames_next(&self) -> usize {
        self.inner.input_frames_next()
    }

    /// Upper bound of input frames any chunk can require at the current
    /// ratio headroom. Used for scratch-buffer sizing.
    pub fn input_frames_max(&self) -> usize {
        self.inner.input_frames_max()
    }

    /// Output frames produced per process call.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Resample one chunk. `input` must hold at least `input_frames_next()`
    /// frames per channel, `output` at least `chunk_size()` frames per
    /// channel. Returns (input frames consumed, output frames written).
    pub fn process_into(
        &mut self,
        input: &[Vec<Sample>],
        output: &mut [Vec<Sample>],
    ) -> AudioResult<(usize, usize)> {
        self.inner
            .process_into_buffer(input, output, None)
            .map_err(|e| AudioError::Resampler(e.to_string()))
    }

    /// Drop all interpolation history.
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_matches_rates() {
        let rs = RatioResampler::new(48000.0, 44100.0, 2, 512).unwrap();
        assert!((rs.ratio() - 48000.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_pop_block_scales_with_ratio() {
        let rs = RatioResampler::new(48000.0, 44100.0, 2, 512).unwrap();
        let expected = 512.0 * 48000.0 / 44100.0;
        let needed = rs.input_frames_next() as f64;
        assert!(
            (needed - expected).abs() <= 16.0,
            "pop block {} far from expected {}",
            needed,
            expected
        );
    }

    #[test]
    fn test_equal_rates_near_passthrough() {
        let rs = RatioResampler::new(48000.0, 48000.0, 1, 256).unwrap();
        assert!((rs.ratio() - 1.0).abs() < 1e-12);
        let needed = rs.input_frames_next() as isize;
        assert!((needed - 256).unsigned_abs() <= 16);
    }

    #[test]
    fn test_rate_update_changes_requirement() {
        let mut rs = RatioResampler::new(48000.0, 48000.0, 1, 256).unwrap();
        let before = rs.input_frames_next() as f64;
        rs.set_rates(96000.0, 48000.0).unwrap();
        let after = rs.input_frames_next() as f64;
        assert!(after > before * 1.5, "requirement did not scale: {} -> {}", before, after);
        assert!((rs.ratio() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_process_preserves_constant_signal() {
        let mut rs = RatioResampler::new(48000.0, 44100.0, 1, 256).unwrap();
        let mut output = vec![vec![0.0f32; 256]];

        // First chunk flushes zero history; judge the second one.
        for pass in 0..2 {
            let needed = rs.input_frames_next();
            let input = vec![vec![1.0f32; needed]];
            let (used, produced) = rs.process_into(&input, &mut output).unwrap();
            assert_eq!(used, needed);
            assert_eq!(produced, 256);
            if pass == 1 {
                for &s in &output[0][64..] {
                    assert!((s - 1.0).abs() < 0.05, "constant distorted: {}", s);
                }
            }
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(RatioResampler::new(0.0, 44100.0, 2, 512).is_err());
        assert!(RatioResampler::new(48000.0, 44100.0, 0, 512).is_err());
        assert!(RatioResampler::new(48000.0, 44100.0, 2, 0).is_err());
    }
}
