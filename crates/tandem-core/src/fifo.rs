//! Lock-free FIFO for audio samples
//!
//! A fixed-capacity multi-channel circular buffer shared between the Main
//! push callback and the Linked pop callback. Cursors are monotonically
//! increasing atomics updated only by their own side, so free-space and
//! ready counts can be read concurrently without extra locking.
//!
//! Resizing swaps in freshly built storage under a write lock; both
//! real-time sides acquire the storage read lock with `try_read` and treat
//! contention as "no samples moved" for that callback.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::types::{AudioBlock, Sample};

/// Backing storage plus cursors; replaced wholesale on resize
struct FifoStorage {
    channels: Vec<Box<[Sample]>>,
    capacity: usize,
    /// Write cursor (only advanced by the producer)
    write_pos: AtomicUsize,
    /// Read cursor (only advanced by the consumer)
    read_pos: AtomicUsize,
}

impl FifoStorage {
    fn new(num_channels: usize, capacity: usize) -> Self {
        Self {
            channels: (0..num_channels)
                .map(|_| vec![0.0; capacity].into_boxed_slice())
                .collect(),
            capacity,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn num_ready(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    #[inline]
    fn free_space(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.capacity - write.wrapping_sub(read)
    }

    /// Split a span starting at cursor `pos` into the two segments it
    /// occupies in the circular storage.
    #[inline]
    fn segments(&self, pos: usize, len: usize) -> (usize, usize, usize) {
        let start = pos % self.capacity;
        let len1 = len.min(self.capacity - start);
        (start, len1, len - len1)
    }

    /// Write one sample of one channel.
    ///
    /// SAFETY: callers must hold the producer role exclusively (enforced by
    /// the engine's push guard) and `idx < capacity`. The consumer never
    /// reads the region between the read and write cursors being filled
    /// here until `write_pos` is published with Release ordering.
    #[inline]
    unsafe fn write_sample(&self, ch: usize, idx: usize, value: Sample) {
        let ptr = self.channels[ch].as_ptr() as *mut Sample;
        ptr.add(idx).write(value);
    }

    fn push(&self, block: &AudioBlock, gain_start: f32, gain_end: f32) -> usize {
        let n = block.num_samples().min(self.free_space());
        if n == 0 {
            return 0;
        }

        let write = self.write_pos.load(Ordering::Relaxed);
        let (start, len1, len2) = self.segments(write, n);
        let gain_step = (gain_end - gain_start) / n as f32;
        let ramped = gain_start != 1.0 || gain_end != 1.0;

        for ch in 0..self.channels.len() {
            if ch < block.num_channels() {
                let src = block.channel(ch);
                for i in 0..n {
                    let idx = if i < len1 { start + i } else { i - len1 };
                    // The per-sample gain continues across the wrap boundary,
                    // so the ramp stays continuous when the write straddles it.
                    let g = if ramped { gain_start + gain_step * i as f32 } else { 1.0 };
                    unsafe { self.write_sample(ch, idx, src[i] * g) };
                }
            } else {
                // Fewer input channels than the FIFO holds: never leave the
                // extra channels stale.
                for i in 0..len1 {
                    unsafe { self.write_sample(ch, start + i, 0.0) };
                }
                for i in 0..len2 {
                    unsafe { self.write_sample(ch, i, 0.0) };
                }
            }
        }

        self.write_pos.store(write.wrapping_add(n), Ordering::Release);
        n
    }

    fn pop(&self, block: &mut AudioBlock, gain_start: f32, gain_end: f32) -> usize {
        let n = block.num_samples().min(self.num_ready());
        if n == 0 {
            return 0;
        }

        let read = self.read_pos.load(Ordering::Relaxed);
        let (start, len1, _) = self.segments(read, n);
        let gain_step = (gain_end - gain_start) / n as f32;
        let ramped = gain_start != 1.0 || gain_end != 1.0;
        let shared = self.channels.len().min(block.num_channels());

        for ch in 0..shared {
            let src = &self.channels[ch];
            let dst = block.channel_mut(ch);
            for i in 0..n {
                let idx = if i < len1 { start + i } else { i - len1 };
                let g = if ramped { gain_start + gain_step * i as f32 } else { 1.0 };
                dst[i] = src[idx] * g;
            }
        }
        // Destination channels the FIFO does not have read as silence.
        for ch in shared..block.num_channels() {
            block.channel_mut(ch)[..n].fill(0.0);
        }

        self.read_pos.store(read.wrapping_add(n), Ordering::Release);
        n
    }
}

/// Multi-channel FIFO with gain-ramped push/pop
///
/// Owned by the synchronization engine; the push and pop sources hold
/// non-owning references. All sample-moving operations are total: they
/// clamp to the available space/samples and return the count actually
/// transferred.
pub struct AudioFifo {
    inner: RwLock<FifoStorage>,
}

impl AudioFifo {
    /// Create a FIFO with the given channel count and capacity in samples
    /// per channel.
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        Self {
            inner: RwLock::new(FifoStorage::new(num_channels, capacity)),
        }
    }

    /// Number of channels of audio data this FIFO holds.
    ///
    /// Returns 0 while a resize is in progress.
    pub fn num_channels(&self) -> usize {
        self.inner.try_read().map_or(0, |s| s.channels.len())
    }

    /// Allocated samples per channel. Returns 0 while a resize is in
    /// progress.
    pub fn capacity(&self) -> usize {
        self.inner.try_read().map_or(0, |s| s.capacity)
    }

    /// Samples that can currently be pushed without overflowing.
    pub fn free_space(&self) -> usize {
        self.inner.try_read().map_or(0, |s| s.free_space())
    }

    /// Samples that can currently be popped.
    pub fn num_ready(&self) -> usize {
        self.inner.try_read().map_or(0, |s| s.num_ready())
    }

    /// Push the block's working region into free space.
    ///
    /// Returns the number of samples written per channel; excess samples
    /// beyond the free space are dropped. Never blocks.
    pub fn push(&self, block: &AudioBlock) -> usize {
        self.push_with_ramp(block, 1.0, 1.0)
    }

    /// Push with a linear gain ramp from `gain_start` to `gain_end` across
    /// the written span.
    pub fn push_with_ramp(&self, block: &AudioBlock, gain_start: f32, gain_end: f32) -> usize {
        match self.inner.try_read() {
            Some(storage) => storage.push(block, gain_start, gain_end),
            None => 0,
        }
    }

    /// Pop into the block's working region.
    ///
    /// Returns the number of samples read per channel; requesting more than
    /// is ready truncates, and the caller decides how to treat the
    /// remainder (typically `block.clear_from(count)`).
    pub fn pop(&self, block: &mut AudioBlock) -> usize {
        self.pop_with_ramp(block, 1.0, 1.0)
    }

    /// Pop with a linear gain ramp across the span actually read.
    pub fn pop_with_ramp(&self, block: &mut AudioBlock, gain_start: f32, gain_end: f32) -> usize {
        match self.inner.try_read() {
            Some(storage) => storage.pop(block, gain_start, gain_end),
            None => 0,
        }
    }

    /// Change the FIFO's channel count or capacity.
    ///
    /// Non-real-time. Builds the new storage off to the side and swaps it
    /// in under the write lock, so a concurrent push/pop observes either
    /// the old buffer or the new one, never a torn state. All buffered
    /// samples are discarded.
    pub fn set_size(&self, num_channels: usize, capacity: usize) {
        debug_assert!(num_channels > 0 && capacity > 0, "FIFO must have channels and capacity");
        {
            let storage = self.inner.read();
            if storage.channels.len() == num_channels && storage.capacity == capacity {
                return;
            }
        }
        let fresh = FifoStorage::new(num_channels.max(1), capacity.max(1));
        *self.inner.write() = fresh;
        log::debug!("FIFO resized: {} channels x {} samples", num_channels, capacity);
    }

    /// Discard all buffered samples, keeping the current size.
    pub fn reset(&self) {
        let mut storage = self.inner.write();
        let (channels, capacity) = (storage.channels.len(), storage.capacity);
        *storage = FifoStorage::new(channels, capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_of(channels: usize, samples: &[Sample]) -> AudioBlock {
        let mut block = AudioBlock::new(channels, samples.len());
        for ch in 0..channels {
            block.channel_mut(ch).copy_from_slice(samples);
        }
        block
    }

    #[test]
    fn test_push_pop_roundtrip() {
        let fifo = AudioFifo::new(2, 64);
        let input: Vec<Sample> = (0..32).map(|i| i as f32 * 0.25).collect();
        let pushed = fifo.push(&block_of(2, &input));
        assert_eq!(pushed, 32);
        assert_eq!(fifo.num_ready(), 32);
        assert_eq!(fifo.free_space(), 32);

        let mut out = AudioBlock::new(2, 32);
        let popped = fifo.pop(&mut out);
        assert_eq!(popped, 32);
        for ch in 0..2 {
            assert_eq!(out.channel(ch), &input[..]);
        }
        assert_eq!(fifo.num_ready(), 0);
    }

    #[test]
    fn test_free_plus_ready_is_capacity() {
        let fifo = AudioFifo::new(1, 48);
        let data = vec![1.0; 20];
        fifo.push(&block_of(1, &data));
        assert_eq!(fifo.free_space() + fifo.num_ready(), 48);

        let mut out = AudioBlock::new(1, 7);
        fifo.pop(&mut out);
        assert_eq!(fifo.free_space() + fifo.num_ready(), 48);
    }

    #[test]
    fn test_overflow_drops_excess() {
        let fifo = AudioFifo::new(1, 16);
        let data = vec![0.5; 24];
        let pushed = fifo.push(&block_of(1, &data));
        assert_eq!(pushed, 16);
        assert_eq!(fifo.num_ready(), 16);

        // Completely full: further pushes write nothing
        assert_eq!(fifo.push(&block_of(1, &data)), 0);
        assert!(fifo.num_ready() <= fifo.capacity());
    }

    #[test]
    fn test_underrun_truncates() {
        let fifo = AudioFifo::new(1, 16);
        fifo.push(&block_of(1, &[1.0, 2.0, 3.0]));

        let mut out = AudioBlock::new(1, 8);
        out.clear();
        let popped = fifo.pop(&mut out);
        assert_eq!(popped, 3);
        out.clear_from(popped);
        assert_eq!(out.channel(0), &[1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_wrap_preserves_order() {
        let fifo = AudioFifo::new(1, 8);
        fifo.push(&block_of(1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        let mut out = AudioBlock::new(1, 4);
        fifo.pop(&mut out);

        // This push wraps around the end of the storage
        fifo.push(&block_of(1, &[7.0, 8.0, 9.0, 10.0]));
        let mut rest = AudioBlock::new(1, 6);
        assert_eq!(fifo.pop(&mut rest), 6);
        assert_eq!(rest.channel(0), &[5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn test_ramp_continuous_across_wrap() {
        let fifo = AudioFifo::new(1, 16);
        // Advance the cursors so the next push straddles the wrap point
        fifo.push(&block_of(1, &vec![0.0; 12]));
        let mut sink = AudioBlock::new(1, 12);
        fifo.pop(&mut sink);

        // Push a constant signal with a 1 -> 0 ramp; the stored samples are
        // then exactly the per-sample gain curve.
        let n = 12;
        fifo.push_with_ramp(&block_of(1, &vec![1.0; n]), 1.0, 0.0);
        let mut out = AudioBlock::new(1, n);
        fifo.pop(&mut out);

        let curve = out.channel(0);
        let step = 1.0 / n as f32;
        for pair in curve.windows(2) {
            let diff = (pair[0] - pair[1]).abs();
            assert!(
                diff <= step + 1e-6,
                "gain discontinuity {} exceeds one linear step {}",
                diff,
                step
            );
        }
        assert!((curve[0] - 1.0).abs() <= step + 1e-6);
    }

    #[test]
    fn test_missing_channels_are_zeroed() {
        let fifo = AudioFifo::new(2, 16);
        // Poison channel 1, then drain, so stale data sits in the storage
        fifo.push(&block_of(2, &[9.0; 8]));
        let mut sink = AudioBlock::new(2, 8);
        fifo.pop(&mut sink);

        // Mono push into the stereo FIFO
        fifo.push(&block_of(1, &[1.0, 2.0, 3.0, 4.0]));
        let mut out = AudioBlock::new(2, 4);
        assert_eq!(fifo.pop(&mut out), 4);
        assert_eq!(out.channel(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out.channel(1), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_pop_extra_channels_cleared() {
        let fifo = AudioFifo::new(1, 16);
        fifo.push(&block_of(1, &[1.0, 2.0]));
        let mut out = AudioBlock::new(2, 2);
        for s in out.channel_mut(1) {
            *s = 7.0;
        }
        fifo.pop(&mut out);
        assert_eq!(out.channel(1), &[0.0, 0.0]);
    }

    #[test]
    fn test_resize_discards_and_applies() {
        let fifo = AudioFifo::new(2, 32);
        fifo.push(&block_of(2, &[1.0; 10]));
        fifo.set_size(4, 128);
        assert_eq!(fifo.num_channels(), 4);
        assert_eq!(fifo.capacity(), 128);
        assert_eq!(fifo.num_ready(), 0);
        assert_eq!(fifo.free_space(), 128);
    }

    #[test]
    fn test_ramp_scenario_capacity_2048() {
        // 2 channels, capacity 2048: push 2047 samples of a 0..1 ramp,
        // expect one free slot and a bit-exact pop.
        let fifo = AudioFifo::new(2, 2048);
        let ramp: Vec<Sample> = (0..2047).map(|i| i as f32 / 2047.0).collect();
        assert_eq!(fifo.push(&block_of(2, &ramp)), 2047);
        assert_eq!(fifo.free_space(), 1);

        let mut out = AudioBlock::new(2, 2047);
        assert_eq!(fifo.pop(&mut out), 2047);
        for ch in 0..2 {
            assert_eq!(out.channel(ch), &ramp[..]);
        }
    }
}
