//! State shared between the two device sides
//!
//! The FIFO, the guard locks around each real-time side, and the parameter
//! atomics live here. Both sources hold an `Arc` to this context instead of
//! back-pointers into an owning player, so neither side ever reaches into
//! the other's internals directly.
//!
//! Lock discipline (a callback must never stall):
//! - the push guard is try-locked by the Main callback and taken blocking
//!   by the Linked side's `prepare`;
//! - the pop guard is try-locked by the Linked callback and taken blocking
//!   by either side's `prepare`;
//! - the FIFO's own storage lock is the resize guard. A resize holds all
//!   three; a callback that loses any try-acquire substitutes silence.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::pop::PopGuard;
use super::push::PushGuard;
use super::DeviceSide;
use crate::fifo::AudioFifo;
use crate::source::AudioSource;

/// FIFO capacity multiplier over the larger side's block size. Chosen
/// generously so block-size and resampling-ratio asymmetry between two
/// independently configured devices never starves either side.
pub(crate) const FIFO_BLOCKS: usize = 6;

/// Block size and sample rate a side was configured with at its most
/// recent `prepare`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SideFormat {
    pub block_size: usize,
    pub sample_rate: f64,
    pub num_channels: usize,
}

/// Buffer-pressure diagnostics; pressure recovers locally and is counted
/// here rather than surfaced as an error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PressureCounters {
    /// Times the push side hit the overflow threshold and faded out
    pub overruns: u64,
    /// Times the pop side hit the underrun threshold and faded out
    pub underruns: u64,
}

pub(crate) struct SharedState {
    pub fifo: AudioFifo,
    pub push_guard: Mutex<PushGuard>,
    pub pop_guard: Mutex<PopGuard>,
    pub source: Mutex<Option<Box<dyn AudioSource>>>,

    pub main_format: Mutex<SideFormat>,
    pub linked_format: Mutex<SideFormat>,
    /// Input frames the resampler needs per Linked block, at the current
    /// ratio; part of the FIFO sizing policy.
    pop_block_size: AtomicUsize,

    /// Signed latency in ms; positive delays Main, negative delays Linked
    latency_ms: AtomicU32,
    main_gain: AtomicU32,
    linked_gain: AtomicU32,

    /// Factual device rates observed by the monitor thread (f32 bits,
    /// 0 = not yet observed)
    main_device_rate: AtomicU32,
    linked_device_rate: AtomicU32,
    main_needs_reset: AtomicBool,
    linked_needs_reset: AtomicBool,

    overruns: AtomicU64,
    underruns: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            fifo: AudioFifo::new(2, 32),
            push_guard: Mutex::new(PushGuard::new()),
            pop_guard: Mutex::new(PopGuard::new()),
            source: Mutex::new(None),
            main_format: Mutex::new(SideFormat::default()),
            linked_format: Mutex::new(SideFormat::default()),
            pop_block_size: AtomicUsize::new(0),
            latency_ms: AtomicU32::new(0.0f32.to_bits()),
            main_gain: AtomicU32::new(1.0f32.to_bits()),
            linked_gain: AtomicU32::new(1.0f32.to_bits()),
            main_device_rate: AtomicU32::new(0),
            linked_device_rate: AtomicU32::new(0),
            main_needs_reset: AtomicBool::new(false),
            linked_needs_reset: AtomicBool::new(false),
            overruns: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Parameters (written by the UI thread, read once per callback)
    // ────────────────────────────────────────────────────────────────────

    pub fn latency_ms(&self) -> f32 {
        f32::from_bits(self.latency_ms.load(Ordering::Relaxed))
    }

    pub fn set_latency_ms(&self, ms: f32) {
        self.latency_ms.store(ms.to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self, side: DeviceSide) -> f32 {
        let atomic = match side {
            DeviceSide::Main => &self.main_gain,
            DeviceSide::Linked => &self.linked_gain,
        };
        f32::from_bits(atomic.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, side: DeviceSide, gain: f32) {
        let atomic = match side {
            DeviceSide::Main => &self.main_gain,
            DeviceSide::Linked => &self.linked_gain,
        };
        atomic.store(gain.to_bits(), Ordering::Relaxed);
    }

    // ────────────────────────────────────────────────────────────────────
    // Drift observation
    // ────────────────────────────────────────────────────────────────────

    /// Factual device rate last observed for a side; 0.0 until first polled.
    pub fn device_rate(&self, side: DeviceSide) -> f64 {
        let atomic = match side {
            DeviceSide::Main => &self.main_device_rate,
            DeviceSide::Linked => &self.linked_device_rate,
        };
        f32::from_bits(atomic.load(Ordering::Relaxed)) as f64
    }

    pub fn set_device_rate(&self, side: DeviceSide, rate: f64) {
        let atomic = match side {
            DeviceSide::Main => &self.main_device_rate,
            DeviceSide::Linked => &self.linked_device_rate,
        };
        atomic.store((rate as f32).to_bits(), Ordering::Relaxed);
    }

    pub fn flag_reset(&self, side: DeviceSide) {
        match side {
            DeviceSide::Main => self.main_needs_reset.store(true, Ordering::Release),
            DeviceSide::Linked => self.linked_needs_reset.store(true, Ordering::Release),
        }
    }

    pub fn clear_reset(&self, side: DeviceSide) {
        match side {
            DeviceSide::Main => self.main_needs_reset.store(false, Ordering::Release),
            DeviceSide::Linked => self.linked_needs_reset.store(false, Ordering::Release),
        }
    }

    pub fn needs_reset(&self, side: DeviceSide) -> bool {
        match side {
            DeviceSide::Main => self.main_needs_reset.load(Ordering::Acquire),
            DeviceSide::Linked => self.linked_needs_reset.load(Ordering::Acquire),
        }
    }

    /// Consume a side's needs-reset flag; returns whether it was set.
    pub fn take_needs_reset(&self, side: DeviceSide) -> bool {
        match side {
            DeviceSide::Main => self.main_needs_reset.swap(false, Ordering::AcqRel),
            DeviceSide::Linked => self.linked_needs_reset.swap(false, Ordering::AcqRel),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Pressure diagnostics
    // ────────────────────────────────────────────────────────────────────

    pub fn note_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pressure_counters(&self) -> PressureCounters {
        PressureCounters {
            overruns: self.overruns.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // FIFO sizing
    // ────────────────────────────────────────────────────────────────────

    pub fn set_pop_block_size(&self, frames: usize) {
        self.pop_block_size.store(frames, Ordering::Relaxed);
    }

    pub fn pop_block_size(&self) -> usize {
        self.pop_block_size.load(Ordering::Relaxed)
    }

    /// Re-derive the FIFO capacity from the current block sizes.
    ///
    /// Callers must hold both side guards; the resampling ratio (and with
    /// it the pop block size) must already be up to date, since the
    /// capacity depends on it.
    pub fn resize_fifo(&self) {
        let main = *self.main_format.lock();
        let largest = main.block_size.max(self.pop_block_size());
        if largest == 0 {
            return;
        }
        let channels = if main.num_channels > 0 {
            main.num_channels
        } else {
            self.fifo.num_channels().max(1)
        };
        self.fifo.set_size(channels, FIFO_BLOCKS * largest);
    }
}
