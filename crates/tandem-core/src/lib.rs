//! Tandem Core - synchronized playback of one audio stream on two
//! independently clocked output devices
//!
//! The Main device is the timing reference; the Linked device follows it
//! through a shared FIFO, a ratio-tracking resampler and per-side
//! fractional delay lines for operator-adjustable latency compensation.

pub mod audio;
pub mod config;
pub mod delay;
pub mod engine;
pub mod error;
pub mod fifo;
pub mod resample;
pub mod source;
pub mod types;

pub use engine::{
    DevicePoll, DeviceSide, DriftMonitor, PopSource, PressureCounters, PushSource, SyncEngine,
    DEFAULT_MAX_LATENCY_MS,
};
pub use error::{AudioError, AudioResult};
pub use source::AudioSource;
pub use types::{AudioBlock, Sample};
