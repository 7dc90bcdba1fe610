//! Upstream audio source capability
//!
//! The engine plays whatever the hosting application hands it: a file
//! player, a synth, a test tone. The only contract is the prepare /
//! process / release triple, mirroring the device lifecycle. Sources are
//! boxed trait objects owned by the engine's shared state.

use crate::types::AudioBlock;

/// Something that can produce audio blocks on demand
///
/// `process` is called from the Main device's real-time callback and must
/// neither block nor allocate. `prepare` and `release` are non-real-time.
pub trait AudioSource: Send {
    /// Called before playback starts and again whenever the Main device's
    /// block size or sample rate changes.
    fn prepare(&mut self, block_size: usize, sample_rate: f64);

    /// Fill the block's working region with the next audio.
    fn process(&mut self, block: &mut AudioBlock);

    /// Called when playback stops; drop any per-run state.
    fn release(&mut self);
}
