//! Cross-platform device layer
//!
//! CPAL-backed device enumeration and the per-side output streams. The
//! hosting application selects devices (or takes the defaults), calls
//! [`DualOutput::start`] with its upstream source, and keeps the returned
//! handle alive for as long as playback should run.
//!
//! # Architecture
//!
//! Each device drives its own real-time callback; the two never share a
//! clock. The streams themselves live on a dedicated management thread
//! because cpal streams cannot cross threads, and the drift monitor has to
//! be able to rebuild a stream when a device's rate moves.

mod device;
mod stream;

pub use device::{
    current_device_rate, find_device_by_id, get_default_device, get_output_devices, AudioDevice,
};
pub use stream::{DualOutput, SideInfo, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
