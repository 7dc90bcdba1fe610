//! Error types for the non-real-time boundary
//!
//! The real-time path never produces errors: every FIFO and delay operation
//! is total over its bounds and returns a count instead of failing. Errors
//! exist only where devices are opened, streams are built and the resampler
//! is constructed.

use thiserror::Error;

/// Errors that can occur during audio setup and reconfiguration
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    /// Failed to get default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Invalid engine configuration rejected at the non-real-time boundary
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resampler construction or reconfiguration failed
    #[error("Resampler error: {0}")]
    Resampler(String),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
