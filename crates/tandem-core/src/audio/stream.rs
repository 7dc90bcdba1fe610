//! Device streams for the two player sides
//!
//! Builds one cpal output stream per side and keeps both alive on a
//! dedicated management thread (cpal streams cannot move between threads,
//! and the drift monitor needs to rebuild them from its own thread). The
//! per-device gain stage lives in the stream callback, after the side's
//! processing, so a gain change never touches the shared FIFO path.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleRate, Stream, StreamConfig};
use crossbeam::channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;

use super::device::{current_device_rate, find_device_by_id, get_default_device, pick_output_config};
use crate::config::{DeviceId, PlayerSettings};
use crate::engine::{
    DevicePoll, DeviceSide, DriftMonitor, PopSource, PressureCounters, PushSource, SyncEngine,
    DEFAULT_MAX_LATENCY_MS,
};
use crate::error::{AudioError, AudioResult};
use crate::source::AudioSource;
use crate::types::AudioBlock;

/// Safe default when no buffer size preference is configured (frames)
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Largest callback we pre-allocate for (frames)
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Negotiated stream parameters for one side
#[derive(Debug, Clone, Copy)]
pub struct SideInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_frames: u32,
}

#[derive(Debug)]
enum StreamCommand {
    /// Rebuild one side's stream at the given sample rate
    Reopen(DeviceSide, f64),
    Shutdown,
}

/// The side-specific processor a stream callback drives
#[derive(Clone)]
enum SideProcessor {
    Push(Arc<Mutex<PushSource>>),
    Pop(Arc<Mutex<PopSource>>),
}

impl SideProcessor {
    fn prepare(&self, channels: usize, block_size: usize, sample_rate: f64) -> AudioResult<()> {
        match self {
            SideProcessor::Push(push) => {
                push.lock().prepare(channels, block_size, sample_rate);
                Ok(())
            }
            SideProcessor::Pop(pop) => pop.lock().prepare(channels, block_size, sample_rate),
        }
    }

    /// Fill the block, or clear it if the side is being reconfigured.
    fn process(&self, block: &mut AudioBlock) {
        match self {
            SideProcessor::Push(push) => match push.try_lock() {
                Some(mut side) => side.process(block),
                None => block.clear(),
            },
            SideProcessor::Pop(pop) => match pop.try_lock() {
                Some(mut side) => side.process(block),
                None => block.clear(),
            },
        }
    }

    fn release(&self) {
        match self {
            SideProcessor::Push(push) => push.lock().release(),
            SideProcessor::Pop(pop) => pop.lock().release(),
        }
    }
}

/// Both device streams plus the drift monitor, wired and running
///
/// Dropping (or calling `stop`) tears down in the order the engine needs:
/// monitor first, then the streams, then the sides' resources.
pub struct DualOutput {
    engine: SyncEngine,
    cmd_tx: Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
    monitor: Option<DriftMonitor>,
    main_info: SideInfo,
    linked_info: SideInfo,
}

impl DualOutput {
    /// Open both devices, start playback of `source` and spawn the drift
    /// monitor.
    pub fn start(settings: &PlayerSettings, source: Box<dyn AudioSource>) -> AudioResult<Self> {
        let (engine, push, pop) = SyncEngine::new(DEFAULT_MAX_LATENCY_MS);
        engine.set_latency_ms(settings.latency_ms);
        engine.set_gain(DeviceSide::Main, settings.main_gain);
        engine.set_gain(DeviceSide::Linked, settings.linked_gain);
        engine.attach_source(source);

        let main_device = resolve_device(settings.main_device.as_ref())?;
        let linked_device = resolve_device(settings.linked_device.as_ref())?;
        log::info!(
            "Main device: {}",
            main_device.name().unwrap_or_else(|_| "Unknown".to_string())
        );
        log::info!(
            "Linked device: {}",
            linked_device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let prefs = (settings.sample_rate, settings.buffer_size);
        let (cmd_tx, cmd_rx) = unbounded::<StreamCommand>();
        let (ready_tx, ready_rx) = bounded::<AudioResult<(SideInfo, SideInfo)>>(1);

        let thread = thread::Builder::new()
            .name("tandem-streams".to_string())
            .spawn({
                let engine = engine.clone();
                let main_device = main_device.clone();
                let linked_device = linked_device.clone();
                move || {
                    stream_thread(
                        engine,
                        push,
                        pop,
                        main_device,
                        linked_device,
                        prefs,
                        cmd_rx,
                        ready_tx,
                    )
                }
            })
            .map_err(|e| {
                AudioError::StreamBuildError(format!("failed to spawn stream thread: {}", e))
            })?;

        let (main_info, linked_info) = match ready_rx.recv() {
            Ok(Ok(infos)) => infos,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(AudioError::StreamBuildError(
                    "stream thread exited during startup".to_string(),
                ));
            }
        };

        let monitor = DriftMonitor::spawn(
            engine.clone(),
            RatePoller {
                main: main_device,
                linked: linked_device,
                cmd_tx: cmd_tx.clone(),
            },
        )?;

        log::info!("Dual-device playback started");

        Ok(Self {
            engine,
            cmd_tx,
            thread: Some(thread),
            monitor: Some(monitor),
            main_info,
            linked_info,
        })
    }

    /// The engine's control handle (latency, gains, source, diagnostics).
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn main_info(&self) -> SideInfo {
        self.main_info
    }

    pub fn linked_info(&self) -> SideInfo {
        self.linked_info
    }

    pub fn set_latency_ms(&self, ms: f32) {
        self.engine.set_latency_ms(ms);
    }

    pub fn set_gain(&self, side: DeviceSide, gain: f32) {
        self.engine.set_gain(side, gain);
    }

    pub fn pressure_counters(&self) -> PressureCounters {
        self.engine.pressure_counters()
    }

    /// Stop playback and release all resources.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Monitor first, so no reopen can race the teardown
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        let _ = self.cmd_tx.send(StreamCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        log::info!("Dual-device playback stopped");
    }
}

impl Drop for DualOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_device(id: Option<&DeviceId>) -> AudioResult<cpal::Device> {
    match id {
        Some(id) => find_device_by_id(id),
        None => get_default_device(),
    }
}

/// Rate poller handed to the drift monitor: observes each device's factual
/// default rate and forwards reopen requests to the stream thread.
struct RatePoller {
    main: cpal::Device,
    linked: cpal::Device,
    cmd_tx: Sender<StreamCommand>,
}

impl DevicePoll for RatePoller {
    fn poll_rate(&mut self, side: DeviceSide) -> Option<f64> {
        let device = match side {
            DeviceSide::Main => &self.main,
            DeviceSide::Linked => &self.linked,
        };
        current_device_rate(device)
    }

    fn reopen(&mut self, side: DeviceSide, sample_rate: f64) {
        let _ = self.cmd_tx.send(StreamCommand::Reopen(side, sample_rate));
    }
}

#[allow(clippy::too_many_arguments)]
fn stream_thread(
    engine: SyncEngine,
    push: PushSource,
    pop: PopSource,
    main_device: cpal::Device,
    linked_device: cpal::Device,
    prefs: (Option<u32>, Option<u32>),
    cmd_rx: crossbeam::channel::Receiver<StreamCommand>,
    ready_tx: Sender<AudioResult<(SideInfo, SideInfo)>>,
) {
    let (rate_pref, buffer_pref) = prefs;
    let main_proc = SideProcessor::Push(Arc::new(Mutex::new(push)));
    let linked_proc = SideProcessor::Pop(Arc::new(Mutex::new(pop)));

    // Main side first: the Linked side's resampling ratio reads the Main
    // nominal rate recorded during prepare.
    let main = open_side_stream(
        &engine,
        DeviceSide::Main,
        &main_device,
        &main_proc,
        rate_pref,
        buffer_pref,
    );
    let (mut main_stream, main_info) = match main {
        Ok(ok) => ok,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let linked = open_side_stream(
        &engine,
        DeviceSide::Linked,
        &linked_device,
        &linked_proc,
        rate_pref,
        buffer_pref,
    );
    let (mut linked_stream, linked_info) = match linked {
        Ok(ok) => ok,
        Err(e) => {
            drop(main_stream);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let _ = ready_tx.send(Ok((main_info, linked_info)));

    while let Ok(command) = cmd_rx.recv() {
        match command {
            StreamCommand::Reopen(side, sample_rate) => {
                let (device, processor, stream_slot) = match side {
                    DeviceSide::Main => (&main_device, &main_proc, &mut main_stream),
                    DeviceSide::Linked => (&linked_device, &linked_proc, &mut linked_stream),
                };
                // Stop the old stream before re-preparing, so no callback
                // observes the side mid-reconfiguration.
                drop(std::mem::replace(stream_slot, None));
                match open_side_stream(
                    &engine,
                    side,
                    device,
                    processor,
                    Some(sample_rate as u32),
                    buffer_pref,
                ) {
                    Ok((stream, info)) => {
                        *stream_slot = stream;
                        log::info!(
                            "{:?} device reopened at {} Hz ({} frames)",
                            side,
                            info.sample_rate,
                            info.buffer_frames
                        );
                    }
                    Err(e) => {
                        log::error!("Failed to reopen {:?} device: {}", side, e);
                    }
                }
            }
            StreamCommand::Shutdown => break,
        }
    }

    // Streams stop before the sides release their buffers.
    drop(main_stream);
    drop(linked_stream);
    main_proc.release();
    linked_proc.release();
}

fn open_side_stream(
    engine: &SyncEngine,
    side: DeviceSide,
    device: &cpal::Device,
    processor: &SideProcessor,
    rate_pref: Option<u32>,
    buffer_pref: Option<u32>,
) -> AudioResult<(Option<Stream>, SideInfo)> {
    let supported = pick_output_config(device, rate_pref)?;
    let channels = supported.channels();
    let sample_rate = supported.sample_rate().0;
    let buffer_frames = buffer_pref
        .unwrap_or(DEFAULT_BUFFER_SIZE)
        .clamp(32, MAX_BUFFER_SIZE as u32);

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: CpalBufferSize::Fixed(buffer_frames),
    };

    processor.prepare(channels as usize, buffer_frames as usize, sample_rate as f64)?;

    let callback_proc = processor.clone();
    let callback_engine = engine.clone();
    let channel_count = channels as usize;
    let mut scratch = AudioBlock::new(channel_count, MAX_BUFFER_SIZE);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let frames = (data.len() / channel_count).min(MAX_BUFFER_SIZE);
                scratch.set_num_samples(frames);
                callback_proc.process(&mut scratch);
                scratch.apply_gain(callback_engine.gain(side));
                scratch.copy_to_interleaved(data, channel_count);
            },
            move |err| {
                log::error!("{:?} audio stream error: {}", side, err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(format!("{:?}: {}", side, e)))?;

    log::info!(
        "{:?} stream: {} channels, {} Hz, {} frames",
        side,
        channels,
        sample_rate,
        buffer_frames
    );

    Ok((
        Some(stream),
        SideInfo {
            sample_rate,
            channels,
            buffer_frames,
        },
    ))
}
