//! Drift monitor: reconciles devices whose clock has silently moved
//!
//! Some drivers change a device's running sample rate without telling the
//! application synchronously. The real-time callbacks only compare and
//! flag; this low-priority thread does the observing and the fixing. Every
//! tick (~10 Hz) it polls each device's factual rate into the engine and,
//! when a side has flagged a mismatch, asks the device layer to reopen
//! that side at the observed rate, which re-enters `prepare` and re-derives
//! the resampling ratio and FIFO capacity.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};

use super::{DeviceSide, SyncEngine};
use crate::error::{AudioError, AudioResult};

/// Tick interval (~10 Hz)
const TICK: Duration = Duration::from_millis(100);

/// Device-layer view the monitor needs: what rate is a device really
/// running at, and how to reopen it.
pub trait DevicePoll: Send {
    /// The side's factual current sample rate, if it can be determined.
    fn poll_rate(&mut self, side: DeviceSide) -> Option<f64>;

    /// Reopen the side's device at the given rate. Runs on the monitor
    /// thread; expected to call back into the side's `prepare`.
    fn reopen(&mut self, side: DeviceSide, sample_rate: f64);
}

/// Handle to the running monitor thread; stops on `stop()` or drop.
pub struct DriftMonitor {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl DriftMonitor {
    /// Spawn the monitor thread.
    pub fn spawn<P>(engine: SyncEngine, mut poller: P) -> AudioResult<Self>
    where
        P: DevicePoll + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("tandem-drift".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(TICK) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }

                for side in [DeviceSide::Main, DeviceSide::Linked] {
                    if let Some(rate) = poller.poll_rate(side) {
                        engine.set_device_rate(side, rate);
                    }
                    if engine.take_needs_reset(side) {
                        let rate = engine.device_rate(side);
                        log::info!(
                            "Sample rate drift on {:?} device, reopening at {} Hz",
                            side,
                            rate
                        );
                        poller.reopen(side, rate);
                    }
                }
            })
            .map_err(|e| {
                AudioError::StreamBuildError(format!("failed to spawn drift monitor: {}", e))
            })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Stop the monitor and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DriftMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
