//! Acquisition state machine and the background capture path.
//!
//! The engine owns the start/stop lifecycle and the single background task per
//! open device (the "capture path"). The capture task is driver-driven: it
//! consumes the driver's event channel, is the sole writer into the
//! [`FrameBuffer`], and the sole source of `Frame`/`Stopped`/`Error` events.
//!
//! # State machine
//!
//! ```text
//! Idle --start_acquisition()--> Acquiring --stop_acquisition()--> Stopping
//!  ^                                |                                |
//!  |                                | (fixed-length run completes)   |
//!  +---------- driver Stopped ------+--------------------------------+
//! ```
//!
//! `stop_acquisition` only signals intent and returns; the `Stopping -> Idle`
//! transition happens asynchronously once the driver confirms no further
//! frames will arrive, and fires the `Stopped` event exactly once per run.
//! Frames already in flight from the hardware are not discarded.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::buffer::FrameBuffer;
use crate::driver::{CameraDriver, DriverEvent};
use crate::error::{CamError, CamResult};
use crate::frame::{DataAxis, Frame, FrameMetadata};
use crate::property::PropertySet;

/// Lifecycle state of the acquisition engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionState {
    /// No capture running (initial and terminal state).
    Idle,
    /// Capture running; frames may arrive at any time.
    Acquiring,
    /// Stop requested; frames already in flight may still arrive.
    Stopping,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "idle"),
            AcquisitionState::Acquiring => write!(f, "acquiring"),
            AcquisitionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Events delivered to the registered callback.
///
/// The callback runs on the capture task, never on the client's calling
/// thread. It must not assume exclusive access to client-side state without
/// its own synchronization, and must not block for unbounded time: a slow
/// callback delays subsequent frame delivery.
#[derive(Clone)]
pub enum CameraEvent {
    /// A frame arrived and was appended to the buffer.
    Frame(Frame),
    /// The capture run ended; `is_acquiring()` is now false.
    Stopped,
    /// The driver reported a capture-time failure.
    Error(String),
}

/// Event sink registered via `set_callback`.
pub type CameraCallback = Arc<dyn Fn(CameraEvent) + Send + Sync>;

type SharedCallback = Arc<RwLock<Option<CameraCallback>>>;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Owns the acquisition lifecycle and the capture task for one device.
pub(crate) struct AcquisitionEngine<D: CameraDriver> {
    driver: Arc<D>,
    buffer: Arc<FrameBuffer>,
    state: Arc<Mutex<AcquisitionState>>,
    callback: SharedCallback,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<D: CameraDriver> AcquisitionEngine<D> {
    pub(crate) fn new(driver: Arc<D>, buffer: Arc<FrameBuffer>) -> Self {
        Self {
            driver,
            buffer,
            state: Arc::new(Mutex::new(AcquisitionState::Idle)),
            callback: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Current state.
    pub(crate) fn state(&self) -> AcquisitionState {
        *lock(&self.state)
    }

    /// True in `Acquiring` and `Stopping`, false only in `Idle`.
    pub(crate) fn is_acquiring(&self) -> bool {
        self.state() != AcquisitionState::Idle
    }

    pub(crate) async fn set_callback(&self, callback: Option<CameraCallback>) {
        *self.callback.write().await = callback;
    }

    /// Claims the `Idle -> Acquiring` transition without any other side
    /// effect. Fails with `DeviceBusy` unless `Idle`, including while
    /// `Stopping` (the previous run must settle first).
    ///
    /// Callers follow up with [`launch`](Self::launch) or return the claim via
    /// [`release_reservation`](Self::release_reservation). The split lets the
    /// facade reject a busy start before touching any shared state.
    pub(crate) fn try_reserve(&self) -> CamResult<()> {
        let mut state = lock(&self.state);
        if *state != AcquisitionState::Idle {
            return Err(CamError::DeviceBusy(*state));
        }
        *state = AcquisitionState::Acquiring;
        Ok(())
    }

    /// Returns a reservation made by [`try_reserve`](Self::try_reserve)
    /// without starting a run.
    pub(crate) fn release_reservation(&self) {
        *lock(&self.state) = AcquisitionState::Idle;
    }

    /// Starts the capture path under a reservation made by
    /// [`try_reserve`](Self::try_reserve); releases it on failure.
    ///
    /// Returns as soon as the driver accepted the request; it does not wait
    /// for the first frame.
    pub(crate) async fn launch(
        &self,
        snapshot: Arc<PropertySet>,
        protect_data: bool,
    ) -> CamResult<()> {
        let events = match self.driver.begin_capture().await {
            Ok(rx) => rx,
            Err(e) => {
                self.release_reservation();
                return Err(CamError::driver("begin_capture", e));
            }
        };

        debug!(protect_data, "acquisition started");

        let buffer = self.buffer.clone();
        let state = self.state.clone();
        let callback = self.callback.clone();
        let handle = tokio::spawn(capture_loop(
            events, buffer, state, callback, snapshot, protect_data,
        ));
        *lock(&self.task) = Some(handle);
        Ok(())
    }

    /// Requests the capture path to halt; returns immediately.
    ///
    /// Cessation is observed via `is_acquiring()` polling or the `Stopped`
    /// event. Fails with `DeviceBusy` unless currently `Acquiring`.
    pub(crate) async fn stop(&self) -> CamResult<()> {
        {
            let mut state = lock(&self.state);
            if *state != AcquisitionState::Acquiring {
                return Err(CamError::DeviceBusy(*state));
            }
            *state = AcquisitionState::Stopping;
        }

        if let Err(e) = self.driver.end_capture().await {
            // The run is still live; let the caller retry.
            *lock(&self.state) = AcquisitionState::Acquiring;
            return Err(CamError::driver("end_capture", e));
        }
        debug!("acquisition stop requested");
        Ok(())
    }

    /// Forces the engine down for `close()`: signals the driver if a run is
    /// live and waits (bounded) for the capture task to settle.
    pub(crate) async fn shutdown(&self) {
        if self.state() != AcquisitionState::Idle {
            if let Err(e) = self.driver.end_capture().await {
                warn!(error = %e, "end_capture failed during shutdown");
            }
        }

        let handle = lock(&self.task).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("capture task did not settle in time; aborting");
                handle.abort();
            }
        }
        *lock(&self.state) = AcquisitionState::Idle;
    }
}

async fn dispatch(callback: &SharedCallback, event: CameraEvent) {
    if let Some(cb) = callback.read().await.as_ref() {
        cb(event);
    }
}

/// The capture path: consumes driver events until the run ends.
async fn capture_loop(
    mut events: tokio::sync::mpsc::Receiver<DriverEvent>,
    buffer: Arc<FrameBuffer>,
    state: Arc<Mutex<AcquisitionState>>,
    callback: SharedCallback,
    snapshot: Arc<PropertySet>,
    protect_data: bool,
) {
    let mut stop_fired = false;

    while let Some(event) = events.recv().await {
        match event {
            DriverEvent::Frame(captured) => {
                let metadata = FrameMetadata {
                    camera_properties: snapshot.clone(),
                    data_axes: vec![DataAxis::Row, DataAxis::Col],
                    format: captured.format,
                    width: captured.width,
                    height: captured.height,
                    timestamp: Utc::now(),
                    sequence: captured.sequence,
                    extra: captured.extra,
                };
                let frame = buffer.push(captured.data, !protect_data, metadata);
                dispatch(&callback, CameraEvent::Frame(frame)).await;
            }
            DriverEvent::Stopped => {
                *lock(&state) = AcquisitionState::Idle;
                dispatch(&callback, CameraEvent::Stopped).await;
                stop_fired = true;
                debug!("capture run ended");
                break;
            }
            DriverEvent::Error(message) => {
                warn!(error = %message, "driver reported capture error");
                dispatch(&callback, CameraEvent::Error(message)).await;
            }
        }
    }

    // Channel closed without a Stopped event (driver went away). Settle the
    // state machine and honor the one-stop-per-run contract anyway.
    if !stop_fired {
        warn!("driver event channel closed without Stopped");
        *lock(&state) = AcquisitionState::Idle;
        dispatch(&callback, CameraEvent::Stopped).await;
    }
}
