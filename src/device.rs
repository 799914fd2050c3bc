//! Client-facing device facade.
//!
//! [`ImagingDevice`] is the one handle a client holds per open camera. It wires
//! the property registry, change tracker, frame buffer, and acquisition engine
//! together over a shared driver handle:
//!
//! ```text
//!            ImagingDevice<D>
//!    +------------+------------------+
//!    |            |                  |
//! PropertyRegistry  ChangeTracker  AcquisitionEngine --> capture task
//!    |                                |                      |
//!    +-------------- Arc<D> ---------+          FrameBuffer <+
//! ```
//!
//! Property reads and writes are safe while acquiring; writes that only take
//! effect after a restart are reported via [`SetOutcome::need_restart`] rather
//! than applied behind the client's back.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::acquisition::{AcquisitionEngine, AcquisitionState, CameraCallback};
use crate::buffer::FrameBuffer;
use crate::driver::CameraDriver;
use crate::error::{CamError, CamResult};
use crate::frame::Frame;
use crate::property::{names, PropertySchema, PropertySet, PropertyValue};
use crate::registry::{PropertyRegistry, SetOutcome};
use crate::tracker::ChangeTracker;

/// One open image-acquisition device.
pub struct ImagingDevice<D: CameraDriver> {
    driver: Arc<D>,
    registry: PropertyRegistry<D>,
    tracker: Mutex<ChangeTracker>,
    buffer: Arc<FrameBuffer>,
    engine: AcquisitionEngine<D>,
}

impl<D: CameraDriver> std::fmt::Debug for ImagingDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagingDevice").finish_non_exhaustive()
    }
}

impl<D: CameraDriver> ImagingDevice<D> {
    /// Enumerates device identifiers for this driver family.
    ///
    /// An empty list means no devices are attached; an error means discovery
    /// itself failed (driver not installed, bus fault).
    pub async fn list_devices() -> CamResult<Vec<String>> {
        D::list_devices()
            .await
            .map_err(|e| CamError::Enumeration(e.to_string()))
    }

    /// Opens the named device.
    pub async fn open(device_id: &str) -> CamResult<Self> {
        let driver = Arc::new(
            D::open(device_id)
                .await
                .map_err(|e| CamError::driver("open", e))?,
        );
        let buffer = Arc::new(FrameBuffer::default());
        info!(device_id, "device opened");
        Ok(Self {
            registry: PropertyRegistry::new(driver.clone()),
            tracker: Mutex::new(ChangeTracker::new()),
            engine: AcquisitionEngine::new(driver.clone(), buffer.clone()),
            buffer,
            driver,
        })
    }

    /// Closes the device: forces any live acquisition down, then releases the
    /// driver handle. Consumes the facade.
    pub async fn close(self) -> CamResult<()> {
        self.engine.shutdown().await;
        self.driver
            .shutdown()
            .await
            .map_err(|e| CamError::driver("shutdown", e))?;
        info!("device closed");
        Ok(())
    }

    /// Queries the live value of each named property.
    ///
    /// Every returned property becomes tracked for indirect-change
    /// reconciliation (see [`set_properties`](Self::set_properties)).
    pub async fn get_properties(&self, names: &[&str]) -> CamResult<PropertySet> {
        let set = self.registry.get(names).await?;
        let mut tracker = self.tracker.lock().await;
        for property in set.iter() {
            tracker.note(property.clone());
        }
        Ok(set)
    }

    /// Returns the current schema of each named property (constraints only, no
    /// live values).
    pub async fn get_property_info(
        &self,
        names: &[&str],
    ) -> CamResult<Vec<(String, PropertySchema)>> {
        let mut result = Vec::with_capacity(names.len());
        for name in names {
            result.push(((*name).to_string(), self.registry.schema_of(name).await?));
        }
        Ok(result)
    }

    /// Returns every property the device supports with its schema.
    pub async fn describe_all(&self) -> CamResult<Vec<(String, PropertySchema)>> {
        self.registry.describe_all().await
    }

    /// Applies the writes in the given order and reconciles tracked
    /// properties afterwards.
    ///
    /// On success, `applied` carries the driver's authoritative values (which
    /// may be snapped), and `side_effects` carries tracked properties whose
    /// values moved indirectly as a result of this write. Fail-fast without
    /// rollback: on a validation error, earlier entries stay applied.
    pub async fn set_properties(
        &self,
        values: &[(&str, PropertyValue)],
    ) -> CamResult<SetOutcome> {
        let mut outcome = self.registry.set(values).await?;

        let mut tracker = self.tracker.lock().await;
        for property in outcome.applied.iter() {
            tracker.note(property.clone());
        }
        let written: Vec<&str> = values.iter().map(|(name, _)| *name).collect();
        outcome.side_effects = tracker.reconcile(&self.registry, &written).await?;

        if outcome.need_restart {
            debug!("write requires acquisition restart to take effect");
        }
        Ok(outcome)
    }

    /// Stops tracking one property name. Returns true if it was tracked.
    pub async fn untrack(&self, name: &str) -> bool {
        self.tracker.lock().await.untrack(name)
    }

    /// Clears the tracked property set.
    pub async fn untrack_all(&self) {
        self.tracker.lock().await.untrack_all();
    }

    /// Returns and removes the frames accumulated since the previous call,
    /// oldest first.
    ///
    /// With `max_count = Some(m)`, only the `m` most recent frames are
    /// returned and older backlog is discarded. Without `protect_data`, a
    /// returned frame's data remains owned by the buffer and can become
    /// [`CamError::DataUnavailable`] once the ring wraps past it.
    pub fn get_images(&self, max_count: Option<usize>) -> Vec<Frame> {
        self.buffer.drain(max_count)
    }

    /// Reads the capture configuration where the driver supports it.
    ///
    /// A driver with no natural ring limit simply omits `buffer_size`
    /// (unbounded retention), and an omitted `protect_data` means transient
    /// frames. Present properties are noted into the tracker.
    async fn capture_config(&self) -> CamResult<(Option<usize>, bool)> {
        let mut tracker = self.tracker.lock().await;

        let buffer_size = match self.registry.snapshot(names::BUFFER_SIZE).await {
            Ok(property) => {
                let size = property.value.as_i64().unwrap_or(0);
                tracker.note(property);
                (size > 0).then_some(size as usize)
            }
            Err(CamError::PropertyNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let protect_data = match self.registry.snapshot(names::PROTECT_DATA).await {
            Ok(property) => {
                let protect = property.value.as_bool().unwrap_or(false);
                tracker.note(property);
                protect
            }
            Err(CamError::PropertyNotFound(_)) => false,
            Err(e) => return Err(e),
        };

        Ok((buffer_size, protect_data))
    }

    /// Starts acquisition with the device's current settings.
    ///
    /// Reads `buffer_size` and `protect_data`, sizes the frame ring, snapshots
    /// the tracked properties as the run's capture metadata, and starts the
    /// capture path. Fails with [`CamError::DeviceBusy`] unless idle; a
    /// rejected start leaves the live run's buffer untouched. Returns before
    /// the first frame arrives.
    pub async fn start_acquisition(&self) -> CamResult<()> {
        self.engine.try_reserve()?;

        let (buffer_size, protect_data) = match self.capture_config().await {
            Ok(config) => config,
            Err(e) => {
                self.engine.release_reservation();
                return Err(e);
            }
        };
        self.buffer.configure(buffer_size);

        let snapshot = Arc::new(self.tracker.lock().await.properties());
        self.engine.launch(snapshot, protect_data).await
    }

    /// Requests the current acquisition run to halt; returns immediately.
    ///
    /// Idempotent: stopping a device that is already idle or already stopping
    /// is a no-op, since a fixed-length run self-stops at a moment the client
    /// cannot observe. Frames already in flight are still delivered; cessation
    /// is observed via [`is_acquiring`](Self::is_acquiring) or the `Stopped`
    /// event.
    pub async fn stop_acquisition(&self) -> CamResult<()> {
        match self.engine.stop().await {
            Err(CamError::DeviceBusy(
                AcquisitionState::Idle | AcquisitionState::Stopping,
            )) => Ok(()),
            other => other,
        }
    }

    /// True from `start_acquisition` until the run has fully ended (including
    /// the stopping window).
    pub fn is_acquiring(&self) -> bool {
        self.engine.is_acquiring()
    }

    /// Current acquisition lifecycle state.
    pub fn acquisition_state(&self) -> AcquisitionState {
        self.engine.state()
    }

    /// Registers the event callback.
    ///
    /// The callback runs on the capture task, never on the caller's thread; it
    /// must synchronize its own state and must not block for unbounded time.
    pub async fn set_callback(&self, callback: CameraCallback) {
        self.engine.set_callback(Some(callback)).await;
    }

    /// Removes the event callback. In-flight dispatches may still complete.
    pub async fn clear_callback(&self) {
        self.engine.set_callback(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCamera;

    #[tokio::test]
    async fn test_list_and_open() {
        let devices = ImagingDevice::<MockCamera>::list_devices().await.unwrap();
        assert_eq!(devices, vec!["mock:0".to_string()]);
        let device = ImagingDevice::<MockCamera>::open(&devices[0]).await.unwrap();
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_unknown_device_fails() {
        let err = ImagingDevice::<MockCamera>::open("mock:9").await.unwrap_err();
        assert!(matches!(err, CamError::Driver { operation: "open", .. }));
    }

    #[tokio::test]
    async fn test_set_properties_surfaces_side_effects() {
        let device = ImagingDevice::<MockCamera>::open("mock:0").await.unwrap();

        // Track frame_rate at a value only valid for 8-bit readout.
        device
            .set_properties(&[
                (names::BIT_DEPTH, PropertyValue::Integer(8)),
                (names::FRAME_RATE, PropertyValue::Float(400.0)),
            ])
            .await
            .unwrap();

        let outcome = device
            .set_properties(&[(names::BIT_DEPTH, PropertyValue::Integer(16))])
            .await
            .unwrap();
        assert_eq!(
            outcome.side_effects.value(names::FRAME_RATE),
            Some(&PropertyValue::Float(250.0))
        );
        assert!(!outcome.side_effects.contains(names::BIT_DEPTH));

        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_untrack_silences_side_effect_reporting() {
        let device = ImagingDevice::<MockCamera>::open("mock:0").await.unwrap();
        device
            .set_properties(&[
                (names::BIT_DEPTH, PropertyValue::Integer(8)),
                (names::FRAME_RATE, PropertyValue::Float(400.0)),
            ])
            .await
            .unwrap();
        device.untrack(names::FRAME_RATE).await;

        let outcome = device
            .set_properties(&[(names::BIT_DEPTH, PropertyValue::Integer(16))])
            .await
            .unwrap();
        assert!(!outcome.side_effects.contains(names::FRAME_RATE));

        device.close().await.unwrap();
    }
}
