//! Driver collaborator interface.
//!
//! The core never talks to vendor SDKs directly; it consumes the narrow
//! [`CameraDriver`] capability trait and concrete vendor bindings implement it.
//! The core never branches on device identity.
//!
//! # Data flow
//!
//! ```text
//! CameraDriver::begin_capture() --> mpsc::Receiver<DriverEvent> --> capture task
//! ```
//!
//! Property operations are synchronous round-trips (they may block for driver
//! I/O latency); capture delivery is the one asynchronous notification channel.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::frame::PixelFormat;
use crate::property::{PropertySchema, PropertyValue};

/// Result of applying one property write at the driver.
#[derive(Clone, Debug)]
pub struct ApplyOutcome {
    /// The authoritative value the driver settled on. May legitimately differ
    /// from the requested value (e.g. frame rate snapped to the nearest
    /// supported step).
    pub actual: PropertyValue,
    /// True if acquisition must be stopped and restarted before this setting
    /// takes effect.
    pub need_restart: bool,
    /// Names of properties whose *schema* (not just value) may have changed as
    /// a side effect of this write.
    pub info_changed: Vec<String>,
}

/// One raw frame delivered by the driver's capture path.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    /// Raw pixel payload, row-major.
    pub data: Bytes,
    /// Frame width in (binned) pixels.
    pub width: u32,
    /// Frame height in (binned) pixels.
    pub height: u32,
    /// Pixel packing.
    pub format: PixelFormat,
    /// Driver-side sequence number, starting at 0 per capture run.
    pub sequence: u64,
    /// Driver-specific extras (hardware timestamps, temperatures, ...).
    pub extra: Option<serde_json::Value>,
}

/// Asynchronous notifications emitted by a driver capture run.
#[derive(Clone, Debug)]
pub enum DriverEvent {
    /// A frame arrived.
    Frame(CapturedFrame),
    /// No further frames will arrive; the run has ended (requested stop or a
    /// fixed-length run completing on its own).
    Stopped,
    /// A driver-level failure during capture. Delivery continues if possible.
    Error(String),
}

/// Capability interface implemented by vendor bindings.
///
/// All methods take `&self`; implementations use interior mutability so the
/// core can share one driver handle between the client path and the capture
/// task.
#[async_trait]
pub trait CameraDriver: Send + Sync + 'static {
    /// Enumerates available device identifiers for this driver family.
    ///
    /// An empty list is a valid result; an error means the discovery mechanism
    /// itself failed.
    async fn list_devices() -> Result<Vec<String>>
    where
        Self: Sized;

    /// Opens the named device and acquires the driver handle.
    async fn open(device_id: &str) -> Result<Self>
    where
        Self: Sized;

    /// Queries the live value of one property.
    async fn query(&self, name: &str) -> Result<PropertyValue>;

    /// Applies one property write and reports the authoritative outcome.
    ///
    /// Callers validate against [`schema`](Self::schema) first; drivers may
    /// still snap the value to the nearest supported one.
    async fn apply(&self, name: &str, value: PropertyValue) -> Result<ApplyOutcome>;

    /// Returns the current schema for one property, or `None` if the device
    /// does not support it.
    async fn schema(&self, name: &str) -> Result<Option<PropertySchema>>;

    /// Returns every supported property with its schema, in driver order.
    /// Live values are not reflected here.
    async fn describe(&self) -> Result<Vec<(String, PropertySchema)>>;

    /// Starts a capture run and returns its event channel.
    ///
    /// The channel delivers `Frame` events followed by exactly one `Stopped`
    /// once the run ends.
    async fn begin_capture(&self) -> Result<mpsc::Receiver<DriverEvent>>;

    /// Requests the current capture run to halt. Non-blocking; frames already
    /// in flight are still delivered, then `Stopped` is emitted.
    async fn end_capture(&self) -> Result<()>;

    /// Releases the driver handle.
    async fn shutdown(&self) -> Result<()>;
}
