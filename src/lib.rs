//! A hardware abstraction layer for scientific image-acquisition devices.
//!
//! The crate gives clients one uniform, typed interface to cameras regardless
//! of vendor SDK: validated property access with schema introspection, an
//! acquisition state machine with asynchronous frame/stop/error events, and a
//! frame buffer with explicit transient/protected data semantics.
//!
//! # Architecture
//!
//! ```text
//!  client ----> ImagingDevice<D> (device.rs)
//!                 |-- PropertyRegistry (registry.rs)   validated get/set
//!                 |-- ChangeTracker    (tracker.rs)    indirect-change reporting
//!                 |-- AcquisitionEngine(acquisition.rs) Idle/Acquiring/Stopping
//!                 |      `-- capture task --> FrameBuffer (buffer.rs)
//!                 `-- D: CameraDriver  (driver.rs)     vendor binding
//! ```
//!
//! Vendor bindings implement [`CameraDriver`]; the crate ships [`MockCamera`],
//! a full software camera used by the test suite and for client bring-up.
//!
//! # Example
//!
//! ```no_run
//! use imaging_hal::property::names;
//! use imaging_hal::{ImagingDevice, MockCamera, PropertyValue};
//!
//! # async fn demo() -> imaging_hal::CamResult<()> {
//! let device = ImagingDevice::<MockCamera>::open("mock:0").await?;
//! device
//!     .set_properties(&[
//!         (names::REGION_WIDTH, PropertyValue::Integer(512)),
//!         (names::REGION_HEIGHT, PropertyValue::Integer(512)),
//!         (names::FRAME_RATE, PropertyValue::Float(10.0)),
//!     ])
//!     .await?;
//!
//! device.start_acquisition().await?;
//! // ... frames accumulate on the capture task ...
//! device.stop_acquisition().await?;
//! let _frames = device.get_images(None);
//! device.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod buffer;
pub mod device;
pub mod driver;
pub mod error;
pub mod frame;
pub mod mock;
pub mod property;
pub mod registry;
pub mod tracker;

pub use acquisition::{AcquisitionState, CameraCallback, CameraEvent};
pub use buffer::FrameBuffer;
pub use device::ImagingDevice;
pub use driver::{ApplyOutcome, CameraDriver, CapturedFrame, DriverEvent};
pub use error::{CamError, CamResult};
pub use frame::{DataAxis, Frame, FrameMetadata, PixelFormat};
pub use mock::MockCamera;
pub use property::{Property, PropertyKind, PropertySchema, PropertySet, PropertyValue};
pub use registry::{PropertyRegistry, SetOutcome};
pub use tracker::ChangeTracker;
