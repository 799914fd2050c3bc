//! Acquired frames and their transient/protected data semantics.
//!
//! A [`Frame`] is a handle to one acquired image. Its payload lives in a
//! [`FrameSlot`] shared with the acquisition buffer:
//!
//! - **Transient** frames: the slot models a fixed hardware ring slot. When the
//!   ring wraps, the slot is invalidated and every `Frame` still referencing it
//!   gets [`CamError::DataUnavailable`] from [`Frame::data`], including frames
//!   already drained by the client. Ownership of transient data stays with the
//!   buffer.
//! - **Protected** frames (`protect_data = true`): the payload was copied out
//!   of the transient buffer at capture time, so the slot is never invalidated
//!   and ownership passes to the caller on drain.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{CamError, CamResult};
use crate::property::PropertySet;

/// Axis labels for frame data, in storage order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataAxis {
    /// Frame index axis (for stacked data).
    Frame,
    /// Image row.
    Row,
    /// Image column.
    Col,
    /// Color/spectral channel.
    Channel,
}

/// Pixel packing descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit monochrome, 1 byte per pixel.
    Mono8,
    /// 12-bit monochrome, stored 2 bytes per pixel (little-endian, upper bits zero).
    Mono12,
    /// 16-bit monochrome, 2 bytes per pixel (little-endian).
    Mono16,
}

impl PixelFormat {
    /// Significant bits per pixel.
    pub fn bit_depth(&self) -> u32 {
        match self {
            PixelFormat::Mono8 => 8,
            PixelFormat::Mono12 => 12,
            PixelFormat::Mono16 => 16,
        }
    }

    /// Storage bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono12 | PixelFormat::Mono16 => 2,
        }
    }

    /// Maps a bit depth to its packing, if supported.
    pub fn from_bit_depth(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(PixelFormat::Mono8),
            12 => Some(PixelFormat::Mono12),
            16 => Some(PixelFormat::Mono16),
            _ => None,
        }
    }
}

/// Metadata attached to every acquired frame.
#[derive(Clone, Debug)]
pub struct FrameMetadata {
    /// Snapshot of the properties in effect during the capture run.
    ///
    /// Shared (same underlying set) across all frames of one run; this is a
    /// read-only sharing relationship, not ownership.
    pub camera_properties: Arc<PropertySet>,
    /// Axis labels in storage order (typically `[Row, Col]`).
    pub data_axes: Vec<DataAxis>,
    /// Pixel packing.
    pub format: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Arrival time of the frame at the capture path.
    pub timestamp: DateTime<Utc>,
    /// Driver-side sequence number within the run.
    pub sequence: u64,
    /// Driver-specific extras.
    pub extra: Option<serde_json::Value>,
}

/// Shared payload slot backing one frame.
///
/// Transient slots can be invalidated by the buffer when the ring wraps;
/// protected slots never are.
#[derive(Debug)]
pub struct FrameSlot {
    transient: bool,
    payload: RwLock<Option<Bytes>>,
}

impl FrameSlot {
    pub(crate) fn new(data: Bytes, transient: bool) -> Self {
        Self {
            transient,
            payload: RwLock::new(Some(data)),
        }
    }

    pub(crate) fn is_transient(&self) -> bool {
        self.transient
    }

    /// Drops the payload of a transient slot. No-op for protected slots.
    pub(crate) fn invalidate(&self) {
        if self.transient {
            *self
                .payload
                .write()
                .unwrap_or_else(PoisonError::into_inner) = None;
        }
    }

    fn data(&self) -> CamResult<Bytes> {
        self.payload
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CamError::DataUnavailable)
    }
}

/// Handle to one acquired image.
///
/// Cloning is cheap (the payload and property snapshot are shared).
#[derive(Clone, Debug)]
pub struct Frame {
    slot: Arc<FrameSlot>,
    metadata: FrameMetadata,
}

impl Frame {
    pub(crate) fn new(slot: Arc<FrameSlot>, metadata: FrameMetadata) -> Self {
        Self { slot, metadata }
    }

    /// Raw pixel payload.
    ///
    /// For transient frames this fails with [`CamError::DataUnavailable`] once
    /// the acquisition ring has overwritten the slot, even if the frame was
    /// drained successfully beforehand.
    pub fn data(&self) -> CamResult<Bytes> {
        self.slot.data()
    }

    /// True if the payload may be overwritten by a later capture.
    pub fn is_transient(&self) -> bool {
        self.slot.is_transient()
    }

    /// Frame metadata bundle.
    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }
}
