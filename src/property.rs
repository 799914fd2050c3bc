//! Typed device properties and their validation schemas.
//!
//! Every configurable or queryable camera parameter is described by a
//! [`PropertySchema`] (type tag, read/write flags, constraints) and reported to
//! clients as a [`Property`] snapshot pairing the schema with the live value.
//! Values are a closed tagged-variant type, [`PropertyValue`], so validation
//! and storage are exhaustive and statically checkable rather than relying on
//! an open dynamic type.
//!
//! A [`Property`] is constructed on demand when queried or set; it is a
//! snapshot, not a live reference. A later query returns a new instance with
//! current state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CamError, CamResult};

/// Standardized property names supported by conforming drivers.
///
/// Drivers expose whichever of these apply to the hardware; clients should
/// prefer these names over vendor-specific ones.
pub mod names {
    /// Acquisition mode: `free_run` or `fixed_length`.
    pub const ACQUIRE_MODE: &str = "acquire_mode";
    /// Number of frames captured per run in `fixed_length` mode.
    pub const FIXED_FRAME_COUNT: &str = "fixed_frame_count";
    /// Hardware trigger mode.
    pub const TRIGGER_MODE: &str = "trigger_mode";
    /// Copy frame data out of the transient buffer at capture time.
    pub const PROTECT_DATA: &str = "protect_data";
    /// Capacity of the acquisition ring buffer, in frames.
    pub const BUFFER_SIZE: &str = "buffer_size";
    /// Bits per pixel.
    pub const BIT_DEPTH: &str = "bit_depth";
    /// Exposure time in seconds.
    pub const EXPOSURE_TIME: &str = "exposure_time";
    /// Acquisition frame rate in Hz.
    pub const FRAME_RATE: &str = "frame_rate";
    /// Horizontal binning factor.
    pub const BINNING_X: &str = "binning_x";
    /// Vertical binning factor.
    pub const BINNING_Y: &str = "binning_y";
    /// Region-of-interest origin X, in unbinned sensor coordinates.
    pub const REGION_X: &str = "region_x";
    /// Region-of-interest origin Y, in unbinned sensor coordinates.
    pub const REGION_Y: &str = "region_y";
    /// Region-of-interest width, in unbinned sensor coordinates.
    pub const REGION_WIDTH: &str = "region_width";
    /// Region-of-interest height, in unbinned sensor coordinates.
    pub const REGION_HEIGHT: &str = "region_height";
    /// Full sensor width in pixels (read-only).
    pub const SENSOR_WIDTH: &str = "sensor_width";
    /// Full sensor height in pixels (read-only).
    pub const SENSOR_HEIGHT: &str = "sensor_height";
    /// Physical pixel width in micrometers (read-only).
    pub const PIXEL_WIDTH: &str = "pixel_width";
    /// Physical pixel height in micrometers (read-only).
    pub const PIXEL_HEIGHT: &str = "pixel_height";
    /// Camera model string (read-only).
    pub const CAMERA_MODEL: &str = "camera_model";
}

// =============================================================================
// Values
// =============================================================================

/// Strongly-typed property value.
///
/// `EnumText` carries the same payload as `Text` but marks the value as one of
/// a discrete set of device-defined strings (e.g. trigger modes).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Signed integer value.
    Integer(i64),
    /// Floating-point value.
    Float(f64),
    /// Boolean value.
    Boolean(bool),
    /// Free-form text value.
    Text(String),
    /// Text value drawn from a discrete device-defined set.
    EnumText(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Boolean(b) => write!(f, "{}", b),
            PropertyValue::Text(s) | PropertyValue::EnumText(s) => write!(f, "{}", s),
        }
    }
}

impl PropertyValue {
    /// Returns the type tag of this value.
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Integer(_) => PropertyKind::Integer,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Boolean(_) => PropertyKind::Boolean,
            PropertyValue::Text(_) => PropertyKind::Text,
            PropertyValue::EnumText(_) => PropertyKind::EnumText,
        }
    }

    /// Extracts the value as f64 (integers widen).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Extracts the value as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Extracts the value as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Extracts the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) | PropertyValue::EnumText(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Integer(value as i64)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Integer(value as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

/// Type tag for property values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Signed integer.
    Integer,
    /// Floating point.
    Float,
    /// Boolean.
    Boolean,
    /// Free-form text.
    Text,
    /// Text from a discrete set.
    EnumText,
}

// =============================================================================
// Schemas
// =============================================================================

/// Validation schema and metadata for one device property.
///
/// If both `allowed_values` and `range` are absent, any value of the declared
/// kind is accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Declared value type.
    pub kind: PropertyKind,
    /// Whether the property can be queried.
    pub readable: bool,
    /// Whether the property can be written.
    pub writable: bool,
    /// Optional discrete set of allowed values.
    pub allowed_values: Option<Vec<PropertyValue>>,
    /// Optional inclusive numeric range `[low, high]`.
    pub range: Option<(f64, f64)>,
    /// Human-readable description.
    pub description: String,
}

impl PropertySchema {
    /// Creates a schema accepting any value of `kind`.
    pub fn new(kind: PropertyKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            readable: true,
            writable: true,
            allowed_values: None,
            range: None,
            description: description.into(),
        }
    }

    /// Restricts values to an inclusive numeric range.
    pub fn with_range(mut self, low: f64, high: f64) -> Self {
        self.range = Some((low, high));
        self
    }

    /// Restricts values to a discrete set.
    pub fn with_allowed(mut self, values: Vec<PropertyValue>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    /// Marks the property as not writable.
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Returns true if `value` passes this schema.
    pub fn is_valid(&self, value: &PropertyValue) -> bool {
        self.check(value).is_ok()
    }

    /// Validates `value`, returning the reason on rejection.
    ///
    /// Type match is checked first (plain `Text` is accepted for `EnumText`
    /// properties and integers widen to `Float`), then the allowed-value set,
    /// then the numeric range.
    pub fn check(&self, value: &PropertyValue) -> Result<(), String> {
        let kind_ok = match (self.kind, value.kind()) {
            (k, v) if k == v => true,
            (PropertyKind::EnumText, PropertyKind::Text) => true,
            (PropertyKind::Float, PropertyKind::Integer) => true,
            _ => false,
        };
        if !kind_ok {
            return Err(format!(
                "expected {:?}, got {:?}",
                self.kind,
                value.kind()
            ));
        }

        if let Some(allowed) = &self.allowed_values {
            let hit = allowed.iter().any(|a| match (a.as_str(), value.as_str()) {
                // Compare enum strings by payload regardless of Text/EnumText tag.
                (Some(x), Some(y)) => x == y,
                _ => a == value,
            });
            if !hit {
                return Err(format!(
                    "not in allowed set {{{}}}",
                    allowed
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }

        if let Some((low, high)) = self.range {
            match value.as_f64() {
                Some(v) if v < low => return Err(format!("below minimum {}", low)),
                Some(v) if v > high => return Err(format!("above maximum {}", high)),
                _ => {}
            }
        }

        Ok(())
    }

    /// Validates a write of `value` to the named property, producing the
    /// crate-level error on rejection.
    pub fn validate_write(&self, name: &str, value: &PropertyValue) -> CamResult<()> {
        if !self.writable {
            return Err(CamError::PropertyValue {
                name: name.to_string(),
                value: value.clone(),
                reason: "property is read-only".to_string(),
            });
        }
        self.check(value).map_err(|reason| CamError::PropertyValue {
            name: name.to_string(),
            value: value.clone(),
            reason,
        })
    }
}

// =============================================================================
// Property snapshots and sets
// =============================================================================

/// Snapshot of one device property: live value plus schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Property name, unique per device.
    pub name: String,
    /// Value at query time.
    pub value: PropertyValue,
    /// Schema at query time (ranges may change as other properties move).
    pub schema: PropertySchema,
}

/// Insertion-ordered mapping from property name to [`Property`].
///
/// Used both for query results and for capture-time snapshots attached to
/// frame metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySet {
    entries: Vec<Property>,
}

impl PropertySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a property, replacing an existing entry with the same name in
    /// place (insertion order of the first occurrence is kept).
    pub fn insert(&mut self, property: Property) {
        if let Some(slot) = self.entries.iter_mut().find(|p| p.name == property.name) {
            *slot = property;
        } else {
            self.entries.push(property);
        }
    }

    /// Looks up a property by name.
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.entries.iter().find(|p| p.name == name)
    }

    /// Looks up a property value by name.
    pub fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.get(name).map(|p| &p.value)
    }

    /// Returns true if the set contains `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.entries.iter()
    }

    /// Property names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|p| p.name.as_str())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for PropertySet {
    type Item = Property;
    type IntoIter = std::vec::IntoIter<Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
