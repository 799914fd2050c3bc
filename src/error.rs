//! Custom error types for the imaging HAL.
//!
//! This module defines the primary error type, `CamError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the failure modes of the abstraction layer.
//!
//! ## Error taxonomy
//!
//! - **`PropertyNotFound`**: a requested property name is unknown to the device.
//!   Local to the offending name; detected before any driver write.
//! - **`PropertyValue`**: a value failed schema validation (out of range, not in
//!   the allowed set, or wrong type). The write is rejected before reaching the
//!   driver, and the error names the offending property and value.
//! - **`DataUnavailable`**: frame data was accessed after its slot in the
//!   acquisition buffer was overwritten. Deferred by design: it surfaces at the
//!   point of access, never at buffer time.
//! - **`DeviceBusy`**: an acquisition state-machine transition was attempted
//!   from an invalid state (e.g. start while not idle).
//! - **`Enumeration`**: device discovery itself failed. Distinct from "no
//!   devices found", which is a valid empty result.
//! - **`Driver`**: the underlying driver reported a failure; wrapped together
//!   with the originating operation for diagnosis.
//!
//! Validation errors are reported synchronously to the caller of
//! `set_properties`/`get_properties`. Driver failures during acquisition are
//! delivered asynchronously via the `"error"` callback event instead, since no
//! caller is waiting on the capture path.

use thiserror::Error;

use crate::acquisition::AcquisitionState;
use crate::property::PropertyValue;

/// Convenience alias for results using the crate error type.
pub type CamResult<T> = std::result::Result<T, CamError>;

/// Errors produced by the imaging abstraction layer.
#[derive(Error, Debug)]
pub enum CamError {
    /// The requested property name is not known to the device.
    #[error("property '{0}' is not known to this device")]
    PropertyNotFound(String),

    /// A property write was rejected by schema validation.
    #[error("invalid value {value} for property '{name}': {reason}")]
    PropertyValue {
        /// Name of the offending property.
        name: String,
        /// The rejected value.
        value: PropertyValue,
        /// Why validation failed.
        reason: String,
    },

    /// Frame data was accessed after being overwritten in the acquisition buffer.
    #[error("frame data is no longer available (overwritten in the acquisition buffer)")]
    DataUnavailable,

    /// An acquisition transition was attempted from an invalid state.
    #[error("device busy: acquisition state is {0}")]
    DeviceBusy(AcquisitionState),

    /// Device discovery could not be performed.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// The underlying driver reported a failure.
    #[error("driver {operation} failed: {source}")]
    Driver {
        /// The driver operation that failed (e.g. "query", "apply").
        operation: &'static str,
        /// The driver-reported cause.
        #[source]
        source: anyhow::Error,
    },
}

impl CamError {
    /// Wraps a driver-level failure with the originating operation.
    pub fn driver(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Driver { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CamError::PropertyNotFound("gain".to_string());
        assert_eq!(
            err.to_string(),
            "property 'gain' is not known to this device"
        );

        let err = CamError::PropertyValue {
            name: "exposure_time".to_string(),
            value: PropertyValue::Float(-1.0),
            reason: "below minimum 0.00001".to_string(),
        };
        assert!(err.to_string().contains("exposure_time"));
        assert!(err.to_string().contains("-1"));
    }

    #[test]
    fn test_driver_error_carries_operation() {
        let err = CamError::driver("apply", anyhow::anyhow!("bus timeout"));
        assert!(err.to_string().contains("apply"));
    }
}
