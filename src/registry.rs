//! Property registry: validated reads and ordered writes against the driver.
//!
//! The registry is the only component that talks to the driver for property
//! I/O. It validates writes against the live schema before they reach the
//! driver and captures the driver's authoritative resulting value afterwards.
//!
//! # Policies (chosen and tested)
//!
//! - **`get` is atomic**: the first unknown name fails the whole call with
//!   [`CamError::PropertyNotFound`]; no partial result escapes.
//! - **`set` is fail-fast without rollback**: entries are applied in caller
//!   order (ordering matters: some properties are only valid in combination,
//!   e.g. region width before region x). A schema rejection stops the
//!   sequence; entries already applied stay applied, entries after the
//!   offending one are never attempted.

use std::sync::Arc;
use tracing::debug;

use crate::driver::CameraDriver;
use crate::error::{CamError, CamResult};
use crate::property::{Property, PropertySchema, PropertySet, PropertyValue};

/// Result of an ordered multi-property write.
#[derive(Clone, Debug, Default)]
pub struct SetOutcome {
    /// True if the driver indicated acquisition must be stopped and restarted
    /// before these settings take effect.
    pub need_restart: bool,
    /// The written properties with their authoritative resulting values, in
    /// application order.
    pub applied: PropertySet,
    /// Names whose schema may have changed as a side effect.
    pub info_changed: Vec<String>,
    /// Tracked properties whose values changed indirectly (filled by the
    /// device facade via reconciliation; empty at registry level).
    pub side_effects: PropertySet,
}

/// Validated property access for one device.
pub struct PropertyRegistry<D: CameraDriver> {
    driver: Arc<D>,
}

impl<D: CameraDriver> PropertyRegistry<D> {
    /// Creates a registry over a shared driver handle.
    pub fn new(driver: Arc<D>) -> Self {
        Self { driver }
    }

    /// Returns the current schema for one property.
    pub async fn schema_of(&self, name: &str) -> CamResult<PropertySchema> {
        self.driver
            .schema(name)
            .await
            .map_err(|e| CamError::driver("schema", e))?
            .ok_or_else(|| CamError::PropertyNotFound(name.to_string()))
    }

    /// Builds a fresh [`Property`] snapshot by querying the live value and
    /// current schema.
    pub async fn snapshot(&self, name: &str) -> CamResult<Property> {
        let schema = self.schema_of(name).await?;
        let value = self
            .driver
            .query(name)
            .await
            .map_err(|e| CamError::driver("query", e))?;
        Ok(Property {
            name: name.to_string(),
            value,
            schema,
        })
    }

    /// Queries the live value of each requested property.
    ///
    /// Atomic: the first unknown name fails the whole call.
    pub async fn get(&self, names: &[&str]) -> CamResult<PropertySet> {
        let mut result = PropertySet::new();
        for name in names {
            result.insert(self.snapshot(name).await?);
        }
        Ok(result)
    }

    /// Returns every property the device supports with its schema, in driver
    /// order. Live values are not reflected.
    pub async fn describe_all(&self) -> CamResult<Vec<(String, PropertySchema)>> {
        self.driver
            .describe()
            .await
            .map_err(|e| CamError::driver("describe", e))
    }

    /// Applies the writes in the given order.
    ///
    /// Each entry is validated against the live schema first; on rejection the
    /// call stops (fail-fast, no rollback, see module docs). After each apply
    /// the property is re-queried so `applied` carries the driver's
    /// authoritative value, which may differ from the requested one.
    pub async fn set(&self, values: &[(&str, PropertyValue)]) -> CamResult<SetOutcome> {
        let mut outcome = SetOutcome::default();

        for (name, value) in values {
            let schema = self.schema_of(name).await?;
            schema.validate_write(name, value)?;

            let applied = self
                .driver
                .apply(name, value.clone())
                .await
                .map_err(|e| CamError::driver("apply", e))?;

            if applied.actual != *value {
                debug!(property = %name, requested = %value, actual = %applied.actual,
                    "driver snapped property value");
            }

            outcome.need_restart |= applied.need_restart;
            for changed in applied.info_changed {
                if !outcome.info_changed.contains(&changed) {
                    outcome.info_changed.push(changed);
                }
            }

            // Schema may have moved as a side effect of this very write, so
            // refresh it for the snapshot we hand back.
            let schema = self.schema_of(name).await?;
            outcome.applied.insert(Property {
                name: name.to_string(),
                value: applied.actual,
                schema,
            });
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCamera;
    use crate::property::names;

    async fn registry() -> PropertyRegistry<MockCamera> {
        let driver = MockCamera::open("mock:0").await.unwrap();
        PropertyRegistry::new(Arc::new(driver))
    }

    #[tokio::test]
    async fn test_get_unknown_name_is_atomic() {
        let registry = registry().await;
        let err = registry
            .get(&[names::EXPOSURE_TIME, "no_such_property"])
            .await
            .unwrap_err();
        assert!(matches!(err, CamError::PropertyNotFound(name) if name == "no_such_property"));
    }

    #[tokio::test]
    async fn test_set_then_get_satisfies_schema() {
        let registry = registry().await;
        let outcome = registry
            .set(&[(names::FRAME_RATE, PropertyValue::Float(10.0))])
            .await
            .unwrap();
        let applied = outcome.applied.get(names::FRAME_RATE).unwrap();
        assert!(applied.schema.is_valid(&applied.value));

        let fetched = registry.get(&[names::FRAME_RATE]).await.unwrap();
        assert_eq!(fetched.value(names::FRAME_RATE), Some(&applied.value));
    }

    #[tokio::test]
    async fn test_driver_snaps_frame_rate_to_grid() {
        let registry = registry().await;
        let outcome = registry
            .set(&[(names::FRAME_RATE, PropertyValue::Float(10.3))])
            .await
            .unwrap();
        // The mock supports a 0.5 Hz grid.
        assert_eq!(
            outcome.applied.value(names::FRAME_RATE),
            Some(&PropertyValue::Float(10.5))
        );
    }

    #[tokio::test]
    async fn test_invalid_value_rejected_and_prior_value_unchanged() {
        let registry = registry().await;
        let before = registry.get(&[names::EXPOSURE_TIME]).await.unwrap();

        let err = registry
            .set(&[(names::EXPOSURE_TIME, PropertyValue::Float(99.0))])
            .await
            .unwrap_err();
        assert!(matches!(err, CamError::PropertyValue { ref name, .. } if name == names::EXPOSURE_TIME));

        let after = registry.get(&[names::EXPOSURE_TIME]).await.unwrap();
        assert_eq!(
            before.value(names::EXPOSURE_TIME),
            after.value(names::EXPOSURE_TIME)
        );
    }

    #[tokio::test]
    async fn test_set_is_fail_fast_without_rollback() {
        let registry = registry().await;
        let err = registry
            .set(&[
                (names::REGION_WIDTH, PropertyValue::Integer(512)),
                (names::BIT_DEPTH, PropertyValue::Integer(11)), // not in {8, 12, 16}
                (names::REGION_HEIGHT, PropertyValue::Integer(512)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, CamError::PropertyValue { ref name, .. } if name == names::BIT_DEPTH));

        let after = registry
            .get(&[names::REGION_WIDTH, names::REGION_HEIGHT])
            .await
            .unwrap();
        // First entry stuck, entry after the rejection never applied.
        assert_eq!(
            after.value(names::REGION_WIDTH),
            Some(&PropertyValue::Integer(512))
        );
        assert_eq!(
            after.value(names::REGION_HEIGHT),
            Some(&PropertyValue::Integer(2048))
        );
    }

    #[tokio::test]
    async fn test_read_only_property_rejects_writes() {
        let registry = registry().await;
        let err = registry
            .set(&[(names::SENSOR_WIDTH, PropertyValue::Integer(1024))])
            .await
            .unwrap_err();
        assert!(matches!(err, CamError::PropertyValue { .. }));
    }

    #[tokio::test]
    async fn test_describe_all_lists_standard_properties() {
        let registry = registry().await;
        let all = registry.describe_all().await.unwrap();
        let names: Vec<_> = all.iter().map(|(n, _)| n.as_str()).collect();
        for expected in [
            names::ACQUIRE_MODE,
            names::EXPOSURE_TIME,
            names::REGION_WIDTH,
            names::CAMERA_MODEL,
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }
}
