//! End-to-end property management through the device facade.

use anyhow::bail;
use async_trait::async_trait;
use imaging_hal::property::names;
use imaging_hal::{
    ApplyOutcome, CamError, CameraDriver, DriverEvent, ImagingDevice, MockCamera, PropertySchema,
    PropertyValue,
};
use tokio::sync::mpsc;

async fn open_device() -> ImagingDevice<MockCamera> {
    ImagingDevice::<MockCamera>::open("mock:0")
        .await
        .expect("Failed to open mock device")
}

#[tokio::test]
async fn test_enumeration_lists_mock_device() {
    let devices = ImagingDevice::<MockCamera>::list_devices()
        .await
        .expect("Enumeration failed");
    assert_eq!(devices, vec!["mock:0".to_string()]);
}

/// Driver whose discovery mechanism itself is broken.
struct BrokenEnumeration;

#[async_trait]
impl CameraDriver for BrokenEnumeration {
    async fn list_devices() -> anyhow::Result<Vec<String>> {
        bail!("vendor runtime not installed")
    }
    async fn open(_device_id: &str) -> anyhow::Result<Self> {
        bail!("no devices")
    }
    async fn query(&self, _name: &str) -> anyhow::Result<PropertyValue> {
        bail!("unreachable")
    }
    async fn apply(&self, _name: &str, _value: PropertyValue) -> anyhow::Result<ApplyOutcome> {
        bail!("unreachable")
    }
    async fn schema(&self, _name: &str) -> anyhow::Result<Option<PropertySchema>> {
        bail!("unreachable")
    }
    async fn describe(&self) -> anyhow::Result<Vec<(String, PropertySchema)>> {
        bail!("unreachable")
    }
    async fn begin_capture(&self) -> anyhow::Result<mpsc::Receiver<DriverEvent>> {
        bail!("unreachable")
    }
    async fn end_capture(&self) -> anyhow::Result<()> {
        bail!("unreachable")
    }
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_broken_discovery_is_an_enumeration_error() {
    let err = ImagingDevice::<BrokenEnumeration>::list_devices()
        .await
        .unwrap_err();
    assert!(matches!(err, CamError::Enumeration(ref msg) if msg.contains("not installed")));
}

#[tokio::test]
async fn test_driver_snapping_is_reported_in_applied() {
    let device = open_device().await;
    let outcome = device
        .set_properties(&[(names::FRAME_RATE, PropertyValue::Float(10.3))])
        .await
        .expect("Set failed");
    assert_eq!(
        outcome.applied.value(names::FRAME_RATE),
        Some(&PropertyValue::Float(10.5)),
        "mock snaps frame_rate to its 0.5 Hz grid"
    );
    device.close().await.expect("Close failed");
}

#[tokio::test]
async fn test_get_reflects_live_driver_state() {
    let device = open_device().await;
    device
        .set_properties(&[(names::EXPOSURE_TIME, PropertyValue::Float(0.05))])
        .await
        .expect("Set failed");

    let set = device
        .get_properties(&[names::EXPOSURE_TIME, names::CAMERA_MODEL])
        .await
        .expect("Get failed");
    assert_eq!(
        set.value(names::EXPOSURE_TIME),
        Some(&PropertyValue::Float(0.05))
    );
    assert!(set.get(names::CAMERA_MODEL).is_some());
    assert!(!set.get(names::CAMERA_MODEL).unwrap().schema.writable);

    device.close().await.expect("Close failed");
}

#[tokio::test]
async fn test_fail_fast_ordering_through_facade() {
    let device = open_device().await;
    let err = device
        .set_properties(&[
            (names::REGION_WIDTH, PropertyValue::Integer(1024)),
            (names::EXPOSURE_TIME, PropertyValue::Float(99.0)), // above maximum
            (names::REGION_HEIGHT, PropertyValue::Integer(1024)),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, CamError::PropertyValue { ref name, .. } if name == names::EXPOSURE_TIME));

    let after = device
        .get_properties(&[names::REGION_WIDTH, names::REGION_HEIGHT])
        .await
        .expect("Get failed");
    assert_eq!(
        after.value(names::REGION_WIDTH),
        Some(&PropertyValue::Integer(1024)),
        "entry before the rejection stays applied"
    );
    assert_eq!(
        after.value(names::REGION_HEIGHT),
        Some(&PropertyValue::Integer(2048)),
        "entry after the rejection is never attempted"
    );

    device.close().await.expect("Close failed");
}

#[tokio::test]
async fn test_schema_side_effects_reported_via_info_changed() {
    let device = open_device().await;
    let outcome = device
        .set_properties(&[(names::REGION_WIDTH, PropertyValue::Integer(512))])
        .await
        .expect("Set failed");
    assert!(
        outcome.info_changed.contains(&names::REGION_X.to_string()),
        "narrowing the ROI widens the valid origin range"
    );

    let info = device
        .get_property_info(&[names::REGION_X])
        .await
        .expect("Info failed");
    assert_eq!(info[0].1.range, Some((0.0, 1536.0)));

    device.close().await.expect("Close failed");
}

#[tokio::test]
async fn test_indirect_value_change_surfaces_as_side_effect() {
    let device = open_device().await;

    // frame_rate is tracked at a value only legal for 8-bit readout.
    device
        .set_properties(&[
            (names::BIT_DEPTH, PropertyValue::Integer(8)),
            (names::FRAME_RATE, PropertyValue::Float(400.0)),
        ])
        .await
        .expect("Set failed");

    let outcome = device
        .set_properties(&[(names::BIT_DEPTH, PropertyValue::Integer(16))])
        .await
        .expect("Set failed");
    assert_eq!(
        outcome.side_effects.value(names::FRAME_RATE),
        Some(&PropertyValue::Float(250.0)),
        "clamped frame_rate must be surfaced, not silently changed"
    );

    // The reported value is the driver's ground truth.
    let fresh = device
        .get_properties(&[names::FRAME_RATE])
        .await
        .expect("Get failed");
    assert_eq!(
        fresh.value(names::FRAME_RATE),
        Some(&PropertyValue::Float(250.0))
    );

    device.close().await.expect("Close failed");
}

#[tokio::test]
async fn test_describe_all_has_stable_schemas() {
    let device = open_device().await;
    let all = device.describe_all().await.expect("Describe failed");
    assert!(all.len() >= 15, "mock supports the full standard table");

    let (_, bit_depth) = all
        .iter()
        .find(|(name, _)| name == names::BIT_DEPTH)
        .expect("bit_depth missing");
    assert_eq!(
        bit_depth.allowed_values.as_deref(),
        Some(
            &[
                PropertyValue::Integer(8),
                PropertyValue::Integer(12),
                PropertyValue::Integer(16)
            ][..]
        )
    );

    device.close().await.expect("Close failed");
}
