//! A mock camera driver that generates synthetic frames.
//!
//! Implements [`CameraDriver`] without hardware, for tests and bring-up of
//! code layered on the HAL. The mock models a 2048x2048 16-bit scientific
//! sensor with a 6.5 um pixel pitch, supports the full standardized property
//! table, and reproduces the quirks the abstraction layer has to cope with:
//!
//! - **value snapping**: `frame_rate` lands on a 0.5 Hz grid;
//! - **schema side effects**: `bit_depth` changes the valid `frame_rate`
//!   range (and clamps its value), region geometry properties bound each
//!   other's ranges;
//! - **restart-required settings**: geometry and mode writes while a capture
//!   run is live report `need_restart`.
//!
//! The diagnostic property `inject_fault` makes the next capture run emit one
//! driver error event after its first frame.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::driver::{ApplyOutcome, CameraDriver, CapturedFrame, DriverEvent};
use crate::frame::PixelFormat;
use crate::property::{names, PropertyKind, PropertySchema, PropertyValue};

const SENSOR_WIDTH: i64 = 2048;
const SENSOR_HEIGHT: i64 = 2048;
const PIXEL_SIZE_UM: f64 = 6.5;
const MODEL: &str = "SimCam-2048";
const DEVICE_ID: &str = "mock:0";

/// Diagnostic property: emit one capture error event on the next run.
pub const INJECT_FAULT: &str = "inject_fault";

/// Settings that only take effect at the next capture run.
const RESTART_REQUIRED: &[&str] = &[
    names::ACQUIRE_MODE,
    names::FIXED_FRAME_COUNT,
    names::TRIGGER_MODE,
    names::PROTECT_DATA,
    names::BUFFER_SIZE,
    names::BIT_DEPTH,
    names::BINNING_X,
    names::BINNING_Y,
    names::REGION_X,
    names::REGION_Y,
    names::REGION_WIDTH,
    names::REGION_HEIGHT,
];

struct MockState {
    acquire_mode: String,
    fixed_frame_count: i64,
    trigger_mode: String,
    protect_data: bool,
    buffer_size: i64,
    bit_depth: i64,
    exposure_time: f64,
    frame_rate: f64,
    binning_x: i64,
    binning_y: i64,
    region_x: i64,
    region_y: i64,
    region_width: i64,
    region_height: i64,
    inject_fault: bool,
    capturing: bool,
    stop_tx: Option<watch::Sender<bool>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            acquire_mode: "free_run".to_string(),
            fixed_frame_count: 10,
            trigger_mode: "none".to_string(),
            protect_data: false,
            buffer_size: 64,
            bit_depth: 16,
            exposure_time: 0.010,
            frame_rate: 10.0,
            binning_x: 1,
            binning_y: 1,
            region_x: 0,
            region_y: 0,
            region_width: SENSOR_WIDTH,
            region_height: SENSOR_HEIGHT,
            inject_fault: false,
            capturing: false,
            stop_tx: None,
        }
    }
}

impl MockState {
    /// Readout speed drops at higher bit depths.
    fn max_frame_rate(&self) -> f64 {
        if self.bit_depth == 8 {
            500.0
        } else {
            250.0
        }
    }
}

/// Mock camera for testing without hardware.
pub struct MockCamera {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn enum_values(values: &[&str]) -> Vec<PropertyValue> {
    values
        .iter()
        .map(|v| PropertyValue::EnumText((*v).to_string()))
        .collect()
}

fn schema_for(state: &MockState, name: &str) -> Option<PropertySchema> {
    let schema = match name {
        names::ACQUIRE_MODE => PropertySchema::new(PropertyKind::EnumText, "Acquisition mode")
            .with_allowed(enum_values(&["free_run", "fixed_length"])),
        names::FIXED_FRAME_COUNT => {
            PropertySchema::new(PropertyKind::Integer, "Frames per fixed-length run")
                .with_range(1.0, 1_000_000.0)
        }
        names::TRIGGER_MODE => PropertySchema::new(PropertyKind::EnumText, "Trigger mode")
            .with_allowed(enum_values(&[
                "none",
                "trigger_first",
                "trigger_frames",
                "trigger_exposure",
            ])),
        names::PROTECT_DATA => PropertySchema::new(
            PropertyKind::Boolean,
            "Copy frame data out of the transient buffer at capture time",
        ),
        names::BUFFER_SIZE => {
            PropertySchema::new(PropertyKind::Integer, "Acquisition ring capacity in frames")
                .with_range(1.0, 4096.0)
        }
        names::BIT_DEPTH => PropertySchema::new(PropertyKind::Integer, "Bits per pixel")
            .with_allowed(vec![
                PropertyValue::Integer(8),
                PropertyValue::Integer(12),
                PropertyValue::Integer(16),
            ]),
        names::EXPOSURE_TIME => {
            PropertySchema::new(PropertyKind::Float, "Exposure time in seconds")
                .with_range(0.000_01, 10.0)
        }
        names::FRAME_RATE => PropertySchema::new(PropertyKind::Float, "Frame rate in Hz")
            .with_range(0.5, state.max_frame_rate()),
        names::BINNING_X | names::BINNING_Y => {
            PropertySchema::new(PropertyKind::Integer, "Binning factor").with_allowed(vec![
                PropertyValue::Integer(1),
                PropertyValue::Integer(2),
                PropertyValue::Integer(4),
            ])
        }
        names::REGION_X => {
            PropertySchema::new(PropertyKind::Integer, "ROI origin X (unbinned)")
                .with_range(0.0, (SENSOR_WIDTH - state.region_width) as f64)
        }
        names::REGION_Y => {
            PropertySchema::new(PropertyKind::Integer, "ROI origin Y (unbinned)")
                .with_range(0.0, (SENSOR_HEIGHT - state.region_height) as f64)
        }
        names::REGION_WIDTH => {
            PropertySchema::new(PropertyKind::Integer, "ROI width (unbinned)")
                .with_range(1.0, (SENSOR_WIDTH - state.region_x) as f64)
        }
        names::REGION_HEIGHT => {
            PropertySchema::new(PropertyKind::Integer, "ROI height (unbinned)")
                .with_range(1.0, (SENSOR_HEIGHT - state.region_y) as f64)
        }
        names::SENSOR_WIDTH => {
            PropertySchema::new(PropertyKind::Integer, "Sensor width in pixels").read_only()
        }
        names::SENSOR_HEIGHT => {
            PropertySchema::new(PropertyKind::Integer, "Sensor height in pixels").read_only()
        }
        names::PIXEL_WIDTH => {
            PropertySchema::new(PropertyKind::Float, "Pixel width in micrometers").read_only()
        }
        names::PIXEL_HEIGHT => {
            PropertySchema::new(PropertyKind::Float, "Pixel height in micrometers").read_only()
        }
        names::CAMERA_MODEL => {
            PropertySchema::new(PropertyKind::Text, "Camera model").read_only()
        }
        INJECT_FAULT => PropertySchema::new(
            PropertyKind::Boolean,
            "Testing aid: emit one capture error event on the next run",
        ),
        _ => return None,
    };
    Some(schema)
}

fn value_for(state: &MockState, name: &str) -> Option<PropertyValue> {
    let value = match name {
        names::ACQUIRE_MODE => PropertyValue::EnumText(state.acquire_mode.clone()),
        names::FIXED_FRAME_COUNT => PropertyValue::Integer(state.fixed_frame_count),
        names::TRIGGER_MODE => PropertyValue::EnumText(state.trigger_mode.clone()),
        names::PROTECT_DATA => PropertyValue::Boolean(state.protect_data),
        names::BUFFER_SIZE => PropertyValue::Integer(state.buffer_size),
        names::BIT_DEPTH => PropertyValue::Integer(state.bit_depth),
        names::EXPOSURE_TIME => PropertyValue::Float(state.exposure_time),
        names::FRAME_RATE => PropertyValue::Float(state.frame_rate),
        names::BINNING_X => PropertyValue::Integer(state.binning_x),
        names::BINNING_Y => PropertyValue::Integer(state.binning_y),
        names::REGION_X => PropertyValue::Integer(state.region_x),
        names::REGION_Y => PropertyValue::Integer(state.region_y),
        names::REGION_WIDTH => PropertyValue::Integer(state.region_width),
        names::REGION_HEIGHT => PropertyValue::Integer(state.region_height),
        names::SENSOR_WIDTH => PropertyValue::Integer(SENSOR_WIDTH),
        names::SENSOR_HEIGHT => PropertyValue::Integer(SENSOR_HEIGHT),
        names::PIXEL_WIDTH => PropertyValue::Float(PIXEL_SIZE_UM),
        names::PIXEL_HEIGHT => PropertyValue::Float(PIXEL_SIZE_UM),
        names::CAMERA_MODEL => PropertyValue::Text(MODEL.to_string()),
        INJECT_FAULT => PropertyValue::Boolean(state.inject_fault),
        _ => return None,
    };
    Some(value)
}

/// All supported property names, in presentation order.
const ALL_NAMES: &[&str] = &[
    names::ACQUIRE_MODE,
    names::FIXED_FRAME_COUNT,
    names::TRIGGER_MODE,
    names::PROTECT_DATA,
    names::BUFFER_SIZE,
    names::BIT_DEPTH,
    names::EXPOSURE_TIME,
    names::FRAME_RATE,
    names::BINNING_X,
    names::BINNING_Y,
    names::REGION_X,
    names::REGION_Y,
    names::REGION_WIDTH,
    names::REGION_HEIGHT,
    names::SENSOR_WIDTH,
    names::SENSOR_HEIGHT,
    names::PIXEL_WIDTH,
    names::PIXEL_HEIGHT,
    names::CAMERA_MODEL,
    INJECT_FAULT,
];

/// Snaps a requested frame rate to the supported 0.5 Hz grid and clamps it to
/// the current readout limit.
fn snap_frame_rate(requested: f64, max: f64) -> f64 {
    ((requested * 2.0).round() / 2.0).clamp(0.5, max)
}

fn synth_frame(
    width: u32,
    height: u32,
    format: PixelFormat,
    sequence: u64,
    rng: &mut SmallRng,
) -> Bytes {
    let max_value = (1u32 << format.bit_depth()) - 1;
    let mut buf = BytesMut::with_capacity(width as usize * height as usize * format.bytes_per_pixel());

    for y in 0..height {
        for x in 0..width {
            let ramp = (x + y + sequence as u32) % (max_value / 2 + 1);
            let noise = rng.gen_range(0..=(max_value / 16).max(1));
            let value = (ramp + noise).min(max_value);
            match format {
                PixelFormat::Mono8 => buf.put_u8(value as u8),
                PixelFormat::Mono12 | PixelFormat::Mono16 => buf.put_u16_le(value as u16),
            }
        }
    }

    buf.freeze()
}

#[async_trait]
impl CameraDriver for MockCamera {
    async fn list_devices() -> Result<Vec<String>> {
        Ok(vec![DEVICE_ID.to_string()])
    }

    async fn open(device_id: &str) -> Result<Self> {
        if device_id != DEVICE_ID {
            bail!("unknown device id '{device_id}'");
        }
        info!(device_id, model = MODEL, "mock camera opened");
        Ok(Self {
            state: Arc::new(Mutex::new(MockState::default())),
        })
    }

    async fn query(&self, name: &str) -> Result<PropertyValue> {
        let state = lock(&self.state);
        value_for(&state, name).ok_or_else(|| anyhow!("unknown property '{name}'"))
    }

    async fn apply(&self, name: &str, value: PropertyValue) -> Result<ApplyOutcome> {
        let mut state = lock(&self.state);
        let mut info_changed: Vec<String> = Vec::new();

        let actual = match name {
            names::ACQUIRE_MODE => {
                state.acquire_mode = value
                    .as_str()
                    .ok_or_else(|| anyhow!("acquire_mode expects text"))?
                    .to_string();
                PropertyValue::EnumText(state.acquire_mode.clone())
            }
            names::FIXED_FRAME_COUNT => {
                state.fixed_frame_count =
                    value.as_i64().ok_or_else(|| anyhow!("expects integer"))?;
                PropertyValue::Integer(state.fixed_frame_count)
            }
            names::TRIGGER_MODE => {
                state.trigger_mode = value
                    .as_str()
                    .ok_or_else(|| anyhow!("trigger_mode expects text"))?
                    .to_string();
                PropertyValue::EnumText(state.trigger_mode.clone())
            }
            names::PROTECT_DATA => {
                state.protect_data = value.as_bool().ok_or_else(|| anyhow!("expects bool"))?;
                PropertyValue::Boolean(state.protect_data)
            }
            names::BUFFER_SIZE => {
                state.buffer_size = value.as_i64().ok_or_else(|| anyhow!("expects integer"))?;
                PropertyValue::Integer(state.buffer_size)
            }
            names::BIT_DEPTH => {
                state.bit_depth = value.as_i64().ok_or_else(|| anyhow!("expects integer"))?;
                // Readout limit moved; clamp the current rate into the new range.
                let max = state.max_frame_rate();
                if state.frame_rate > max {
                    state.frame_rate = max;
                }
                info_changed.push(names::FRAME_RATE.to_string());
                PropertyValue::Integer(state.bit_depth)
            }
            names::EXPOSURE_TIME => {
                state.exposure_time = value.as_f64().ok_or_else(|| anyhow!("expects float"))?;
                PropertyValue::Float(state.exposure_time)
            }
            names::FRAME_RATE => {
                let requested = value.as_f64().ok_or_else(|| anyhow!("expects float"))?;
                state.frame_rate = snap_frame_rate(requested, state.max_frame_rate());
                PropertyValue::Float(state.frame_rate)
            }
            names::BINNING_X => {
                state.binning_x = value.as_i64().ok_or_else(|| anyhow!("expects integer"))?;
                PropertyValue::Integer(state.binning_x)
            }
            names::BINNING_Y => {
                state.binning_y = value.as_i64().ok_or_else(|| anyhow!("expects integer"))?;
                PropertyValue::Integer(state.binning_y)
            }
            names::REGION_X => {
                state.region_x = value.as_i64().ok_or_else(|| anyhow!("expects integer"))?;
                info_changed.push(names::REGION_WIDTH.to_string());
                PropertyValue::Integer(state.region_x)
            }
            names::REGION_Y => {
                state.region_y = value.as_i64().ok_or_else(|| anyhow!("expects integer"))?;
                info_changed.push(names::REGION_HEIGHT.to_string());
                PropertyValue::Integer(state.region_y)
            }
            names::REGION_WIDTH => {
                state.region_width = value.as_i64().ok_or_else(|| anyhow!("expects integer"))?;
                info_changed.push(names::REGION_X.to_string());
                PropertyValue::Integer(state.region_width)
            }
            names::REGION_HEIGHT => {
                state.region_height = value.as_i64().ok_or_else(|| anyhow!("expects integer"))?;
                info_changed.push(names::REGION_Y.to_string());
                PropertyValue::Integer(state.region_height)
            }
            INJECT_FAULT => {
                state.inject_fault = value.as_bool().ok_or_else(|| anyhow!("expects bool"))?;
                PropertyValue::Boolean(state.inject_fault)
            }
            names::SENSOR_WIDTH
            | names::SENSOR_HEIGHT
            | names::PIXEL_WIDTH
            | names::PIXEL_HEIGHT
            | names::CAMERA_MODEL => bail!("property '{name}' is read-only"),
            _ => bail!("unknown property '{name}'"),
        };

        let need_restart = state.capturing && RESTART_REQUIRED.contains(&name);
        debug!(property = name, value = %actual, need_restart, "mock property applied");

        Ok(ApplyOutcome {
            actual,
            need_restart,
            info_changed,
        })
    }

    async fn schema(&self, name: &str) -> Result<Option<PropertySchema>> {
        let state = lock(&self.state);
        Ok(schema_for(&state, name))
    }

    async fn describe(&self) -> Result<Vec<(String, PropertySchema)>> {
        let state = lock(&self.state);
        Ok(ALL_NAMES
            .iter()
            .filter_map(|name| schema_for(&state, name).map(|s| (name.to_string(), s)))
            .collect())
    }

    async fn begin_capture(&self) -> Result<mpsc::Receiver<DriverEvent>> {
        let (width, height, format, period, limit, fault, stop_rx) = {
            let mut state = lock(&self.state);
            if state.capturing {
                bail!("capture already running");
            }
            let format = PixelFormat::from_bit_depth(state.bit_depth as u32)
                .ok_or_else(|| anyhow!("unsupported bit depth {}", state.bit_depth))?;
            state.capturing = true;
            let (stop_tx, stop_rx) = watch::channel(false);
            state.stop_tx = Some(stop_tx);

            let width = (state.region_width / state.binning_x).max(1) as u32;
            let height = (state.region_height / state.binning_y).max(1) as u32;
            // The frame interval cannot be shorter than the exposure itself.
            let period = Duration::from_secs_f64((1.0 / state.frame_rate).max(state.exposure_time));
            let limit = (state.acquire_mode == "fixed_length")
                .then_some(state.fixed_frame_count.max(0) as u64);
            (width, height, format, period, limit, state.inject_fault, stop_rx)
        };

        let (tx, rx) = mpsc::channel(256);
        let shared = self.state.clone();
        let mut stop_rx = stop_rx;

        tokio::spawn(async move {
            let mut rng = SmallRng::from_entropy();
            let mut sequence = 0u64;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let frame = CapturedFrame {
                            data: synth_frame(width, height, format, sequence, &mut rng),
                            width,
                            height,
                            format,
                            sequence,
                            extra: Some(serde_json::json!({
                                "camera_time_us": sequence * period.as_micros() as u64,
                            })),
                        };
                        if tx.send(DriverEvent::Frame(frame)).await.is_err() {
                            break;
                        }
                        if fault && sequence == 0 {
                            let _ = tx
                                .send(DriverEvent::Error("injected capture fault".to_string()))
                                .await;
                        }
                        sequence += 1;
                        if limit.is_some_and(|n| sequence >= n) {
                            break;
                        }
                    }
                }
            }

            // Clear run state before announcing Stopped so an immediate
            // restart never races the flag.
            {
                let mut state = lock(&shared);
                state.capturing = false;
                state.stop_tx = None;
            }
            let _ = tx.send(DriverEvent::Stopped).await;
            debug!(frames = sequence, "mock capture run ended");
        });

        Ok(rx)
    }

    async fn end_capture(&self) -> Result<()> {
        let state = lock(&self.state);
        if let Some(stop_tx) = &state.stop_tx {
            let _ = stop_tx.send(true);
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.end_capture().await?;
        info!(model = MODEL, "mock camera closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_rejects_unknown_id() {
        assert!(MockCamera::open("mock:7").await.is_err());
        assert!(MockCamera::open(DEVICE_ID).await.is_ok());
    }

    #[test]
    fn test_frame_rate_snapping() {
        assert_eq!(snap_frame_rate(10.0, 250.0), 10.0);
        assert_eq!(snap_frame_rate(10.3, 250.0), 10.5);
        assert_eq!(snap_frame_rate(10.2, 250.0), 10.0);
        assert_eq!(snap_frame_rate(400.0, 250.0), 250.0);
        assert_eq!(snap_frame_rate(0.1, 250.0), 0.5);
    }

    #[tokio::test]
    async fn test_region_schema_ranges_are_coupled() {
        let camera = MockCamera::open(DEVICE_ID).await.unwrap();
        camera
            .apply(names::REGION_WIDTH, PropertyValue::Integer(512))
            .await
            .unwrap();
        let schema = camera.schema(names::REGION_X).await.unwrap().unwrap();
        assert_eq!(schema.range, Some((0.0, (SENSOR_WIDTH - 512) as f64)));
    }

    #[tokio::test]
    async fn test_fixed_length_run_emits_exact_count_then_stops() {
        let camera = MockCamera::open(DEVICE_ID).await.unwrap();
        for (name, value) in [
            (names::ACQUIRE_MODE, PropertyValue::EnumText("fixed_length".into())),
            (names::FIXED_FRAME_COUNT, PropertyValue::Integer(3)),
            (names::FRAME_RATE, PropertyValue::Float(200.0)),
            (names::REGION_WIDTH, PropertyValue::Integer(16)),
            (names::REGION_HEIGHT, PropertyValue::Integer(16)),
            (names::EXPOSURE_TIME, PropertyValue::Float(0.001)),
        ] {
            camera.apply(name, value).await.unwrap();
        }

        let mut rx = camera.begin_capture().await.unwrap();
        let mut frames = 0;
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
            {
                Some(DriverEvent::Frame(f)) => {
                    assert_eq!(f.width, 16);
                    assert_eq!(f.data.len(), 16 * 16 * 2);
                    frames += 1;
                }
                Some(DriverEvent::Stopped) => break,
                Some(DriverEvent::Error(e)) => panic!("unexpected error: {e}"),
                None => panic!("channel closed without Stopped"),
            }
        }
        assert_eq!(frames, 3);
    }

    #[tokio::test]
    async fn test_begin_capture_twice_fails() {
        let camera = MockCamera::open(DEVICE_ID).await.unwrap();
        camera
            .apply(names::REGION_WIDTH, PropertyValue::Integer(16))
            .await
            .unwrap();
        camera
            .apply(names::REGION_HEIGHT, PropertyValue::Integer(16))
            .await
            .unwrap();
        let _rx = camera.begin_capture().await.unwrap();
        assert!(camera.begin_capture().await.is_err());
        camera.end_capture().await.unwrap();
    }

    #[tokio::test]
    async fn test_need_restart_reported_while_capturing() {
        let camera = MockCamera::open(DEVICE_ID).await.unwrap();
        camera
            .apply(names::REGION_WIDTH, PropertyValue::Integer(16))
            .await
            .unwrap();
        camera
            .apply(names::REGION_HEIGHT, PropertyValue::Integer(16))
            .await
            .unwrap();

        let outcome = camera
            .apply(names::BINNING_X, PropertyValue::Integer(2))
            .await
            .unwrap();
        assert!(!outcome.need_restart);

        let _rx = camera.begin_capture().await.unwrap();
        let outcome = camera
            .apply(names::BINNING_X, PropertyValue::Integer(4))
            .await
            .unwrap();
        assert!(outcome.need_restart);

        // Live-tunable settings never require a restart.
        let outcome = camera
            .apply(names::EXPOSURE_TIME, PropertyValue::Float(0.002))
            .await
            .unwrap();
        assert!(!outcome.need_restart);

        camera.end_capture().await.unwrap();
    }
}
