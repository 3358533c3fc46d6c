//! Synthetic IMU for exercising the device pipeline without hardware.
//!
//! Produces accelerometer sine waves (0.1 g amplitude, 1/3 Hz, three phases 120° apart) and
//! gyroscope triangle waves (10 °/s amplitude, 1/5 Hz) at `sampleRateMs`.
//!
//! Sample layout, big-endian, 14 bytes:
//! `timestamp_ms & 0xffff: u16`, `ax ay az: i16` in mg, `gx gy gz: i16` in 0.01 °/s.

use alloc::{
    format,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::f32::consts::PI;
use log::info;
use serde_json::json;
use spin::Mutex;
use utils::{
    endian::BigEndianWriter,
    time::{Clock, is_timeout},
};

use super::{
    binary::gen_binary_data_msg,
    device::{Device, DeviceBase, DeviceContext, DeviceDataChangeCb, DeviceRef},
    types::DeviceTypeRecord,
};
use crate::config::ConfigDoc;

pub const DEMO_DEVICE_CLASS_NAME: &str = "DemoDevice";
pub const DEMO_PUBLISH_TYPE: &str = "ACCDEMO";
pub const DEMO_SAMPLE_LEN: usize = 14;

pub const DEFAULT_SAMPLE_RATE_MS: u64 = 100;
pub const MIN_SAMPLE_RATE_MS: u64 = 10;
pub const MAX_SAMPLE_RATE_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ImuSample {
    accel: [f32; 3],
    gyro: [f32; 3],
}

struct DataSub {
    cb: DeviceDataChangeCb,
    min_interval_ms: u64,
    last_report_ms: Option<u64>,
}

struct DemoState {
    sample_rate_ms: u64,
    last_update_ms: u64,
    data_timestamp_ms: u64,
    sample: ImuSample,
    subs: Vec<DataSub>,
}

pub struct DemoDevice {
    base: DeviceBase,
    clock: Arc<dyn Clock>,
    state: Mutex<DemoState>,
}

/// Triangle wave of period 2π and amplitude 1, starting at 0 and rising.
fn triangle_wave(t: f32) -> f32 {
    let period = 2.0 * PI;
    let mut x = libm::fmodf(t, period);
    if x < 0.0 {
        x += period;
    }
    if x < PI / 2.0 {
        2.0 * x / PI
    } else if x < 3.0 * PI / 2.0 {
        2.0 - 2.0 * x / PI
    } else {
        2.0 * x / PI - 4.0
    }
}

fn generate(time_ms: u64) -> ImuSample {
    let t = (time_ms % 3_600_000) as f32 * 0.001;
    let phases = [0.0, 2.0 * PI / 3.0, 4.0 * PI / 3.0];
    let accel_w = 2.0 * PI / 3.0;
    let gyro_w = 2.0 * PI / 5.0;
    let mut sample = ImuSample::default();
    for axis in 0..3 {
        sample.accel[axis] = 0.1 * libm::sinf(t * accel_w + phases[axis]);
        sample.gyro[axis] = 10.0 * triangle_wave(t * gyro_w + phases[axis]);
    }
    sample
}

fn encode(timestamp_ms: u64, sample: &ImuSample) -> Vec<u8> {
    let mut data = Vec::with_capacity(DEMO_SAMPLE_LEN);
    data.put_u16_be((timestamp_ms & 0xffff) as u16);
    for a in sample.accel {
        data.put_i16_be((a * 1000.0) as i16);
    }
    for g in sample.gyro {
        data.put_i16_be((g * 100.0) as i16);
    }
    data
}

impl DemoDevice {
    pub fn new(class_name: &str, config: ConfigDoc, clock: Arc<dyn Clock>) -> DemoDevice {
        let now = clock.millis();
        DemoDevice {
            base: DeviceBase::from_config(class_name, config),
            clock,
            state: Mutex::new(DemoState {
                sample_rate_ms: DEFAULT_SAMPLE_RATE_MS,
                last_update_ms: now,
                data_timestamp_ms: now,
                sample: ImuSample::default(),
                subs: Vec::new(),
            }),
        }
    }

    /// [super::factory::DeviceCreateFn] for [DEMO_DEVICE_CLASS_NAME].
    pub fn create(class_name: &str, config: ConfigDoc, ctx: &DeviceContext) -> Option<DeviceRef> {
        Some(Arc::new(DemoDevice::new(class_name, config, ctx.clock.clone())))
    }

    pub fn sample_rate_ms(&self) -> u64 {
        self.state.lock().sample_rate_ms
    }

    /// The current sample in wire layout.
    pub fn sample_bytes(&self) -> Vec<u8> {
        let state = self.state.lock();
        encode(state.data_timestamp_ms, &state.sample)
    }

    /// Generate a sample at the current time and report it to due subscribers.
    fn update(&self) {
        let now = self.clock.millis();
        let (data, reports) = {
            let mut state = self.state.lock();
            state.sample = generate(now);
            state.data_timestamp_ms = now;
            state.last_update_ms = now;
            let mut reports = Vec::new();
            for sub in state.subs.iter_mut() {
                if sub.last_report_ms.is_none_or(|last| is_timeout(now, last, sub.min_interval_ms)) {
                    sub.last_report_ms = Some(now);
                    reports.push(sub.cb.clone());
                }
            }
            (encode(now, &state.sample), reports)
        };
        let type_index = self.base.type_index();
        for cb in reports {
            cb(type_index, &data);
        }
    }
}

impl Device for DemoDevice {
    fn base(&self) -> &DeviceBase {
        &self.base
    }

    fn publish_device_type(&self) -> String {
        DEMO_PUBLISH_TYPE.into()
    }

    fn setup(&self) {
        let rate = self
            .base
            .config()
            .get_u64("sampleRateMs", DEFAULT_SAMPLE_RATE_MS)
            .clamp(MIN_SAMPLE_RATE_MS, MAX_SAMPLE_RATE_MS);
        self.state.lock().sample_rate_ms = rate;
        self.update();
        info!("setup device {} rate={}ms", self.base.name(), rate);
    }

    fn service(&self) {
        let due = {
            let state = self.state.lock();
            is_timeout(self.clock.millis(), state.last_update_ms, state.sample_rate_ms)
        };
        if due {
            self.update();
        }
    }

    /// Keyed by the device's hex address so devices sharing a publish type merge cleanly.
    fn status_json(&self) -> String {
        let key = format!("{:x}", self.base.id().address());
        json!({key: {"x": hex::encode(self.sample_bytes()), "_t": DEMO_PUBLISH_TYPE}}).to_string()
    }

    fn status_binary(&self) -> Vec<u8> {
        let id = self.base.id();
        let mut out = Vec::new();
        gen_binary_data_msg(
            &mut out,
            id.bus_num(),
            id.address(),
            self.base.type_index(),
            true,
            false,
            &self.sample_bytes(),
        );
        out
    }

    fn debug_json(&self) -> String {
        json!({
            "name": self.base.name(),
            "type": DEMO_PUBLISH_TYPE,
            "sampleRate": self.sample_rate_ms(),
        })
        .to_string()
    }

    fn state_hash(&self) -> u32 {
        self.state.lock().data_timestamp_ms as u32
    }

    fn named_value(&self, value_name: &str) -> Option<f64> {
        let state = self.state.lock();
        let idx = ["ax", "ay", "az", "gx", "gy", "gz"]
            .iter()
            .position(|n| *n == value_name)?;
        let v = if idx < 3 { state.sample.accel[idx] } else { state.sample.gyro[idx - 3] };
        Some(v as f64)
    }

    fn register_for_device_data(&self, cb: DeviceDataChangeCb, min_interval_ms: u32) -> bool {
        self.state.lock().subs.push(DataSub {
            cb,
            min_interval_ms: min_interval_ms as u64,
            last_report_ms: None,
        });
        true
    }

    fn device_type_record(&self) -> Option<DeviceTypeRecord> {
        let field = |n: &str, u: &str, d: u32, f: &str| {
            json!({"n": n, "t": ">h", "u": u, "r": [-2000, 2000], "d": d, "f": f, "o": "float"})
        };
        Some(DeviceTypeRecord {
            name: DEMO_PUBLISH_TYPE.into(),
            desc: "ACCDEMO Accelerometer/Gyroscope".into(),
            sample_size: DEMO_SAMPLE_LEN as u16,
            info: json!({
                "name": "ACCDEMO Demo IMU",
                "manu": "Demo",
                "type": DEMO_PUBLISH_TYPE,
                "resp": {"b": DEMO_SAMPLE_LEN, "a": [
                    field("ax", "mg", 1000, ".3f"),
                    field("ay", "mg", 1000, ".3f"),
                    field("az", "mg", 1000, ".3f"),
                    field("gx", "deg/s", 100, ".2f"),
                    field("gy", "deg/s", 100, ".2f"),
                    field("gz", "deg/s", 100, ".2f"),
                ]}
            }),
        })
    }
}
