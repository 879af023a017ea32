//! In-memory device tree served by the demo gateway.
//!
//! The gateway object lists its devices in the `devices` array. Each device
//! is built from two class layers, a common layer and an output layer, that
//! contribute properties under distinct object keys. `powerUsage` is
//! measured on demand and needs a preparation step before it can be read.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info};
use vdcgate_core::{
    AccessDomain, AccessMode, ApiError, ApiValue, ApiValueType, FieldKey, ObjectKey,
    PropertyContainer, PropertyDescription, PropertyDescriptor, PropertyDescriptorPtr,
    PropertyFlags, PropertyPreparation,
};

const GATEWAY_KEY: ObjectKey = ObjectKey::new(1);
const DEVICE_LIST_KEY: ObjectKey = ObjectKey::new(2);
const COMMON_KEY: ObjectKey = ObjectKey::new(3);
const OUTPUT_KEY: ObjectKey = ObjectKey::new(4);

const GW_DSUID: usize = 0;
const GW_NAME: usize = 1;
const GW_MODEL: usize = 2;
const GW_DEVICES: usize = 3;

static GATEWAY_PROPS: [PropertyDescription; 4] = [
    PropertyDescription::new("dSUID", ApiValueType::String, GW_DSUID, GATEWAY_KEY),
    PropertyDescription::new("name", ApiValueType::String, GW_NAME, GATEWAY_KEY),
    PropertyDescription::new("model", ApiValueType::String, GW_MODEL, GATEWAY_KEY),
    PropertyDescription::new("devices", ApiValueType::Array, GW_DEVICES, GATEWAY_KEY),
];

const DEV_DSUID: usize = 0;
const DEV_NAME: usize = 1;
const DEV_ZONE: usize = 2;
const DEV_MODEL: usize = 3;

static COMMON_PROPS: [PropertyDescription; 4] = [
    PropertyDescription::new("dSUID", ApiValueType::String, DEV_DSUID, COMMON_KEY),
    PropertyDescription::new("name", ApiValueType::String, DEV_NAME, COMMON_KEY),
    PropertyDescription::new("zoneID", ApiValueType::Int64, DEV_ZONE, COMMON_KEY),
    PropertyDescription::new("model", ApiValueType::String, DEV_MODEL, COMMON_KEY),
];

const OUT_BRIGHTNESS: usize = 0;
const OUT_POWER: usize = 1;

static OUTPUT_PROPS: [PropertyDescription; 2] = [
    PropertyDescription::new("brightness", ApiValueType::Double, OUT_BRIGHTNESS, OUTPUT_KEY),
    PropertyDescription::new("powerUsage", ApiValueType::Double, OUT_POWER, OUTPUT_KEY)
        .with_flags(PropertyFlags::NEEDS_READ_PREP),
];

/// Root object of the tree.
pub struct Gateway {
    dsuid: String,
    model: String,
    name: Mutex<String>,
    staged_name: Mutex<Option<String>>,
    devices: Arc<DeviceList>,
}

impl Gateway {
    pub fn new(dsuid: impl Into<String>, name: impl Into<String>) -> Self {
        Gateway {
            dsuid: dsuid.into(),
            model: format!("vdcgate {}", env!("CARGO_PKG_VERSION")),
            name: Mutex::new(name.into()),
            staged_name: Mutex::new(None),
            devices: Arc::new(DeviceList::default()),
        }
    }

    pub fn dsuid(&self) -> &str {
        &self.dsuid
    }

    pub fn name(&self) -> String {
        self.name.lock().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn add_device(&self, device: Device) -> Arc<Device> {
        let device = Arc::new(device);
        if let Ok(mut devices) = self.devices.devices.write() {
            devices.push(device.clone());
        }
        device
    }

    pub fn device(&self, dsuid: &str) -> Option<Arc<Device>> {
        self.devices.find(dsuid)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Apply everything staged by preload writes, on the gateway and on
    /// every device. Returns the number of values committed.
    pub fn commit_staged(&self) -> usize {
        let mut committed = 0;
        if let Some(name) = self.staged_name.lock().ok().and_then(|mut s| s.take()) {
            if let Ok(mut current) = self.name.lock() {
                *current = name;
                committed += 1;
            }
        }
        for device in self.devices.all() {
            committed += device.commit_staged();
        }
        if committed > 0 {
            info!(count = committed, "Committed preloaded values");
        }
        committed
    }
}

#[async_trait]
impl PropertyContainer for Gateway {
    fn num_props(&self, _domain: AccessDomain, _parent: &PropertyDescriptorPtr) -> usize {
        GATEWAY_PROPS.len()
    }

    fn get_descriptor_by_index(
        &self,
        index: usize,
        _domain: AccessDomain,
        parent: &PropertyDescriptorPtr,
    ) -> Option<PropertyDescriptorPtr> {
        GATEWAY_PROPS
            .get(index)
            .map(|d| PropertyDescriptor::from_static(d, parent))
    }

    fn get_container(
        &self,
        descriptor: &PropertyDescriptorPtr,
        _domain: &mut AccessDomain,
    ) -> Option<Arc<dyn PropertyContainer>> {
        if descriptor.has_object_key(GATEWAY_KEY) && descriptor.field_key().as_usize() == GW_DEVICES
        {
            let devices: Arc<dyn PropertyContainer> = self.devices.clone();
            return Some(devices);
        }
        None
    }

    fn access_field(
        &self,
        mode: AccessMode,
        value: &mut dyn ApiValue,
        descriptor: &PropertyDescriptorPtr,
    ) -> bool {
        if !descriptor.has_object_key(GATEWAY_KEY) {
            return false;
        }
        match (mode, descriptor.field_key().as_usize()) {
            (AccessMode::Read, GW_DSUID) => value.set_string_value(&self.dsuid),
            (AccessMode::Read, GW_MODEL) => value.set_string_value(&self.model),
            (AccessMode::Read, GW_NAME) => value.set_string_value(&self.name()),
            (AccessMode::Write, GW_NAME) => match (self.name.lock(), self.staged_name.lock()) {
                (Ok(mut name), Ok(mut staged)) => {
                    *name = value.string_value();
                    *staged = None;
                }
                _ => return false,
            },
            (AccessMode::WritePreload, GW_NAME) => match self.staged_name.lock() {
                Ok(mut staged) => *staged = Some(value.string_value()),
                Err(_) => return false,
            },
            _ => return false,
        }
        true
    }
}

/// The `devices` array of the gateway, addressed by device dSUID or `#n`.
#[derive(Default)]
pub struct DeviceList {
    devices: RwLock<Vec<Arc<Device>>>,
}

impl DeviceList {
    fn find(&self, dsuid: &str) -> Option<Arc<Device>> {
        self.devices
            .read()
            .ok()?
            .iter()
            .find(|d| d.dsuid == dsuid)
            .cloned()
    }

    fn get(&self, index: usize) -> Option<Arc<Device>> {
        self.devices.read().ok()?.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.devices.read().map(|d| d.len()).unwrap_or(0)
    }

    fn all(&self) -> Vec<Arc<Device>> {
        self.devices.read().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PropertyContainer for DeviceList {
    fn num_props(&self, _domain: AccessDomain, _parent: &PropertyDescriptorPtr) -> usize {
        self.len()
    }

    fn get_descriptor_by_index(
        &self,
        index: usize,
        _domain: AccessDomain,
        parent: &PropertyDescriptorPtr,
    ) -> Option<PropertyDescriptorPtr> {
        let device = self.get(index)?;
        Some(PropertyDescriptor::dynamic(
            device.dsuid.clone(),
            ApiValueType::Object,
            PropertyFlags::NONE,
            FieldKey::new(index),
            DEVICE_LIST_KEY,
            parent,
        ))
    }

    fn get_container(
        &self,
        descriptor: &PropertyDescriptorPtr,
        _domain: &mut AccessDomain,
    ) -> Option<Arc<dyn PropertyContainer>> {
        let device: Arc<dyn PropertyContainer> = self.get(descriptor.field_key().as_usize())?;
        Some(device)
    }

    fn written_property(
        &self,
        mode: AccessMode,
        descriptor: &PropertyDescriptorPtr,
        _domain: AccessDomain,
        _container: &Arc<dyn PropertyContainer>,
    ) {
        if mode == AccessMode::Write {
            info!(device = descriptor.name(), "Device settings changed");
        }
    }
}

/// Values written in preload mode, waiting for the next commit.
#[derive(Debug, Clone, Default)]
struct Staged {
    name: Option<String>,
    zone_id: Option<i64>,
    brightness: Option<f64>,
}

#[derive(Debug, Clone)]
struct DeviceState {
    name: String,
    zone_id: i64,
    brightness: f64,
    power: Option<f64>,
    staged: Staged,
}

/// A dimmable light with a power meter.
pub struct Device {
    dsuid: String,
    model: String,
    rated_power: f64,
    meter_latency: Duration,
    state: Mutex<DeviceState>,
}

impl Device {
    pub fn new(dsuid: impl Into<String>, name: impl Into<String>, rated_power: f64) -> Self {
        Device {
            dsuid: dsuid.into(),
            model: "dimmer".to_string(),
            rated_power,
            meter_latency: Duration::from_millis(20),
            state: Mutex::new(DeviceState {
                name: name.into(),
                zone_id: 0,
                brightness: 0.0,
                power: None,
                staged: Staged::default(),
            }),
        }
    }

    pub fn with_meter_latency(mut self, latency: Duration) -> Self {
        self.meter_latency = latency;
        self
    }

    pub fn dsuid(&self) -> &str {
        &self.dsuid
    }

    pub fn brightness(&self) -> f64 {
        self.state.lock().map(|s| s.brightness).unwrap_or(0.0)
    }

    fn commit_staged(&self) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let staged = std::mem::take(&mut state.staged);
        let mut committed = 0;
        if let Some(name) = staged.name {
            state.name = name;
            committed += 1;
        }
        if let Some(zone_id) = staged.zone_id {
            state.zone_id = zone_id;
            committed += 1;
        }
        if let Some(brightness) = staged.brightness {
            state.brightness = brightness;
            committed += 1;
        }
        committed
    }

    /// Simulated meter read-out.
    async fn measure_power(&self) -> f64 {
        tokio::time::sleep(self.meter_latency).await;
        self.rated_power * self.brightness() / 100.0
    }

    fn access_common(&self, mode: AccessMode, value: &mut dyn ApiValue, field: usize) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        match (mode, field) {
            (AccessMode::Read, DEV_DSUID) => value.set_string_value(&self.dsuid),
            (AccessMode::Read, DEV_MODEL) => value.set_string_value(&self.model),
            (AccessMode::Read, DEV_NAME) => value.set_string_value(&state.name),
            (AccessMode::Read, DEV_ZONE) => value.set_int64_value(state.zone_id),
            (AccessMode::Write, DEV_NAME) => {
                state.name = value.string_value();
                state.staged.name = None;
            }
            (AccessMode::Write, DEV_ZONE) => {
                let Some(zone) = zone_id(value) else {
                    return false;
                };
                state.zone_id = zone;
                state.staged.zone_id = None;
            }
            (AccessMode::WritePreload, DEV_NAME) => state.staged.name = Some(value.string_value()),
            (AccessMode::WritePreload, DEV_ZONE) => {
                let Some(zone) = zone_id(value) else {
                    return false;
                };
                state.staged.zone_id = Some(zone);
            }
            _ => return false,
        }
        true
    }

    fn access_output(&self, mode: AccessMode, value: &mut dyn ApiValue, field: usize) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        match (mode, field) {
            (AccessMode::Read, OUT_BRIGHTNESS) => value.set_double_value(state.brightness),
            (AccessMode::Read, OUT_POWER) => match state.power {
                Some(power) => value.set_double_value(power),
                None => return false,
            },
            (AccessMode::Write, OUT_BRIGHTNESS) => {
                state.brightness = value.double_value().clamp(0.0, 100.0);
                state.staged.brightness = None;
            }
            (AccessMode::WritePreload, OUT_BRIGHTNESS) => {
                state.staged.brightness = Some(value.double_value().clamp(0.0, 100.0));
            }
            _ => return false,
        }
        true
    }
}

/// Zone ids are 16 bit.
fn zone_id(value: &dyn ApiValue) -> Option<i64> {
    Some(value.int64_value()).filter(|zone| (0..=0xffff).contains(zone))
}

#[async_trait]
impl PropertyContainer for Device {
    fn num_props(&self, _domain: AccessDomain, _parent: &PropertyDescriptorPtr) -> usize {
        COMMON_PROPS.len() + OUTPUT_PROPS.len()
    }

    fn get_descriptor_by_index(
        &self,
        index: usize,
        _domain: AccessDomain,
        parent: &PropertyDescriptorPtr,
    ) -> Option<PropertyDescriptorPtr> {
        let description = match index.checked_sub(COMMON_PROPS.len()) {
            None => &COMMON_PROPS[index],
            Some(output_index) => OUTPUT_PROPS.get(output_index)?,
        };
        Some(PropertyDescriptor::from_static(description, parent))
    }

    fn access_field(
        &self,
        mode: AccessMode,
        value: &mut dyn ApiValue,
        descriptor: &PropertyDescriptorPtr,
    ) -> bool {
        let field = descriptor.field_key().as_usize();
        match descriptor.object_key() {
            COMMON_KEY => self.access_common(mode, value, field),
            OUTPUT_KEY => self.access_output(mode, value, field),
            _ => false,
        }
    }

    async fn prepare_access(
        &self,
        _mode: AccessMode,
        preparation: &PropertyPreparation,
    ) -> Result<(), ApiError> {
        if !preparation.descriptor.has_object_key(OUTPUT_KEY)
            || preparation.descriptor.field_key().as_usize() != OUT_POWER
        {
            return Ok(());
        }
        debug!(device = %self.dsuid, "Reading power meter");
        let power = self.measure_power().await;
        let mut state = self
            .state
            .lock()
            .map_err(|_| ApiError::internal("device state poisoned"))?;
        state.power = Some(power);
        Ok(())
    }

    fn finish_access(&self, _mode: AccessMode, descriptor: &PropertyDescriptorPtr) {
        if descriptor.has_object_key(OUTPUT_KEY) && descriptor.field_key().as_usize() == OUT_POWER {
            if let Ok(mut state) = self.state.lock() {
                // stale once delivered
                state.power = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vdcgate_core::{access_property, JsonApiValue};

    fn gateway() -> Arc<Gateway> {
        let gateway = Gateway::new("GW", "Test gateway");
        gateway.add_device(
            Device::new("D1", "Kitchen", 60.0).with_meter_latency(Duration::from_millis(1)),
        );
        gateway.add_device(
            Device::new("D2", "Hall", 40.0).with_meter_latency(Duration::from_millis(1)),
        );
        Arc::new(gateway)
    }

    async fn read(root: Arc<dyn PropertyContainer>, query: serde_json::Value) -> serde_json::Value {
        let query = JsonApiValue::from_json(query);
        access_property(&root, AccessMode::Read, query.as_ref(), AccessDomain::DEFAULT, 3)
            .await
            .unwrap()
            .to_json()
    }

    async fn write(
        root: Arc<dyn PropertyContainer>,
        values: serde_json::Value,
    ) -> Result<(), ApiError> {
        let values = JsonApiValue::from_json(values);
        access_property(&root, AccessMode::Write, values.as_ref(), AccessDomain::DEFAULT, 3)
            .await
            .map(|_| ())
    }

    #[tokio::test]
    async fn test_device_layers_are_merged() {
        let gateway = gateway();
        let device: Arc<dyn PropertyContainer> = gateway.device("D1").unwrap();
        let result = read(device, json!(null)).await;
        assert_eq!(
            result,
            json!({
                "dSUID": "D1",
                "name": "Kitchen",
                "zoneID": 0,
                "model": "dimmer",
                "brightness": 0.0,
                "powerUsage": 0.0
            })
        );
    }

    #[tokio::test]
    async fn test_devices_by_dsuid_and_index() {
        let root: Arc<dyn PropertyContainer> = gateway();
        let result = read(
            root.clone(),
            json!({"devices": {"D2": {"name": null}, "#0": {"dSUID": null}}}),
        )
        .await;
        assert_eq!(result["devices"]["D2"], json!({"name": "Hall"}));
        assert_eq!(result["devices"]["D1"], json!({"dSUID": "D1"}));
    }

    #[tokio::test]
    async fn test_power_follows_brightness() {
        let gateway = gateway();
        let root: Arc<dyn PropertyContainer> = gateway.clone();
        write(root.clone(), json!({"devices": {"D1": {"brightness": 50.0}}}))
            .await
            .unwrap();

        let result = read(root, json!({"devices": {"D1": {"powerUsage": null}}})).await;
        assert_eq!(result["devices"]["D1"]["powerUsage"], json!(30.0));
        assert_eq!(gateway.device("D1").unwrap().brightness(), 50.0);
    }

    #[tokio::test]
    async fn test_read_only_fields_are_forbidden() {
        let root: Arc<dyn PropertyContainer> = gateway();
        let err = write(root.clone(), json!({"model": "other"})).await.unwrap_err();
        assert_eq!(err.code, vdcgate_core::ErrorCode::Forbidden);

        let err = write(root, json!({"devices": {"D1": {"zoneID": -4}}}))
            .await
            .unwrap_err();
        assert_eq!(err.code, vdcgate_core::ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn test_gateway_name_is_writable() {
        let gateway = gateway();
        let root: Arc<dyn PropertyContainer> = gateway.clone();
        write(root, json!({"name": "Renamed"})).await.unwrap();
        assert_eq!(gateway.name(), "Renamed");
    }

    async fn write_mode(
        root: Arc<dyn PropertyContainer>,
        mode: AccessMode,
        values: serde_json::Value,
    ) -> Result<(), ApiError> {
        let values = JsonApiValue::from_json(values);
        access_property(&root, mode, values.as_ref(), AccessDomain::DEFAULT, 3)
            .await
            .map(|_| ())
    }

    #[tokio::test]
    async fn test_preload_stages_until_commit() {
        let gateway = gateway();
        let root: Arc<dyn PropertyContainer> = gateway.clone();
        write_mode(
            root.clone(),
            AccessMode::WritePreload,
            json!({"name": "Staged", "devices": {"D1": {"brightness": 80.0, "zoneID": 5}}}),
        )
        .await
        .unwrap();

        assert_eq!(gateway.name(), "Test gateway");
        assert_eq!(gateway.device("D1").unwrap().brightness(), 0.0);

        assert_eq!(gateway.commit_staged(), 3);
        assert_eq!(gateway.name(), "Staged");
        assert_eq!(gateway.device("D1").unwrap().brightness(), 80.0);
        let result = read(root, json!({"devices": {"D1": {"zoneID": null}}})).await;
        assert_eq!(result["devices"]["D1"]["zoneID"], json!(5));

        assert_eq!(gateway.commit_staged(), 0);
    }

    #[tokio::test]
    async fn test_direct_write_replaces_staged_value() {
        let gateway = gateway();
        let root: Arc<dyn PropertyContainer> = gateway.clone();
        write_mode(root.clone(), AccessMode::WritePreload, json!({"devices": {"D2": {"brightness": 10.0}}}))
            .await
            .unwrap();
        write(root, json!({"devices": {"D2": {"brightness": 60.0}}}))
            .await
            .unwrap();

        assert_eq!(gateway.commit_staged(), 0);
        assert_eq!(gateway.device("D2").unwrap().brightness(), 60.0);
    }

    #[tokio::test]
    async fn test_preload_validates_zone() {
        let root: Arc<dyn PropertyContainer> = gateway();
        let err = write_mode(root, AccessMode::WritePreload, json!({"devices": {"D1": {"zoneID": 70000}}}))
            .await
            .unwrap_err();
        assert_eq!(err.code, vdcgate_core::ErrorCode::Forbidden);
    }
}
