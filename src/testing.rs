//! In-memory controller double used across the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::controller::{
    DeviceController, DeviceIdentity, Error, Unit, UnitIdentity, UnitProfile,
};
use crate::snapshot::Snapshot;

pub(crate) fn status_with_both_units() -> serde_json::Value {
    serde_json::json!({
        "function/SpaceHeating": {
            "operations": {
                "Power": "on",
                "OperationMode": "heating",
                "LeavingWaterTemperatureOffsetHeating": 0.0,
            },
            "sensors": {
                "IndoorTemperature": 22.0,
                "OutdoorTemperature": 7.0,
                "LeavingWaterTemperatureCurrent": 35.0,
            },
            "states": { "WeatherDependentState": false, "ErrorState": false },
        },
        "function/DomesticHotWaterTank": {
            "operations": { "Power": "on", "TargetTemperature": 48.0, "powerful": 0 },
            "sensors": { "TankTemperature": 44.0 },
            "states": { "ErrorState": false },
        },
    })
}

pub(crate) fn climate_profile() -> UnitProfile {
    UnitProfile::from_json(&serde_json::json!({
        "Power": { "settable": true },
        "OperationMode": { "settable": true },
        "LeavingWaterTemperatureHeating": {
            "settable": false, "minValue": 25.0, "maxValue": 55.0, "stepValue": 1.0
        },
        "LeavingWaterTemperatureOffsetHeating": {
            "settable": true, "minValue": -5.0, "maxValue": 5.0, "stepValue": 1.0
        },
    }))
}

pub(crate) fn tank_profile() -> UnitProfile {
    UnitProfile::from_json(&serde_json::json!({
        "Power": { "settable": true },
        "powerful": { "settable": true },
        "TargetTemperature": {
            "heating": { "settable": false, "minValue": 30.0, "maxValue": 60.0, "stepValue": 1.0 }
        },
        "DomesticHotWaterTemperatureHeating": {
            "settable": true, "minValue": 30.0, "maxValue": 60.0, "stepValue": 1.0
        },
    }))
}

enum NextStatus {
    Ready(Snapshot),
    Fail(Error),
    Stall,
}

pub(crate) struct MockController {
    identity: DeviceIdentity,
    has_tank: bool,
    statuses: Mutex<VecDeque<NextStatus>>,
    last_status: Mutex<Option<Snapshot>>,
    profiles: Mutex<BTreeMap<Unit, UnitProfile>>,
    commands: Mutex<Vec<String>>,
    power: Mutex<BTreeMap<Unit, bool>>,
    reload_calls: AtomicUsize,
    unit_identity_calls: AtomicUsize,
}

impl MockController {
    pub(crate) fn new() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(Unit::ClimateControl, climate_profile());
        profiles.insert(Unit::HotWaterTank, tank_profile());
        Self {
            identity: DeviceIdentity {
                serial_number: "0000000001234567".to_string(),
                manufacturer: "Daikin".to_string(),
                model_name: "Altherma".to_string(),
                firmware: "436CC161000".to_string(),
                duty: "LT 8kW".to_string(),
            },
            has_tank: true,
            statuses: Mutex::new(VecDeque::new()),
            last_status: Mutex::new(None),
            profiles: Mutex::new(profiles),
            commands: Mutex::new(Vec::new()),
            power: Mutex::new(BTreeMap::new()),
            reload_calls: AtomicUsize::new(0),
            unit_identity_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn without_tank() -> Self {
        let mut this = Self::new();
        this.has_tank = false;
        this.profiles.get_mut().unwrap().remove(&Unit::HotWaterTank);
        this
    }

    pub(crate) fn push_status(&self, status: serde_json::Value) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(NextStatus::Ready(Snapshot::new(status)));
    }

    pub(crate) fn push_error(&self, error: Error) {
        self.statuses.lock().unwrap().push_back(NextStatus::Fail(error));
    }

    pub(crate) fn stall_next_status(&self) {
        self.statuses.lock().unwrap().push_back(NextStatus::Stall);
    }

    pub(crate) fn set_profile(&self, unit: Unit, profile: UnitProfile) {
        self.profiles.lock().unwrap().insert(unit, profile);
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn reload_profile_calls(&self) -> usize {
        self.reload_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn unit_identity_calls(&self) -> usize {
        self.unit_identity_calls.load(Ordering::Relaxed)
    }

    fn record(&self, command: String) {
        self.commands.lock().unwrap().push(command);
    }
}

impl DeviceController for MockController {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn has_unit(&self, unit: Unit) -> bool {
        match unit {
            Unit::ClimateControl => true,
            Unit::HotWaterTank => self.has_tank,
        }
    }

    async fn fetch_status(&self) -> Result<Snapshot, Error> {
        let next = self.statuses.lock().unwrap().pop_front();
        match next {
            Some(NextStatus::Ready(snapshot)) => {
                *self.last_status.lock().unwrap() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(NextStatus::Fail(error)) => Err(error),
            Some(NextStatus::Stall) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::Timeout)
            }
            // Out of scripted responses: repeat the last snapshot.
            None => self
                .last_status
                .lock()
                .unwrap()
                .clone()
                .ok_or(Error::Timeout),
        }
    }

    async fn profile(&self, unit: Unit) -> Result<UnitProfile, Error> {
        self.profiles
            .lock()
            .unwrap()
            .get(&unit)
            .cloned()
            .ok_or(Error::NoSuchUnit(unit))
    }

    async fn reload_profiles(&self) -> Result<(), Error> {
        self.reload_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn is_turned_on(&self, unit: Unit) -> Result<bool, Error> {
        Ok(self.power.lock().unwrap().get(&unit).copied().unwrap_or(true))
    }

    async fn set_power(&self, unit: Unit, on: bool) -> Result<(), Error> {
        self.power.lock().unwrap().insert(unit, on);
        self.record(format!("{unit}:power={on}"));
        Ok(())
    }

    async fn call_operation(
        &self,
        unit: Unit,
        operation: &str,
        value: &serde_json::Value,
    ) -> Result<(), Error> {
        self.record(format!("{unit}:{operation}={value}"));
        Ok(())
    }

    async fn unit_identity(&self, unit: Unit) -> Result<UnitIdentity, Error> {
        if !self.has_unit(unit) {
            return Err(Error::NoSuchUnit(unit));
        }
        self.unit_identity_calls.fetch_add(1, Ordering::Relaxed);
        Ok(UnitIdentity {
            model_number: "EBLQ05+07CAV3".to_string(),
            indoor_software: "16.3".to_string(),
            outdoor_software: "3.6".to_string(),
        })
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
