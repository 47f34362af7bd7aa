//! A [`DeviceController`] backed by a capture file instead of an appliance.
//!
//! Useful for inspecting entity projection offline and for exercising the
//! full stack in tests. Writes mutate the in-memory status so subsequent
//! refreshes observe them, the way a real appliance eventually would.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::controller::{
    DeviceController, DeviceIdentity, Error, Unit, UnitIdentity, UnitProfile,
};
use crate::snapshot::Snapshot;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("could not read the capture file")]
    Read(#[source] std::io::Error),
    #[error("could not parse the capture file")]
    Parse(#[source] serde_json::Error),
    #[error("capture file references unknown unit `{0}`")]
    UnknownUnit(String),
}

#[derive(serde::Deserialize)]
struct CaptureFile {
    identity: DeviceIdentity,
    #[serde(default)]
    units: BTreeMap<String, CaptureUnit>,
    status: serde_json::Value,
}

#[derive(serde::Deserialize)]
struct CaptureUnit {
    #[serde(default)]
    profile: serde_json::Value,
    identity: Option<UnitIdentity>,
}

struct UnitEntry {
    profile: UnitProfile,
    identity: Option<UnitIdentity>,
}

pub struct ReplayController {
    identity: DeviceIdentity,
    units: BTreeMap<Unit, UnitEntry>,
    status: Mutex<serde_json::Value>,
}

impl ReplayController {
    pub async fn load(path: &Path) -> Result<Self, LoadError> {
        let contents = tokio::fs::read(path).await.map_err(LoadError::Read)?;
        let capture: CaptureFile =
            serde_json::from_slice(&contents).map_err(LoadError::Parse)?;
        let mut units = BTreeMap::new();
        for (name, unit) in capture.units {
            let key = unit_for_reference(&name).ok_or(LoadError::UnknownUnit(name))?;
            units.insert(
                key,
                UnitEntry {
                    profile: UnitProfile::from_json(&unit.profile),
                    identity: unit.identity,
                },
            );
        }
        Ok(Self {
            identity: capture.identity,
            units,
            status: Mutex::new(capture.status),
        })
    }

    fn unit_operations(
        status: &mut serde_json::Value,
        unit: Unit,
    ) -> Option<&mut serde_json::Map<String, serde_json::Value>> {
        let path = unit
            .function_paths()
            .iter()
            .find(|path| status.get(**path).is_some())?;
        status
            .get_mut(*path)?
            .as_object_mut()?
            .entry("operations")
            .or_insert_with(|| serde_json::json!({}))
            .as_object_mut()
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, serde_json::Value> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn unit_for_reference(name: &str) -> Option<Unit> {
    Unit::ALL
        .into_iter()
        .find(|unit| unit.reference() == name || unit.function_paths().iter().any(|p| p.ends_with(name)))
}

impl DeviceController for ReplayController {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn has_unit(&self, unit: Unit) -> bool {
        self.units.contains_key(&unit)
    }

    async fn fetch_status(&self) -> Result<Snapshot, Error> {
        Ok(Snapshot::new(self.lock_status().clone()))
    }

    async fn profile(&self, unit: Unit) -> Result<UnitProfile, Error> {
        self.units
            .get(&unit)
            .map(|entry| entry.profile.clone())
            .ok_or(Error::NoSuchUnit(unit))
    }

    async fn reload_profiles(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn is_turned_on(&self, unit: Unit) -> Result<bool, Error> {
        let mut status = self.lock_status();
        let operations =
            Self::unit_operations(&mut status, unit).ok_or(Error::NoSuchUnit(unit))?;
        Ok(operations
            .get("Power")
            .and_then(|v| v.as_str())
            .is_some_and(|v| v == "on"))
    }

    async fn set_power(&self, unit: Unit, on: bool) -> Result<(), Error> {
        let mut status = self.lock_status();
        let operations =
            Self::unit_operations(&mut status, unit).ok_or(Error::NoSuchUnit(unit))?;
        operations.insert(
            "Power".to_string(),
            serde_json::json!(if on { "on" } else { "standby" }),
        );
        Ok(())
    }

    async fn call_operation(
        &self,
        unit: Unit,
        operation: &str,
        value: &serde_json::Value,
    ) -> Result<(), Error> {
        let profile = self
            .units
            .get(&unit)
            .ok_or(Error::NoSuchUnit(unit))?;
        if !profile.profile.contains(operation) {
            return Err(Error::UnknownOperation(operation.to_string()));
        }
        let mut status = self.lock_status();
        let operations =
            Self::unit_operations(&mut status, unit).ok_or(Error::NoSuchUnit(unit))?;
        operations.insert(operation.to_string(), value.clone());
        Ok(())
    }

    async fn unit_identity(&self, unit: Unit) -> Result<UnitIdentity, Error> {
        self.units
            .get(&unit)
            .and_then(|entry| entry.identity.clone())
            .ok_or(Error::NoSuchUnit(unit))
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn capture() -> serde_json::Value {
        serde_json::json!({
            "identity": {
                "serial_number": "0000000001234567",
                "manufacturer": "Daikin",
                "model_name": "Altherma",
                "firmware": "436CC161000",
                "duty": "LT 8kW",
            },
            "units": {
                "SpaceHeating": {
                    "profile": {
                        "Power": { "settable": true },
                        "OperationMode": { "settable": true },
                    },
                    "identity": {
                        "model_number": "EBLQ05+07CAV3",
                        "indoor_software": "16.3",
                        "outdoor_software": "3.6",
                    },
                },
            },
            "status": {
                "function/SpaceHeating": {
                    "operations": { "Power": "on", "OperationMode": "heating" },
                    "sensors": { "OutdoorTemperature": 7.0 },
                    "states": {},
                },
            },
        })
    }

    async fn load(capture: &serde_json::Value) -> ReplayController {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(capture.to_string().as_bytes()).unwrap();
        ReplayController::load(file.path()).await.unwrap()
    }

    #[tokio::test]
    async fn serves_the_captured_status() {
        let controller = load(&capture()).await;
        assert!(controller.has_unit(Unit::ClimateControl));
        assert!(!controller.has_unit(Unit::HotWaterTank));
        let snapshot = controller.fetch_status().await.unwrap();
        let unit = snapshot.unit(Unit::ClimateControl).unwrap();
        assert_eq!(unit.sensor("OutdoorTemperature"), Some(7.0));
        assert!(controller.is_turned_on(Unit::ClimateControl).await.unwrap());
    }

    #[tokio::test]
    async fn writes_are_visible_on_the_next_fetch() {
        let controller = load(&capture()).await;
        controller
            .call_operation(
                Unit::ClimateControl,
                "OperationMode",
                &serde_json::json!("cooling"),
            )
            .await
            .unwrap();
        controller.set_power(Unit::ClimateControl, false).await.unwrap();
        let snapshot = controller.fetch_status().await.unwrap();
        let unit = snapshot.unit(Unit::ClimateControl).unwrap();
        assert_eq!(unit.operation_str("OperationMode"), Some("cooling"));
        assert!(!controller.is_turned_on(Unit::ClimateControl).await.unwrap());
    }

    #[tokio::test]
    async fn operations_outside_the_profile_are_rejected() {
        let controller = load(&capture()).await;
        let err = controller
            .call_operation(Unit::ClimateControl, "EcoMode", &serde_json::json!("on"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownOperation(_)));
    }
}
