use std::collections::BTreeMap;
use std::future::Future;

use crate::snapshot::Snapshot;

/// An addressable function of the appliance.
///
/// Unit discovery is performed by the controller implementation; everything in
/// this crate only ever deals with the two controllable functions below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Unit {
    ClimateControl,
    HotWaterTank,
}

impl Unit {
    pub const ALL: [Unit; 2] = [Unit::ClimateControl, Unit::HotWaterTank];

    /// The stable reference used when composing entity identifiers.
    pub fn reference(&self) -> &'static str {
        match self {
            Unit::ClimateControl => "SpaceHeating",
            Unit::HotWaterTank => "DomesticHotWaterTank",
        }
    }

    /// Function paths under which the unit may appear in a status snapshot.
    ///
    /// Sub-models disagree on the hot water tank naming, so all known
    /// spellings are listed in preference order.
    pub fn function_paths(&self) -> &'static [&'static str] {
        match self {
            Unit::ClimateControl => &["function/SpaceHeating"],
            Unit::HotWaterTank => &[
                "function/DomesticHotWaterTank",
                "function/DomesticHotWater",
            ],
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Unit::ClimateControl => "Space Heating",
            Unit::HotWaterTank => "Hot Water Tank",
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reference())
    }
}

/// Identity of the whole appliance, as reported at discovery time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceIdentity {
    pub serial_number: String,
    pub manufacturer: String,
    pub model_name: String,
    pub firmware: String,
    pub duty: String,
}

/// Per-unit display identity. Fetching this requires extra round-trips, so
/// the cache layer memoizes it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UnitIdentity {
    pub model_number: String,
    pub indoor_software: String,
    pub outdoor_software: String,
}

impl UnitIdentity {
    pub fn software(&self) -> String {
        format!("{}/{}", self.indoor_software, self.outdoor_software)
    }
}

/// Writable bounds and the settable flag for a single named operation.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OperationDescriptor {
    #[serde(default)]
    pub settable: bool,
    #[serde(default, rename = "minValue")]
    pub min: Option<f64>,
    #[serde(default, rename = "maxValue")]
    pub max: Option<f64>,
    #[serde(default, rename = "stepValue")]
    pub step: Option<f64>,
}

/// The device-reported capability profile of one unit.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UnitProfile(pub BTreeMap<String, OperationDescriptor>);

impl UnitProfile {
    /// Builds a profile from the JSON shape the appliance reports.
    ///
    /// The hot water tank `TargetTemperature` bounds are nested under a
    /// `heating` sub-configuration on some sub-models; those are flattened to
    /// the operation name itself. Entries that do not look like an operation
    /// configuration at all are skipped rather than rejected.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut operations = BTreeMap::new();
        let Some(object) = value.as_object() else {
            return Self(operations);
        };
        for (name, config) in object {
            let config = match config.get("heating") {
                Some(heating) if config.get("settable").is_none() => heating,
                _ => config,
            };
            let Ok(descriptor) = serde_json::from_value(config.clone()) else {
                continue;
            };
            operations.insert(name.clone(), descriptor);
        }
        Self(operations)
    }

    pub fn operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_settable(&self, name: &str) -> bool {
        self.operation(name).is_some_and(|op| op.settable)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not communicate with the appliance")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("request to the appliance timed out")]
    Timeout,
    #[error("could not decode the appliance response")]
    Decode(#[source] serde_json::Error),
    #[error("request was cancelled")]
    Cancelled,
    #[error("unit `{0}` is not present on this appliance")]
    NoSuchUnit(Unit),
    #[error("`{0}` is not an operation the unit profile knows about")]
    UnknownOperation(String),
    #[error("`{value}` is not a valid value for operation `{operation}`")]
    InvalidValue { operation: String, value: String },
}

impl Error {
    /// Failure classes that surface as the appliance being unavailable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout | Error::Cancelled)
    }
}

/// The vendor-protocol client this crate adapts.
///
/// Implementations own the web-socket session, unit discovery and the
/// capability model. The crate never assumes anything about the wire format
/// beyond the JSON status mapping ([`Snapshot`]) and the profile shape
/// ([`UnitProfile`]). The connection is expected to be cheap to re-establish:
/// [`DeviceController::close`] is called after every logical operation.
pub trait DeviceController: Send + Sync {
    /// Appliance identity captured during discovery.
    fn identity(&self) -> &DeviceIdentity;

    /// Whether discovery found the given function on this appliance.
    fn has_unit(&self, unit: Unit) -> bool;

    /// Fetch a complete status snapshot.
    fn fetch_status(&self) -> impl Future<Output = Result<Snapshot, Error>> + Send;

    /// The capability profile of one unit.
    fn profile(&self, unit: Unit) -> impl Future<Output = Result<UnitProfile, Error>> + Send;

    /// Ask the controller to re-derive its capability profiles from the
    /// device. Used when leaving installer mode may have invalidated the
    /// cached capability assumptions.
    fn reload_profiles(&self) -> impl Future<Output = Result<(), Error>> + Send;

    fn is_turned_on(&self, unit: Unit) -> impl Future<Output = Result<bool, Error>> + Send;

    fn set_power(&self, unit: Unit, on: bool) -> impl Future<Output = Result<(), Error>> + Send;

    /// Invoke a named operation with the given value.
    fn call_operation(
        &self,
        unit: Unit,
        operation: &str,
        value: &serde_json::Value,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Per-unit model and software strings.
    fn unit_identity(&self, unit: Unit) -> impl Future<Output = Result<UnitIdentity, Error>> + Send;

    /// Close the underlying connection until the next operation needs it.
    fn close(&self) -> impl Future<Output = Result<(), Error>> + Send;
}
