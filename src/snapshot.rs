use std::sync::Arc;

use crate::controller::Unit;

/// State flag that is informational rather than a malfunction and therefore
/// excluded from the problem computation.
const WEATHER_DEPENDENT_STATE: &str = "WeatherDependentState";

/// Installer configuration mode flag. Leaving this mode can change which
/// operations are settable, so the cache watches for its falling edge.
const INSTALLER_STATE: &str = "InstallerState";

/// A full point-in-time status mapping fetched from the appliance.
///
/// The mapping shape is defined entirely by the device profile and varies
/// across sub-models, so it is kept as raw JSON behind typed optional
/// accessors instead of a fixed struct. Snapshots are immutable and cheap to
/// clone; every refresh replaces the whole thing.
#[derive(Debug, Clone)]
pub struct Snapshot(Arc<serde_json::Value>);

impl Snapshot {
    pub fn new(value: serde_json::Value) -> Self {
        Self(Arc::new(value))
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// The status of one unit, if the snapshot contains it.
    pub fn unit(&self, unit: Unit) -> Option<UnitStatus<'_>> {
        let status = unit
            .function_paths()
            .iter()
            .find_map(|path| self.0.get(*path))?;
        status.is_object().then_some(UnitStatus(status))
    }

    pub fn has_unit(&self, unit: Unit) -> bool {
        self.unit(unit).is_some()
    }

    /// Whether the device currently reports installer configuration mode on
    /// any unit. An absent flag reads as `false`.
    pub fn installer_state(&self) -> bool {
        Unit::ALL
            .iter()
            .filter_map(|unit| self.unit(*unit))
            .any(|status| status.state(INSTALLER_STATE).unwrap_or(false))
    }
}

impl serde::Serialize for Snapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Read-only view of one unit inside a [`Snapshot`].
///
/// Every accessor returns an `Option` instead of failing, because the
/// mapping shape differs between appliance sub-models.
#[derive(Debug, Clone, Copy)]
pub struct UnitStatus<'a>(&'a serde_json::Value);

impl<'a> UnitStatus<'a> {
    fn section(&self, name: &str) -> Option<&'a serde_json::Map<String, serde_json::Value>> {
        self.0.get(name)?.as_object()
    }

    pub fn operation(&self, name: &str) -> Option<&'a serde_json::Value> {
        self.section("operations")?.get(name)
    }

    pub fn operation_str(&self, name: &str) -> Option<&'a str> {
        self.operation(name)?.as_str()
    }

    pub fn operation_f64(&self, name: &str) -> Option<f64> {
        self.operation(name)?.as_f64()
    }

    /// Truthiness of an operation value. The device is not consistent about
    /// types here: booleans, 0/1 integers and `"on"`/`"off"` strings all
    /// occur in the wild.
    pub fn operation_truthy(&self, name: &str) -> Option<bool> {
        self.operation(name).map(boolish)
    }

    pub fn sensor(&self, name: &str) -> Option<f64> {
        self.section("sensors")?.get(name)?.as_f64()
    }

    pub fn sensor_names(&self) -> impl Iterator<Item = &'a str> {
        self.section("sensors")
            .into_iter()
            .flat_map(|sensors| sensors.keys().map(String::as_str))
    }

    pub fn state(&self, name: &str) -> Option<bool> {
        Some(boolish(self.section("states")?.get(name)?))
    }

    pub fn states(&self) -> impl Iterator<Item = (&'a str, bool)> {
        self.section("states")
            .into_iter()
            .flat_map(|states| states.iter().map(|(name, v)| (name.as_str(), boolish(v))))
    }

    /// Whether any condition flag indicates a malfunction. The
    /// weather-dependent flag merely reports a control strategy and does not
    /// count.
    pub fn is_problem(&self) -> bool {
        self.states()
            .any(|(name, value)| value && name != WEATHER_DEPENDENT_STATE)
    }
}

fn boolish(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::String(s) => matches!(s.as_str(), "on" | "1" | "true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(json: serde_json::Value) -> Snapshot {
        Snapshot::new(json)
    }

    #[test]
    fn missing_unit_reads_as_absent() {
        let s = snapshot(serde_json::json!({
            "function/SpaceHeating": { "operations": {}, "sensors": {}, "states": {} },
        }));
        assert!(s.has_unit(Unit::ClimateControl));
        assert!(!s.has_unit(Unit::HotWaterTank));
        assert!(s.unit(Unit::HotWaterTank).is_none());
    }

    #[test]
    fn hot_water_tank_naming_variants_resolve() {
        let tank = serde_json::json!({ "operations": { "Power": "on" } });
        let long = snapshot(serde_json::json!({ "function/DomesticHotWaterTank": tank }));
        let short = snapshot(serde_json::json!({ "function/DomesticHotWater": tank }));
        for s in [long, short] {
            let unit = s.unit(Unit::HotWaterTank).unwrap();
            assert_eq!(unit.operation_str("Power"), Some("on"));
        }
    }

    #[test]
    fn problem_ignores_weather_dependent_state() {
        let s = snapshot(serde_json::json!({
            "function/SpaceHeating": {
                "states": { "WeatherDependentState": true, "EmergencyState": false },
            },
        }));
        assert!(!s.unit(Unit::ClimateControl).unwrap().is_problem());

        let s = snapshot(serde_json::json!({
            "function/SpaceHeating": {
                "states": { "WeatherDependentState": false, "ErrorState": 1 },
            },
        }));
        assert!(s.unit(Unit::ClimateControl).unwrap().is_problem());
    }

    #[test]
    fn installer_state_defaults_to_false() {
        let s = snapshot(serde_json::json!({
            "function/SpaceHeating": { "states": {} },
        }));
        assert!(!s.installer_state());

        let s = snapshot(serde_json::json!({
            "function/SpaceHeating": { "states": { "InstallerState": true } },
        }));
        assert!(s.installer_state());
    }

    #[test]
    fn accessors_tolerate_malformed_sections() {
        let s = snapshot(serde_json::json!({
            "function/SpaceHeating": { "operations": 42, "sensors": null },
        }));
        let unit = s.unit(Unit::ClimateControl).unwrap();
        assert!(unit.operation("OperationMode").is_none());
        assert!(unit.sensor("OutdoorTemperature").is_none());
        assert_eq!(unit.sensor_names().count(), 0);
        assert!(!unit.is_problem());
    }
}
