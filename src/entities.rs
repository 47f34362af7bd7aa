pub mod binary_sensor;
pub mod number;
pub mod select;
pub mod sensor;
pub mod switch;
pub mod water_heater;

use std::sync::Arc;

use crate::controller::{DeviceController, Unit};
use crate::device_cache::StatusCache;
use crate::poll::RefreshHandle;

/// Operation backing the optional Eco switch.
pub const ECO_MODE_OPERATION: &str = "EcoMode";

/// Shared handle every entity adapter reads and writes through.
///
/// Adapters never own the controller; they borrow it through the cache and
/// request a refresh after every dispatched command so the next confirmed
/// snapshot drives the visible state.
pub struct EntityContext<C> {
    pub cache: Arc<StatusCache<C>>,
    pub refresh: RefreshHandle,
}

impl<C> Clone for EntityContext<C> {
    fn clone(&self) -> Self {
        Self { cache: Arc::clone(&self.cache), refresh: self.refresh.clone() }
    }
}

impl<C: DeviceController> EntityContext<C> {
    /// Stable unique key for one exposed entity. Must not change across
    /// restarts, or the consuming registry duplicates entries.
    pub fn unique_id(&self, unit: Unit, name: &str) -> String {
        format!(
            "{}-{}-{}",
            self.cache.identity().serial_number,
            unit.reference(),
            name
        )
    }
}

/// Every entity the current snapshot and profiles support.
pub struct Entities<C> {
    pub sensors: Vec<sensor::TemperatureSensor<C>>,
    pub problem_sensors: Vec<binary_sensor::ProblemSensor<C>>,
    pub climate_switch: Option<switch::ClimateControlSwitch<C>>,
    pub operation_switches: Vec<switch::OperationSwitch<C>>,
    pub mode_select: Option<select::OperationModeSelect<C>>,
    pub setpoint: Option<number::LeavingWaterSetpoint<C>>,
    pub water_heater: Option<water_heater::WaterHeater<C>>,
}

impl<C> Default for Entities<C> {
    fn default() -> Self {
        Self {
            sensors: Vec::new(),
            problem_sensors: Vec::new(),
            climate_switch: None,
            operation_switches: Vec::new(),
            mode_select: None,
            setpoint: None,
            water_heater: None,
        }
    }
}

/// Projects the cached snapshot and profiles into entity adapters.
///
/// A sub-unit missing from the snapshot suppresses all of its dependent
/// entities; an operation missing from a profile suppresses the entity built
/// on top of it. Neither is an error: sub-models simply differ.
pub fn build<C: DeviceController>(ctx: &EntityContext<C>) -> Entities<C> {
    let snapshot = ctx.cache.status();
    let mut entities = Entities::default();

    for unit in Unit::ALL {
        if !ctx.cache.has_unit(unit) {
            continue;
        }
        let Some(status) = snapshot.unit(unit) else {
            continue;
        };
        for name in status.sensor_names() {
            entities
                .sensors
                .push(sensor::TemperatureSensor::new(ctx.clone(), unit, name));
        }
        entities
            .problem_sensors
            .push(binary_sensor::ProblemSensor::new(ctx.clone(), unit));
    }

    if ctx.cache.has_unit(Unit::ClimateControl) {
        let profile = ctx.cache.profile(Unit::ClimateControl).unwrap_or_default();
        entities.climate_switch = Some(switch::ClimateControlSwitch::new(ctx.clone()));
        if snapshot
            .unit(Unit::ClimateControl)
            .is_some_and(|status| status.operation("OperationMode").is_some())
        {
            entities.mode_select = Some(select::OperationModeSelect::new(ctx.clone()));
            entities.setpoint = Some(number::LeavingWaterSetpoint::new(ctx.clone()));
        }
        if profile.contains(ECO_MODE_OPERATION) {
            entities.operation_switches.push(switch::OperationSwitch::new(
                ctx.clone(),
                Unit::ClimateControl,
                ECO_MODE_OPERATION,
                serde_json::json!("on"),
                serde_json::json!("off"),
            ));
        }
    }

    if ctx.cache.has_unit(Unit::HotWaterTank) {
        entities.water_heater = Some(water_heater::WaterHeater::new(ctx.clone()));
    }

    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_cache::CacheConfig;
    use crate::poll::Poller;
    use crate::testing::{climate_profile, status_with_both_units, MockController};
    use std::time::Duration;

    pub(crate) async fn context_for(controller: MockController) -> EntityContext<MockController> {
        let cache = Arc::new(
            StatusCache::initialize(controller, CacheConfig::default())
                .await
                .unwrap(),
        );
        let (_poller, refresh) = Poller::new(Arc::clone(&cache), Duration::from_secs(30));
        EntityContext { cache, refresh }
    }

    #[tokio::test]
    async fn absent_tank_suppresses_its_entities() {
        let controller = MockController::without_tank();
        controller.push_status(serde_json::json!({
            "function/SpaceHeating": {
                "operations": { "OperationMode": "heating" },
                "sensors": { "OutdoorTemperature": 7.0 },
                "states": {},
            },
        }));
        let ctx = context_for(controller).await;
        let entities = build(&ctx);
        assert!(entities.water_heater.is_none());
        assert_eq!(entities.problem_sensors.len(), 1);
        assert!(entities.sensors.iter().all(|s| s.unit() == Unit::ClimateControl));
    }

    #[tokio::test]
    async fn eco_switch_requires_profile_support() {
        let controller = MockController::new();
        controller.push_status(status_with_both_units());
        let ctx = context_for(controller).await;
        assert!(build(&ctx).operation_switches.is_empty());

        let controller = MockController::new();
        controller.push_status(status_with_both_units());
        let mut profile = climate_profile();
        profile.0.insert(ECO_MODE_OPERATION.to_string(), Default::default());
        controller.set_profile(Unit::ClimateControl, profile);
        let ctx = context_for(controller).await;
        let entities = build(&ctx);
        assert_eq!(entities.operation_switches.len(), 1);
    }

    #[tokio::test]
    async fn unique_ids_compose_serial_unit_and_name() {
        let controller = MockController::new();
        controller.push_status(status_with_both_units());
        let ctx = context_for(controller).await;
        assert_eq!(
            ctx.unique_id(Unit::ClimateControl, "OutdoorTemperature"),
            "0000000001234567-SpaceHeating-OutdoorTemperature"
        );
    }
}
