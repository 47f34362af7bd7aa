use crate::controller::{DeviceController, Error, OperationDescriptor, Unit};
use crate::entities::EntityContext;

/// Operation backing the boost state. Not every tank sub-model has it.
pub const POWERFUL_OPERATION: &str = "powerful";

/// Operation holding the configured tank setpoint on sub-models where the
/// plain target temperature is read-only.
pub const HEATING_TEMPERATURE_OPERATION: &str = "DomesticHotWaterTemperatureHeating";

pub const TARGET_TEMPERATURE_OPERATION: &str = "TargetTemperature";

/// The reportable states of the hot water tank.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum TankState {
    Off,
    On,
    Boosted,
}

/// The domestic hot water tank, as a water heater with an optional boost.
///
/// Boost is a separate `powerful` operation layered on top of the power
/// state, so state transitions are sequenced: entering a non-boosted state
/// always clears the boost flag, and boosting always powers the tank on
/// first.
pub struct WaterHeater<C> {
    ctx: EntityContext<C>,
    unique_id: String,
}

impl<C: DeviceController> WaterHeater<C> {
    pub fn new(ctx: EntityContext<C>) -> Self {
        let unique_id = ctx.unique_id(Unit::HotWaterTank, "water-heater");
        Self { ctx, unique_id }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn supports_boost(&self) -> bool {
        self.ctx
            .cache
            .profile(Unit::HotWaterTank)
            .is_some_and(|profile| profile.contains(POWERFUL_OPERATION))
    }

    pub fn states(&self) -> Vec<&'static str> {
        let mut states = vec![TankState::Off.into(), TankState::On.into()];
        if self.supports_boost() {
            states.push(TankState::Boosted.into());
        }
        states
    }

    /// The state implied by the last snapshot. A tank without the boost
    /// operation simply reports on or off.
    pub fn current_operation(&self) -> Option<TankState> {
        let snapshot = self.ctx.cache.status();
        let status = snapshot.unit(Unit::HotWaterTank)?;
        if !status.operation_truthy("Power")? {
            return Some(TankState::Off);
        }
        match status.operation_truthy(POWERFUL_OPERATION) {
            Some(true) => Some(TankState::Boosted),
            _ => Some(TankState::On),
        }
    }

    pub fn target_temperature(&self) -> Option<f64> {
        let snapshot = self.ctx.cache.status();
        snapshot
            .unit(Unit::HotWaterTank)?
            .operation_f64(TARGET_TEMPERATURE_OPERATION)
    }

    pub fn current_temperature(&self) -> Option<f64> {
        let snapshot = self.ctx.cache.status();
        let value = snapshot.unit(Unit::HotWaterTank)?.sensor("TankTemperature")?;
        Some((value * 100.0).round() / 100.0)
    }

    /// The operation a setpoint change writes to, with its bounds.
    ///
    /// Sub-models with a weather-dependent tank expose the real setpoint as
    /// the heating temperature while the plain target is read-only.
    pub fn temperature_config(&self) -> (&'static str, OperationDescriptor) {
        let Some(profile) = self.ctx.cache.profile(Unit::HotWaterTank) else {
            return (TARGET_TEMPERATURE_OPERATION, OperationDescriptor::default());
        };
        if profile.is_settable(HEATING_TEMPERATURE_OPERATION) {
            let descriptor = profile
                .operation(HEATING_TEMPERATURE_OPERATION)
                .cloned()
                .unwrap_or_default();
            return (HEATING_TEMPERATURE_OPERATION, descriptor);
        }
        let descriptor = profile
            .operation(TARGET_TEMPERATURE_OPERATION)
            .cloned()
            .unwrap_or_default();
        (TARGET_TEMPERATURE_OPERATION, descriptor)
    }

    pub async fn set_temperature(&self, value: f64) -> Result<(), Error> {
        let (operation, descriptor) = self.temperature_config();
        let value = match descriptor.step {
            Some(step) if step.fract() == 0.0 => serde_json::json!(value.round() as i64),
            _ => serde_json::json!(value),
        };
        let controller = self.ctx.cache.controller();
        controller
            .call_operation(Unit::HotWaterTank, operation, &value)
            .await?;
        self.finish().await;
        Ok(())
    }

    pub async fn set_operation(&self, state: TankState) -> Result<(), Error> {
        let controller = self.ctx.cache.controller();
        match state {
            TankState::Off => {
                if self.supports_boost() {
                    self.set_boost(false).await?;
                }
                controller.set_power(Unit::HotWaterTank, false).await?;
            }
            TankState::On => {
                controller.set_power(Unit::HotWaterTank, true).await?;
                if self.supports_boost() {
                    self.set_boost(false).await?;
                }
            }
            TankState::Boosted => {
                if !self.supports_boost() {
                    return Err(Error::UnknownOperation(POWERFUL_OPERATION.to_string()));
                }
                controller.set_power(Unit::HotWaterTank, true).await?;
                self.set_boost(true).await?;
            }
        }
        self.finish().await;
        Ok(())
    }

    async fn set_boost(&self, on: bool) -> Result<(), Error> {
        let controller = self.ctx.cache.controller();
        let value = serde_json::json!(if on { 1 } else { 0 });
        controller
            .call_operation(Unit::HotWaterTank, POWERFUL_OPERATION, &value)
            .await
    }

    async fn finish(&self) {
        self.ctx.cache.close_link().await;
        self.ctx.refresh.request();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::UnitProfile;
    use crate::entities::tests::context_for;
    use crate::testing::{status_with_both_units, MockController};

    fn boost_profile() -> UnitProfile {
        UnitProfile::from_json(&serde_json::json!({
            "powerful": { "settable": true },
            "TargetTemperature": {
                "heating": { "settable": true, "minValue": 30.0, "maxValue": 60.0, "stepValue": 1.0 }
            },
        }))
    }

    #[tokio::test]
    async fn state_follows_power_and_boost_flags() {
        let controller = MockController::new();
        controller.set_profile(Unit::HotWaterTank, boost_profile());
        controller.push_status(status_with_both_units());
        let ctx = context_for(controller).await;
        let heater = WaterHeater::new(ctx);
        assert_eq!(heater.current_operation(), Some(TankState::On));
        assert_eq!(heater.states(), vec!["off", "on", "boosted"]);
    }

    #[tokio::test]
    async fn boosted_when_powerful_is_raised() {
        let mut status = status_with_both_units();
        status["function/DomesticHotWaterTank"]["operations"]["powerful"] = 1.into();
        let controller = MockController::new();
        controller.set_profile(Unit::HotWaterTank, boost_profile());
        controller.push_status(status);
        let ctx = context_for(controller).await;
        let heater = WaterHeater::new(ctx);
        assert_eq!(heater.current_operation(), Some(TankState::Boosted));
    }

    #[tokio::test]
    async fn tank_without_boost_reports_plain_on() {
        let mut status = status_with_both_units();
        status["function/DomesticHotWaterTank"]["operations"]
            .as_object_mut()
            .unwrap()
            .remove("powerful");
        let controller = MockController::new();
        controller.set_profile(
            Unit::HotWaterTank,
            UnitProfile::from_json(&serde_json::json!({
                "Power": { "settable": true },
                "TargetTemperature": {
                    "heating": { "settable": true, "minValue": 30.0, "maxValue": 60.0 }
                },
            })),
        );
        controller.push_status(status);
        let ctx = context_for(controller).await;
        let heater = WaterHeater::new(ctx);
        assert!(!heater.supports_boost());
        assert_eq!(heater.current_operation(), Some(TankState::On));
        assert_eq!(heater.states(), vec!["off", "on"]);
    }

    #[tokio::test]
    async fn turning_off_clears_boost_first() {
        let controller = MockController::new();
        controller.set_profile(Unit::HotWaterTank, boost_profile());
        controller.push_status(status_with_both_units());
        let ctx = context_for(controller).await;
        let heater = WaterHeater::new(ctx.clone());
        heater.set_operation(TankState::Off).await.unwrap();
        assert_eq!(
            ctx.cache.controller().commands(),
            vec![
                "DomesticHotWaterTank:powerful=0".to_string(),
                "DomesticHotWaterTank:power=false".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn boosting_powers_on_first() {
        let controller = MockController::new();
        controller.set_profile(Unit::HotWaterTank, boost_profile());
        controller.push_status(status_with_both_units());
        let ctx = context_for(controller).await;
        let heater = WaterHeater::new(ctx.clone());
        heater.set_operation(TankState::Boosted).await.unwrap();
        assert_eq!(
            ctx.cache.controller().commands(),
            vec![
                "DomesticHotWaterTank:power=true".to_string(),
                "DomesticHotWaterTank:powerful=1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn boost_request_fails_without_profile_support() {
        let controller = MockController::new();
        controller.set_profile(
            Unit::HotWaterTank,
            UnitProfile::from_json(&serde_json::json!({
                "Power": { "settable": true },
            })),
        );
        controller.push_status(status_with_both_units());
        let ctx = context_for(controller).await;
        let heater = WaterHeater::new(ctx.clone());
        let err = heater.set_operation(TankState::Boosted).await.unwrap_err();
        assert!(matches!(err, Error::UnknownOperation(_)));
        assert!(ctx.cache.controller().commands().is_empty());
    }

    #[tokio::test]
    async fn setpoint_prefers_the_settable_heating_temperature() {
        let controller = MockController::new();
        controller.set_profile(
            Unit::HotWaterTank,
            UnitProfile::from_json(&serde_json::json!({
                "DomesticHotWaterTemperatureHeating": {
                    "settable": true, "minValue": 30.0, "maxValue": 60.0, "stepValue": 1.0
                },
                "TargetTemperature": {
                    "heating": { "settable": false, "minValue": 30.0, "maxValue": 60.0 }
                },
            })),
        );
        controller.push_status(status_with_both_units());
        let ctx = context_for(controller).await;
        let heater = WaterHeater::new(ctx.clone());
        let (operation, descriptor) = heater.temperature_config();
        assert_eq!(operation, "DomesticHotWaterTemperatureHeating");
        assert_eq!(descriptor.max, Some(60.0));
        heater.set_temperature(50.0).await.unwrap();
        assert_eq!(
            ctx.cache.controller().commands(),
            vec!["DomesticHotWaterTank:DomesticHotWaterTemperatureHeating=50".to_string()]
        );
    }

    #[tokio::test]
    async fn setpoint_falls_back_to_the_target_temperature() {
        let controller = MockController::new();
        controller.set_profile(Unit::HotWaterTank, boost_profile());
        controller.push_status(status_with_both_units());
        let ctx = context_for(controller).await;
        let heater = WaterHeater::new(ctx.clone());
        let (operation, _) = heater.temperature_config();
        assert_eq!(operation, "TargetTemperature");
        assert_eq!(heater.target_temperature(), Some(48.0));
        heater.set_temperature(52.0).await.unwrap();
        assert_eq!(
            ctx.cache.controller().commands(),
            vec!["DomesticHotWaterTank:TargetTemperature=52".to_string()]
        );
    }
}
