use crate::controller::{DeviceController, Unit};
use crate::entities::EntityContext;

/// Reports whether a sub-unit is in a malfunctioning state.
///
/// Any raised condition flag counts, except the weather-dependent flag which
/// only describes the active control strategy.
pub struct ProblemSensor<C> {
    ctx: EntityContext<C>,
    unit: Unit,
    unique_id: String,
}

impl<C: DeviceController> ProblemSensor<C> {
    pub fn new(ctx: EntityContext<C>, unit: Unit) -> Self {
        let unique_id = ctx.unique_id(unit, "problem_sensor");
        Self { ctx, unit, unique_id }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn is_on(&self) -> Option<bool> {
        let snapshot = self.ctx.cache.status();
        Some(snapshot.unit(self.unit)?.is_problem())
    }

    /// The raw condition flags, for diagnostics displays.
    pub fn states(&self) -> Vec<(String, bool)> {
        let snapshot = self.ctx.cache.status();
        let Some(status) = snapshot.unit(self.unit) else {
            return Vec::new();
        };
        status
            .states()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::context_for;
    use crate::testing::MockController;

    #[tokio::test]
    async fn weather_dependent_state_is_not_a_problem() {
        let controller = MockController::new();
        controller.push_status(serde_json::json!({
            "function/SpaceHeating": {
                "states": { "WeatherDependentState": true },
            },
        }));
        let ctx = context_for(controller).await;
        let sensor = ProblemSensor::new(ctx, Unit::ClimateControl);
        assert_eq!(sensor.is_on(), Some(false));
    }

    #[tokio::test]
    async fn any_other_raised_flag_is_a_problem() {
        let controller = MockController::new();
        controller.push_status(serde_json::json!({
            "function/DomesticHotWaterTank": {
                "states": { "WeatherDependentState": false, "WarningState": 1 },
            },
        }));
        let ctx = context_for(controller).await;
        let sensor = ProblemSensor::new(ctx, Unit::HotWaterTank);
        assert_eq!(sensor.is_on(), Some(true));
    }
}
