use crate::controller::{DeviceController, Error, OperationDescriptor, Unit};
use crate::entities::EntityContext;

/// Leaving water temperature control for the climate circuit.
///
/// Depending on the device configuration either the fixed setpoint
/// (`LeavingWaterTemperature<Mode>`) or the weather-compensated offset
/// (`LeavingWaterTemperatureOffset<Mode>`) is settable; the profile decides.
/// Reads and writes always target the same property. Range enforcement is
/// left to the consuming UI; the bounds are only surfaced.
pub struct LeavingWaterSetpoint<C> {
    ctx: EntityContext<C>,
    unique_id: String,
}

impl<C: DeviceController> LeavingWaterSetpoint<C> {
    pub fn new(ctx: EntityContext<C>) -> Self {
        let unique_id = ctx.unique_id(Unit::ClimateControl, "temp-control");
        Self { ctx, unique_id }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// The operation currently backing this control and its bounds.
    pub fn resolve(&self) -> Option<(String, OperationDescriptor)> {
        let snapshot = self.ctx.cache.status();
        let mode = snapshot
            .unit(Unit::ClimateControl)?
            .operation_str("OperationMode")?
            .to_string();
        let mode = capitalize(&mode);
        let profile = self.ctx.cache.profile(Unit::ClimateControl)?;
        let fixed = format!("LeavingWaterTemperature{mode}");
        let offset = format!("LeavingWaterTemperatureOffset{mode}");
        if profile.is_settable(&fixed) {
            let descriptor = profile.operation(&fixed)?.clone();
            return Some((fixed, descriptor));
        }
        let descriptor = profile.operation(&offset).cloned().unwrap_or_default();
        Some((offset, descriptor))
    }

    pub fn value(&self) -> Option<f64> {
        let (operation, _) = self.resolve()?;
        let snapshot = self.ctx.cache.status();
        snapshot.unit(Unit::ClimateControl)?.operation_f64(&operation)
    }

    pub fn min(&self) -> Option<f64> {
        self.resolve()?.1.min
    }

    pub fn max(&self) -> Option<f64> {
        self.resolve()?.1.max
    }

    pub fn step(&self) -> Option<f64> {
        self.resolve()?.1.step
    }

    pub async fn set(&self, value: f64) -> Result<(), Error> {
        let Some((operation, descriptor)) = self.resolve() else {
            return Err(Error::UnknownOperation(
                "LeavingWaterTemperature".to_string(),
            ));
        };
        // The device wants whole numbers for integral steps.
        let value = match descriptor.step {
            Some(step) if step.fract() == 0.0 => serde_json::json!(value.round() as i64),
            _ => serde_json::json!(value),
        };
        let controller = self.ctx.cache.controller();
        controller
            .call_operation(Unit::ClimateControl, &operation, &value)
            .await?;
        self.ctx.cache.close_link().await;
        self.ctx.refresh.request();
        Ok(())
    }
}

fn capitalize(mode: &str) -> String {
    let mut chars = mode.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}
