use crate::controller::{DeviceController, Unit};
use crate::entities::EntityContext;

/// One read-only temperature measurement of a sub-unit.
pub struct TemperatureSensor<C> {
    ctx: EntityContext<C>,
    unit: Unit,
    sensor: String,
    unique_id: String,
}

impl<C: DeviceController> TemperatureSensor<C> {
    pub fn new(ctx: EntityContext<C>, unit: Unit, sensor: &str) -> Self {
        let unique_id = ctx.unique_id(unit, sensor);
        Self { ctx, unit, sensor: sensor.to_string(), unique_id }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn sensor_name(&self) -> &str {
        &self.sensor
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// The last reported reading, rounded to two decimals.
    pub fn value(&self) -> Option<f64> {
        let snapshot = self.ctx.cache.status();
        let value = snapshot.unit(self.unit)?.sensor(&self.sensor)?;
        Some((value * 100.0).round() / 100.0)
    }
}
