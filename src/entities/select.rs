use crate::controller::{DeviceController, Error, Unit};
use crate::entities::EntityContext;

/// The operation modes the climate control unit understands.
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
pub enum ClimateControlMode {
    Heating,
    Cooling,
    Auto,
}

/// Selects the climate control operation mode.
pub struct OperationModeSelect<C> {
    ctx: EntityContext<C>,
    unique_id: String,
}

impl<C: DeviceController> OperationModeSelect<C> {
    pub fn new(ctx: EntityContext<C>) -> Self {
        let unique_id = ctx.unique_id(Unit::ClimateControl, "power-mode");
        Self { ctx, unique_id }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn options() -> &'static [&'static str] {
        <ClimateControlMode as strum::VariantNames>::VARIANTS
    }

    /// The mode reported by the last snapshot, verbatim.
    pub fn current(&self) -> Option<String> {
        let snapshot = self.ctx.cache.status();
        let mode = snapshot
            .unit(Unit::ClimateControl)?
            .operation_str("OperationMode")?
            .to_string();
        Some(mode)
    }

    /// Dispatches a mode change. Options outside the known mode enum are
    /// rejected before anything reaches the controller.
    pub async fn select(&self, option: &str) -> Result<(), Error> {
        let mode = option
            .parse::<ClimateControlMode>()
            .map_err(|_| Error::InvalidValue {
                operation: "OperationMode".to_string(),
                value: option.to_string(),
            })?;
        let controller = self.ctx.cache.controller();
        controller
            .call_operation(
                Unit::ClimateControl,
                "OperationMode",
                &serde_json::json!(mode.to_string()),
            )
            .await?;
        self.ctx.cache.close_link().await;
        self.ctx.refresh.request();
        Ok(())
    }
}
