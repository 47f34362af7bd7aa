use crate::controller::{DeviceController, Error, Unit};
use crate::entities::EntityContext;

/// On/off control for the climate control unit.
///
/// The reported state mirrors the cache's climate power flag; after a command
/// the adapter only requests a refresh, so the visible state flips once the
/// next snapshot confirms it rather than optimistically.
pub struct ClimateControlSwitch<C> {
    ctx: EntityContext<C>,
    unique_id: String,
}

impl<C: DeviceController> ClimateControlSwitch<C> {
    pub fn new(ctx: EntityContext<C>) -> Self {
        let unique_id = ctx.unique_id(Unit::ClimateControl, "power-switch");
        Self { ctx, unique_id }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn is_on(&self) -> bool {
        self.ctx.cache.is_climate_control_on()
    }

    pub async fn turn_on(&self) -> Result<(), Error> {
        self.set(true).await
    }

    pub async fn turn_off(&self) -> Result<(), Error> {
        self.set(false).await
    }

    async fn set(&self, on: bool) -> Result<(), Error> {
        let controller = self.ctx.cache.controller();
        controller.set_power(Unit::ClimateControl, on).await?;
        self.ctx.cache.close_link().await;
        self.ctx.refresh.request();
        Ok(())
    }
}

/// A switch over an arbitrary boolean-ish named operation.
///
/// The reported state compares the operation value against the configured
/// "on" token; commands write one of the two tokens. Only constructed when
/// the unit profile lists the operation.
pub struct OperationSwitch<C> {
    ctx: EntityContext<C>,
    unit: Unit,
    operation: String,
    on_token: serde_json::Value,
    off_token: serde_json::Value,
    unique_id: String,
}

impl<C: DeviceController> OperationSwitch<C> {
    pub fn new(
        ctx: EntityContext<C>,
        unit: Unit,
        operation: &str,
        on_token: serde_json::Value,
        off_token: serde_json::Value,
    ) -> Self {
        let unique_id = ctx.unique_id(unit, operation);
        Self {
            ctx,
            unit,
            operation: operation.to_string(),
            on_token,
            off_token,
            unique_id,
        }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn is_on(&self) -> Option<bool> {
        let snapshot = self.ctx.cache.status();
        let value = snapshot.unit(self.unit)?.operation(&self.operation)?.clone();
        Some(value == self.on_token)
    }

    pub async fn turn_on(&self) -> Result<(), Error> {
        self.set(&self.on_token).await
    }

    pub async fn turn_off(&self) -> Result<(), Error> {
        self.set(&self.off_token).await
    }

    async fn set(&self, token: &serde_json::Value) -> Result<(), Error> {
        let controller = self.ctx.cache.controller();
        controller
            .call_operation(self.unit, &self.operation, token)
            .await?;
        self.ctx.cache.close_link().await;
        self.ctx.refresh.request();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::context_for;
    use crate::testing::{status_with_both_units, MockController};

    #[tokio::test]
    async fn climate_switch_commands_go_through_the_controller() {
        let controller = MockController::new();
        controller.push_status(status_with_both_units());
        let ctx = context_for(controller).await;
        let switch = ClimateControlSwitch::new(ctx.clone());
        assert!(switch.is_on());
        switch.turn_off().await.unwrap();
        assert_eq!(
            ctx.cache.controller().commands(),
            vec!["SpaceHeating:power=false".to_string()]
        );
    }

    #[tokio::test]
    async fn operation_switch_compares_against_the_on_token() {
        let mut status = status_with_both_units();
        status["function/SpaceHeating"]["operations"]["EcoMode"] = "off".into();
        let controller = MockController::new();
        controller.push_status(status);
        let ctx = context_for(controller).await;
        let switch = OperationSwitch::new(
            ctx.clone(),
            Unit::ClimateControl,
            "EcoMode",
            serde_json::json!("on"),
            serde_json::json!("off"),
        );
        assert_eq!(switch.is_on(), Some(false));
        switch.turn_on().await.unwrap();
        assert_eq!(
            ctx.cache.controller().commands(),
            vec![r#"SpaceHeating:EcoMode="on""#.to_string()]
        );
    }
}
