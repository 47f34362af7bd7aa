//! Exposes the cached appliance state as a Homie 5 device over MQTT.
//!
//! The device carries one node per appliance function. Property values are
//! republished only when they change between snapshots, and incoming `set`
//! commands are dispatched to the entity adapters, which confirm through the
//! next refresh rather than optimistically.

use std::collections::BTreeMap;
use std::future::Future;

use homie5::client::{Publish, QoS, Subscription};
use homie5::device_description::{
    DeviceDescriptionBuilder, FloatRange, HomieDeviceDescription, HomieNodeDescription,
    HomiePropertyFormat, PropertyDescriptionBuilder,
};
use futures::StreamExt as _;
use homie5::{Homie5DeviceProtocol, HomieDataType, HomieDeviceStatus, HomieID, PropertyRef};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::controller::{DeviceController, OperationDescriptor, Unit, UnitIdentity};
use crate::entities::{self, Entities, EntityContext};
use crate::entities::select::OperationModeSelect;

pub const CLIMATE_NODE: HomieID = HomieID::new_const("climate");
pub const HOT_WATER_NODE: HomieID = HomieID::new_const("hot-water");

const POWER_PROPERTY: HomieID = HomieID::new_const("power");
const MODE_PROPERTY: HomieID = HomieID::new_const("mode");
const SETPOINT_PROPERTY: HomieID = HomieID::new_const("leaving-water");
const PROBLEM_PROPERTY: HomieID = HomieID::new_const("problem");
const TANK_STATE_PROPERTY: HomieID = HomieID::new_const("state");
const TANK_TARGET_PROPERTY: HomieID = HomieID::new_const("target-temperature");

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not publish to the MQTT broker")]
    Publish(#[source] rumqttc::v5::ClientError),
    #[error("could not subscribe with the MQTT broker")]
    Subscribe(#[source] rumqttc::v5::ClientError),
    #[error("could not construct the device description")]
    Description(#[source] homie5::Homie5ProtocolError),
}

/// The operations this crate needs from an MQTT client.
///
/// A seam for tests; the real implementation is [`rumqttc::v5::AsyncClient`].
pub trait MqttClient: Send + Sync {
    fn homie_publish(&self, p: Publish) -> impl Future<Output = Result<(), Error>> + Send;
    fn homie_subscribe(
        &self,
        subs: impl Iterator<Item = Subscription> + Send,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

impl MqttClient for rumqttc::v5::AsyncClient {
    async fn homie_publish(&self, p: Publish) -> Result<(), Error> {
        self.publish(p.topic, convert_qos(p.qos), p.retain, p.payload)
            .await
            .map_err(Error::Publish)
    }

    async fn homie_subscribe(
        &self,
        subs: impl Iterator<Item = Subscription> + Send,
    ) -> Result<(), Error> {
        self.subscribe_many(
            subs.map(|sub| {
                rumqttc::v5::mqttbytes::v5::Filter::new(sub.topic, convert_qos(sub.qos))
            }),
        )
        .await
        .map_err(Error::Subscribe)
    }
}

pub fn convert_qos(homie: QoS) -> rumqttc::v5::mqttbytes::QoS {
    match homie {
        QoS::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
    }
}

pub enum Command {
    Set { property: PropertyRef, value: String },
}

impl Command {
    /// Recognizes a Homie `set` message; anything else is handed back.
    pub fn try_from_mqtt_command(
        msg: rumqttc::v5::mqttbytes::v5::Publish,
    ) -> Result<Self, rumqttc::v5::mqttbytes::v5::Publish> {
        let Ok(topic) = str::from_utf8(&msg.topic) else {
            return Err(msg);
        };
        match homie5::parse_mqtt_message(topic, &msg.payload) {
            Ok(homie5::Homie5Message::PropertySet { property, set_value }) => {
                Ok(Self::Set { property, value: set_value })
            }
            _ => Err(msg),
        }
    }
}

pub struct HomieBridge<C, M> {
    mqtt: M,
    protocol: Homie5DeviceProtocol,
    state: HomieDeviceStatus,
    description: HomieDeviceDescription,
    ctx: EntityContext<C>,
    entities: Entities<C>,
    updates: WatchStream<u64>,
    commands: mpsc::UnboundedReceiver<Command>,
    published: BTreeMap<(HomieID, HomieID), String>,
    appliance_available: bool,
}

impl<C: DeviceController, M: MqttClient> HomieBridge<C, M> {
    pub async fn new(
        mqtt: M,
        protocol: Homie5DeviceProtocol,
        ctx: EntityContext<C>,
        updates: watch::Receiver<u64>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let entities = entities::build(&ctx);
        let unit_identities = fetch_unit_identities(&ctx).await;
        let description = describe(&ctx, &entities, &unit_identities);
        Self {
            mqtt,
            protocol,
            state: HomieDeviceStatus::Init,
            description,
            ctx,
            entities,
            updates: WatchStream::from_changes(updates),
            commands,
            published: BTreeMap::new(),
            appliance_available: true,
        }
    }

    pub async fn publish_device(&mut self) -> Result<(), Error> {
        for step in homie5::homie_device_publish_steps() {
            match step {
                homie5::DevicePublishStep::DeviceStateInit => {
                    self.state = HomieDeviceStatus::Init;
                    let p = self.protocol.publish_state(self.state);
                    self.mqtt.homie_publish(p).await?;
                }
                homie5::DevicePublishStep::DeviceDescription => {
                    let p = self
                        .protocol
                        .publish_description(&self.description)
                        .map_err(Error::Description)?;
                    self.mqtt.homie_publish(p).await?;
                }
                homie5::DevicePublishStep::PropertyValues => {
                    self.sync_values().await?;
                    // rumqttc can reorder publishes such that properties land
                    // after `$state = ready` unless we yield here.
                    tokio::task::yield_now().await;
                }
                homie5::DevicePublishStep::SubscribeProperties => {
                    // An empty subscription set errors out in the client loop,
                    // so peek before subscribing.
                    let mut p = self
                        .protocol
                        .subscribe_props(&self.description)
                        .map_err(Error::Description)?
                        .peekable();
                    if p.peek().is_some() {
                        self.mqtt.homie_subscribe(p).await?;
                    }
                }
                homie5::DevicePublishStep::DeviceStateReady => {
                    self.state = HomieDeviceStatus::Ready;
                    let p = self.protocol.publish_state(self.state);
                    self.mqtt.homie_publish(p).await?;
                }
            }
        }
        Ok(())
    }

    /// Services snapshot updates and incoming commands until cancelled or
    /// until both input channels close.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), Error> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.state = HomieDeviceStatus::Disconnected;
                    let p = self.protocol.publish_state(self.state);
                    self.mqtt.homie_publish(p).await?;
                    return Ok(());
                }
                generation = self.updates.next() => {
                    if generation.is_none() {
                        return Ok(());
                    }
                    self.sync_availability().await?;
                    self.sync_values().await?;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else { return Ok(()) };
                    self.handle_command(command).await;
                }
            }
        }
    }

    /// Mirrors appliance availability onto the Homie device state.
    async fn sync_availability(&mut self) -> Result<(), Error> {
        let available = self.ctx.cache.available();
        if available == self.appliance_available {
            return Ok(());
        }
        self.appliance_available = available;
        self.state = if available {
            HomieDeviceStatus::Ready
        } else {
            HomieDeviceStatus::Lost
        };
        let p = self.protocol.publish_state(self.state);
        self.mqtt.homie_publish(p).await
    }

    /// Publishes every property whose formatted value differs from what was
    /// published last.
    async fn sync_values(&mut self) -> Result<(), Error> {
        for (node_id, prop_id, value) in self.current_values() {
            let key = (node_id.clone(), prop_id.clone());
            if self.published.get(&key).is_some_and(|prev| *prev == value) {
                continue;
            }
            let retained = self
                .description
                .get_property_by_id(&node_id, &prop_id)
                .is_none_or(|pd| pd.retained);
            let p = self.protocol.publish_value(&node_id, &prop_id, value.clone(), retained);
            self.mqtt.homie_publish(p).await?;
            self.published.insert(key, value);
        }
        Ok(())
    }

    fn current_values(&self) -> Vec<(HomieID, HomieID, String)> {
        let mut values = Vec::new();
        for sensor in &self.entities.sensors {
            let Some(value) = sensor.value() else { continue };
            let Some(prop_id) = property_id(sensor.sensor_name()) else { continue };
            values.push((node_for(sensor.unit()), prop_id, value.to_string()));
        }
        for problem in &self.entities.problem_sensors {
            let Some(value) = problem.is_on() else { continue };
            values.push((node_for(problem.unit()), PROBLEM_PROPERTY, value.to_string()));
        }
        if let Some(switch) = &self.entities.climate_switch {
            values.push((CLIMATE_NODE, POWER_PROPERTY, switch.is_on().to_string()));
        }
        if let Some(select) = &self.entities.mode_select {
            if let Some(mode) = select.current() {
                values.push((CLIMATE_NODE, MODE_PROPERTY, mode));
            }
        }
        if let Some(setpoint) = &self.entities.setpoint {
            if let Some(value) = setpoint.value() {
                values.push((CLIMATE_NODE, SETPOINT_PROPERTY, value.to_string()));
            }
        }
        for switch in &self.entities.operation_switches {
            let Some(value) = switch.is_on() else { continue };
            let Some(prop_id) = property_id(switch.operation()) else { continue };
            values.push((node_for(switch.unit()), prop_id, value.to_string()));
        }
        if let Some(heater) = &self.entities.water_heater {
            if let Some(state) = heater.current_operation() {
                values.push((HOT_WATER_NODE, TANK_STATE_PROPERTY, state.to_string()));
            }
            if let Some(target) = heater.target_temperature() {
                values.push((HOT_WATER_NODE, TANK_TARGET_PROPERTY, target.to_string()));
            }
        }
        values
    }

    async fn handle_command(&mut self, command: Command) {
        let Command::Set { property, value } = command;
        if property.device_id() != self.protocol.device_ref().device_id() {
            return;
        }
        let node_id = property.node_id();
        let prop_id = property.prop_id();
        let result = self.dispatch_set(node_id, prop_id, &value).await;
        match result {
            None => {
                tracing::warn!(%node_id, %prop_id, "set command for an unknown property");
            }
            Some(Err(error)) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    %node_id,
                    %prop_id,
                    value,
                    "could not apply a set command"
                );
            }
            Some(Ok(())) => {}
        }
    }

    /// Routes one set command to its entity adapter. `None` means no entity
    /// claims the property.
    async fn dispatch_set(
        &self,
        node_id: &HomieID,
        prop_id: &HomieID,
        value: &str,
    ) -> Option<Result<(), crate::controller::Error>> {
        if *node_id == CLIMATE_NODE {
            if *prop_id == POWER_PROPERTY {
                let switch = self.entities.climate_switch.as_ref()?;
                return Some(match value {
                    "true" => switch.turn_on().await,
                    "false" => switch.turn_off().await,
                    other => Err(crate::controller::Error::InvalidValue {
                        operation: "Power".to_string(),
                        value: other.to_string(),
                    }),
                });
            }
            if *prop_id == MODE_PROPERTY {
                let select = self.entities.mode_select.as_ref()?;
                return Some(select.select(value).await);
            }
            if *prop_id == SETPOINT_PROPERTY {
                let setpoint = self.entities.setpoint.as_ref()?;
                let Ok(value) = value.parse::<f64>() else {
                    return Some(Err(crate::controller::Error::InvalidValue {
                        operation: "LeavingWaterTemperature".to_string(),
                        value: value.to_string(),
                    }));
                };
                return Some(setpoint.set(value).await);
            }
        }
        if *node_id == HOT_WATER_NODE {
            if *prop_id == TANK_STATE_PROPERTY {
                let heater = self.entities.water_heater.as_ref()?;
                let Ok(state) = value.parse() else {
                    return Some(Err(crate::controller::Error::InvalidValue {
                        operation: "Power".to_string(),
                        value: value.to_string(),
                    }));
                };
                return Some(heater.set_operation(state).await);
            }
            if *prop_id == TANK_TARGET_PROPERTY {
                let heater = self.entities.water_heater.as_ref()?;
                let Ok(value) = value.parse::<f64>() else {
                    return Some(Err(crate::controller::Error::InvalidValue {
                        operation: "TargetTemperature".to_string(),
                        value: value.to_string(),
                    }));
                };
                return Some(heater.set_temperature(value).await);
            }
        }
        for switch in &self.entities.operation_switches {
            if node_for(switch.unit()) == *node_id
                && property_id(switch.operation()).as_ref() == Some(prop_id)
            {
                return Some(match value {
                    "true" => switch.turn_on().await,
                    "false" => switch.turn_off().await,
                    other => Err(crate::controller::Error::InvalidValue {
                        operation: switch.operation().to_string(),
                        value: other.to_string(),
                    }),
                });
            }
        }
        None
    }
}

fn node_for(unit: Unit) -> HomieID {
    match unit {
        Unit::ClimateControl => CLIMATE_NODE,
        Unit::HotWaterTank => HOT_WATER_NODE,
    }
}

/// Converts an appliance-side name like `LeavingWaterTemperatureCurrent` to a
/// Homie property ID like `leaving-water-temperature-current`.
fn property_id(name: &str) -> Option<HomieID> {
    let mut id = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                id.push('-');
            }
            id.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() {
            id.push(c);
            prev_lower = true;
        } else {
            id.push('-');
            prev_lower = false;
        }
    }
    HomieID::try_from(id).ok()
}

fn float_format(descriptor: &OperationDescriptor) -> HomiePropertyFormat {
    FloatRange {
        min: descriptor.min,
        max: descriptor.max,
        step: descriptor.step,
    }
    .into()
}

/// The per-unit identities shown in the node names. A fetch failure only
/// costs the annotation, never the bridge.
async fn fetch_unit_identities<C: DeviceController>(
    ctx: &EntityContext<C>,
) -> BTreeMap<Unit, UnitIdentity> {
    let mut identities = BTreeMap::new();
    for unit in Unit::ALL {
        if !ctx.cache.has_unit(unit) {
            continue;
        }
        match ctx.cache.unit_identity(unit).await {
            Ok(identity) => {
                identities.insert(unit, identity);
            }
            Err(error) => {
                tracing::debug!(
                    error = &error as &dyn std::error::Error,
                    %unit,
                    "could not fetch the unit identity"
                );
            }
        }
    }
    identities
}

fn describe<C: DeviceController>(
    ctx: &EntityContext<C>,
    entities: &Entities<C>,
    unit_identities: &BTreeMap<Unit, UnitIdentity>,
) -> HomieDeviceDescription {
    let identity = ctx.cache.identity();
    let mut nodes: BTreeMap<HomieID, BTreeMap<HomieID, _>> = BTreeMap::new();

    for sensor in &entities.sensors {
        let Some(prop_id) = property_id(sensor.sensor_name()) else { continue };
        nodes.entry(node_for(sensor.unit())).or_default().insert(
            prop_id,
            PropertyDescriptionBuilder::new(HomieDataType::Float)
                .unit(homie5::HOMIE_UNIT_DEGREE_CELSIUS)
                .build(),
        );
    }
    for problem in &entities.problem_sensors {
        nodes.entry(node_for(problem.unit())).or_default().insert(
            PROBLEM_PROPERTY,
            PropertyDescriptionBuilder::new(HomieDataType::Boolean).build(),
        );
    }
    if entities.climate_switch.is_some() {
        nodes.entry(CLIMATE_NODE).or_default().insert(
            POWER_PROPERTY,
            PropertyDescriptionBuilder::new(HomieDataType::Boolean)
                .settable(true)
                .build(),
        );
    }
    if entities.mode_select.is_some() {
        let options = OperationModeSelect::<C>::options()
            .iter()
            .map(|v| v.to_string())
            .collect();
        nodes.entry(CLIMATE_NODE).or_default().insert(
            MODE_PROPERTY,
            PropertyDescriptionBuilder::new(HomieDataType::Enum)
                .settable(true)
                .format(HomiePropertyFormat::Enum(options))
                .build(),
        );
    }
    if let Some(setpoint) = &entities.setpoint {
        let mut builder = PropertyDescriptionBuilder::new(HomieDataType::Float)
            .settable(true)
            .unit(homie5::HOMIE_UNIT_DEGREE_CELSIUS);
        if let Some((_, descriptor)) = setpoint.resolve() {
            builder = builder.format(float_format(&descriptor));
        }
        nodes
            .entry(CLIMATE_NODE)
            .or_default()
            .insert(SETPOINT_PROPERTY, builder.build());
    }
    for switch in &entities.operation_switches {
        let Some(prop_id) = property_id(switch.operation()) else { continue };
        nodes.entry(node_for(switch.unit())).or_default().insert(
            prop_id,
            PropertyDescriptionBuilder::new(HomieDataType::Boolean)
                .settable(true)
                .build(),
        );
    }
    if let Some(heater) = &entities.water_heater {
        let states = heater.states().iter().map(|v| v.to_string()).collect();
        let node = nodes.entry(HOT_WATER_NODE).or_default();
        node.insert(
            TANK_STATE_PROPERTY,
            PropertyDescriptionBuilder::new(HomieDataType::Enum)
                .settable(true)
                .format(HomiePropertyFormat::Enum(states))
                .build(),
        );
        let (_, descriptor) = heater.temperature_config();
        node.insert(
            TANK_TARGET_PROPERTY,
            PropertyDescriptionBuilder::new(HomieDataType::Float)
                .settable(true)
                .unit(homie5::HOMIE_UNIT_DEGREE_CELSIUS)
                .format(float_format(&descriptor))
                .build(),
        );
    }

    let mut description = DeviceDescriptionBuilder::new()
        .name(format!("{} {}", identity.manufacturer, identity.model_name));
    for (node_id, properties) in nodes {
        let unit = if node_id == CLIMATE_NODE {
            Unit::ClimateControl
        } else {
            Unit::HotWaterTank
        };
        let name = match unit_identities.get(&unit) {
            Some(identity) => format!("{} ({})", unit.display_name(), identity.model_number),
            None => unit.display_name().to_string(),
        };
        description = description.add_node(
            node_id,
            HomieNodeDescription {
                name: Some(name),
                r#type: None,
                properties,
            },
        );
    }
    description.build()
}
