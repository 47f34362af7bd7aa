pub mod operations {
    use crate::output;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize)]
    #[strum(serialize_all = "lowercase")]
    #[serde(rename_all = "lowercase")]
    pub enum Kind {
        Operation,
        Sensor,
        State,
    }

    #[derive(serde::Serialize)]
    pub struct OperationSchema {
        pub name: &'static str,
        pub unit: &'static str,
        pub kind: Kind,
        pub writable: bool,
        pub description: &'static str,
    }

    /// The datapoints known to appear across Altherma sub-models. Which of
    /// them an actual appliance carries is decided by its profile at runtime.
    static KNOWN_OPERATIONS: &[OperationSchema] = &[
        OperationSchema {
            name: "Power",
            unit: "SpaceHeating",
            kind: Kind::Operation,
            writable: true,
            description: "Climate control power state (on/standby)",
        },
        OperationSchema {
            name: "OperationMode",
            unit: "SpaceHeating",
            kind: Kind::Operation,
            writable: true,
            description: "Active climate mode: heating, cooling or auto",
        },
        OperationSchema {
            name: "EcoMode",
            unit: "SpaceHeating",
            kind: Kind::Operation,
            writable: true,
            description: "Economy mode toggle, where the profile lists it",
        },
        OperationSchema {
            name: "LeavingWaterTemperatureHeating",
            unit: "SpaceHeating",
            kind: Kind::Operation,
            writable: true,
            description: "Fixed leaving water setpoint while heating",
        },
        OperationSchema {
            name: "LeavingWaterTemperatureCooling",
            unit: "SpaceHeating",
            kind: Kind::Operation,
            writable: true,
            description: "Fixed leaving water setpoint while cooling",
        },
        OperationSchema {
            name: "LeavingWaterTemperatureAuto",
            unit: "SpaceHeating",
            kind: Kind::Operation,
            writable: true,
            description: "Fixed leaving water setpoint in automatic mode",
        },
        OperationSchema {
            name: "LeavingWaterTemperatureOffsetHeating",
            unit: "SpaceHeating",
            kind: Kind::Operation,
            writable: true,
            description: "Weather-compensated leaving water offset while heating",
        },
        OperationSchema {
            name: "LeavingWaterTemperatureOffsetCooling",
            unit: "SpaceHeating",
            kind: Kind::Operation,
            writable: true,
            description: "Weather-compensated leaving water offset while cooling",
        },
        OperationSchema {
            name: "LeavingWaterTemperatureOffsetAuto",
            unit: "SpaceHeating",
            kind: Kind::Operation,
            writable: true,
            description: "Weather-compensated leaving water offset in automatic mode",
        },
        OperationSchema {
            name: "IndoorTemperature",
            unit: "SpaceHeating",
            kind: Kind::Sensor,
            writable: false,
            description: "Room temperature at the user interface",
        },
        OperationSchema {
            name: "OutdoorTemperature",
            unit: "SpaceHeating",
            kind: Kind::Sensor,
            writable: false,
            description: "Outdoor unit ambient temperature",
        },
        OperationSchema {
            name: "LeavingWaterTemperatureCurrent",
            unit: "SpaceHeating",
            kind: Kind::Sensor,
            writable: false,
            description: "Measured leaving water temperature",
        },
        OperationSchema {
            name: "Power",
            unit: "DomesticHotWaterTank",
            kind: Kind::Operation,
            writable: true,
            description: "Hot water tank power state (on/standby)",
        },
        OperationSchema {
            name: "powerful",
            unit: "DomesticHotWaterTank",
            kind: Kind::Operation,
            writable: true,
            description: "Boost flag heating the tank at full capacity",
        },
        OperationSchema {
            name: "TargetTemperature",
            unit: "DomesticHotWaterTank",
            kind: Kind::Operation,
            writable: true,
            description: "Tank setpoint; read-only on weather-dependent sub-models",
        },
        OperationSchema {
            name: "DomesticHotWaterTemperatureHeating",
            unit: "DomesticHotWaterTank",
            kind: Kind::Operation,
            writable: true,
            description: "Tank setpoint on weather-dependent sub-models",
        },
        OperationSchema {
            name: "TankTemperature",
            unit: "DomesticHotWaterTank",
            kind: Kind::Sensor,
            writable: false,
            description: "Measured tank water temperature",
        },
        OperationSchema {
            name: "ErrorState",
            unit: "*",
            kind: Kind::State,
            writable: false,
            description: "Unit reports an error condition",
        },
        OperationSchema {
            name: "WarningState",
            unit: "*",
            kind: Kind::State,
            writable: false,
            description: "Unit reports a warning condition",
        },
        OperationSchema {
            name: "EmergencyState",
            unit: "*",
            kind: Kind::State,
            writable: false,
            description: "Unit runs on the backup heater only",
        },
        OperationSchema {
            name: "InstallerState",
            unit: "*",
            kind: Kind::State,
            writable: false,
            description: "Installer configuration mode is active",
        },
        OperationSchema {
            name: "WeatherDependentState",
            unit: "*",
            kind: Kind::State,
            writable: false,
            description: "Setpoints follow the weather-dependent curve",
        },
    ];

    impl OperationSchema {
        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_uppercase();
            self.name.to_uppercase().contains(&pattern)
                || self.unit.to_uppercase().contains(&pattern)
                || self.description.to_uppercase().contains(&pattern)
        }
    }

    /// Search and output the known appliance datapoints.
    #[derive(clap::Parser)]
    pub struct Args {
        filter: Option<String>,
        #[command(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the datapoint catalog")]
        Output(#[from] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output()?;
        output.table_headers(vec!["Name", "Unit", "Kind", "Writable", "Description"])?;
        for operation in KNOWN_OPERATIONS {
            if let Some(pattern) = &args.filter {
                if !operation.is_match(pattern) {
                    continue;
                }
            }
            output.result(
                || {
                    vec![
                        operation.name.to_string(),
                        operation.unit.to_string(),
                        operation.kind.to_string(),
                        operation.writable.to_string(),
                        operation.description.to_string(),
                    ]
                },
                || operation,
            )?;
        }
        output.commit()?;
        Ok(())
    }
}

pub mod inspect {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::device_cache::{CacheConfig, StatusCache};
    use crate::entities::{self, EntityContext};
    use crate::poll::Poller;
    use crate::replay::ReplayController;
    use crate::{controller, output, replay};

    /// Project a status capture into entities and print their values.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Path to a JSON status capture.
        #[arg(long)]
        replay: PathBuf,
        #[command(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not load the status capture")]
        Replay(#[from] replay::LoadError),
        #[error("could not take the initial status snapshot")]
        Initialize(#[from] controller::Error),
        #[error("could not output the entity list")]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    struct EntityRecord {
        kind: &'static str,
        unique_id: String,
        name: String,
        value: String,
    }

    impl EntityRecord {
        fn row(&self) -> Vec<String> {
            vec![
                self.kind.to_string(),
                self.unique_id.clone(),
                self.name.clone(),
                self.value.clone(),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(run_inner(args))
    }

    async fn run_inner(args: Args) -> Result<(), Error> {
        let controller = ReplayController::load(&args.replay).await?;
        let cache = Arc::new(StatusCache::initialize(controller, CacheConfig::default()).await?);
        let (_poller, refresh) = Poller::new(Arc::clone(&cache), Duration::from_secs(30));
        let ctx = EntityContext { cache, refresh };
        let entities = entities::build(&ctx);

        let mut records = Vec::new();
        for sensor in &entities.sensors {
            records.push(EntityRecord {
                kind: "sensor",
                unique_id: sensor.unique_id().to_string(),
                name: sensor.sensor_name().to_string(),
                value: sensor.value().map(|v| v.to_string()).unwrap_or_default(),
            });
        }
        for problem in &entities.problem_sensors {
            records.push(EntityRecord {
                kind: "binary_sensor",
                unique_id: problem.unique_id().to_string(),
                name: format!("{} problem", problem.unit().display_name()),
                value: problem.is_on().map(|v| v.to_string()).unwrap_or_default(),
            });
        }
        if let Some(switch) = &entities.climate_switch {
            records.push(EntityRecord {
                kind: "switch",
                unique_id: switch.unique_id().to_string(),
                name: "Climate control power".to_string(),
                value: switch.is_on().to_string(),
            });
        }
        for switch in &entities.operation_switches {
            records.push(EntityRecord {
                kind: "switch",
                unique_id: switch.unique_id().to_string(),
                name: switch.operation().to_string(),
                value: switch.is_on().map(|v| v.to_string()).unwrap_or_default(),
            });
        }
        if let Some(select) = &entities.mode_select {
            records.push(EntityRecord {
                kind: "select",
                unique_id: select.unique_id().to_string(),
                name: "Operation mode".to_string(),
                value: select.current().unwrap_or_default(),
            });
        }
        if let Some(setpoint) = &entities.setpoint {
            let name = setpoint
                .resolve()
                .map(|(operation, _)| operation)
                .unwrap_or_else(|| "LeavingWaterTemperature".to_string());
            records.push(EntityRecord {
                kind: "number",
                unique_id: setpoint.unique_id().to_string(),
                name,
                value: setpoint.value().map(|v| v.to_string()).unwrap_or_default(),
            });
        }
        if let Some(heater) = &entities.water_heater {
            records.push(EntityRecord {
                kind: "water_heater",
                unique_id: heater.unique_id().to_string(),
                name: "Hot water tank".to_string(),
                value: heater
                    .current_operation()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            });
        }

        let mut output = args.output.to_output()?;
        output.table_headers(vec!["Kind", "Unique ID", "Name", "Value"])?;
        for record in &records {
            output.result(|| record.row(), || record)?;
        }
        output.commit()?;
        Ok(())
    }
}

pub mod homie {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use homie5::{Homie5DeviceProtocol, HomieDomain, HomieID};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::AbortOnDropHandle;

    use crate::device_cache::{CacheConfig, StatusCache};
    use crate::entities::EntityContext;
    use crate::homie::{convert_qos, Command, HomieBridge};
    use crate::poll::Poller;
    use crate::replay::ReplayController;
    use crate::{controller, replay};

    /// Serve the appliance as a Homie 5 device over MQTT.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Path to a JSON status capture standing in for the appliance.
        #[arg(long)]
        replay: PathBuf,
        /// MQTT broker URL, including a client_id query parameter.
        #[arg(long, default_value = "mqtt://localhost:1883?client_id=daikin-altherma-tools")]
        mqtt_url: String,
        /// Homie device ID. Defaults to one derived from the serial number.
        #[arg(long)]
        device_id: Option<String>,
        /// Delay between status refreshes.
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        poll_interval: Duration,
        /// Bound on one refresh cycle before it counts as a failure.
        #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
        refresh_timeout: Duration,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not load the status capture")]
        Replay(#[from] replay::LoadError),
        #[error("could not take the initial status snapshot")]
        Initialize(#[from] controller::Error),
        #[error("could not parse the MQTT broker URL")]
        MqttUrl(#[source] rumqttc::v5::OptionError),
        #[error("`{1}` is not a valid homie device ID")]
        DeviceId(#[source] homie5::InvalidHomieIDError, String),
        #[error("could not run the homie device")]
        Bridge(#[from] crate::homie::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(run_inner(args))
    }

    async fn run_inner(args: Args) -> Result<(), Error> {
        let controller = ReplayController::load(&args.replay).await?;
        let cache = Arc::new(
            StatusCache::initialize(
                controller,
                CacheConfig { refresh_timeout: args.refresh_timeout },
            )
            .await?,
        );

        let device_id = match args.device_id {
            Some(id) => HomieID::try_from(id.clone()).map_err(|e| Error::DeviceId(e, id))?,
            None => {
                let id = format!("daikin-{}", cache.identity().serial_number.to_lowercase());
                HomieID::try_from(id.clone()).map_err(|e| Error::DeviceId(e, id))?
            }
        };
        let (protocol, last_will) =
            Homie5DeviceProtocol::new(device_id, HomieDomain::Default);

        let mut options = rumqttc::v5::MqttOptions::parse_url(&args.mqtt_url)
            .map_err(Error::MqttUrl)?;
        options.set_last_will(rumqttc::v5::mqttbytes::v5::LastWill::new(
            last_will.topic,
            last_will.message,
            convert_qos(last_will.qos),
            last_will.retain,
            None,
        ));
        let (mqtt, mut event_loop) = rumqttc::v5::AsyncClient::new(options, 64);

        let (command_sender, commands) = mpsc::unbounded_channel();
        let _mqtt_task = AbortOnDropHandle::new(tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(rumqttc::v5::Event::Incoming(
                        rumqttc::v5::mqttbytes::v5::Packet::Publish(publish),
                    )) => {
                        if let Ok(command) = Command::try_from_mqtt_command(publish) {
                            if command_sender.send(command).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(
                            error = &error as &dyn std::error::Error,
                            "MQTT connection trouble, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }));

        let (poller, refresh) = Poller::new(Arc::clone(&cache), args.poll_interval);
        let updates = poller.subscribe();
        let cancel = CancellationToken::new();
        let _poll_task =
            AbortOnDropHandle::new(tokio::spawn(poller.run(cancel.child_token())));

        let ctx = EntityContext { cache, refresh };
        let mut bridge = HomieBridge::new(mqtt, protocol, ctx, updates, commands).await;
        bridge.publish_device().await?;
        tracing::info!("homie device is ready");

        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down");
                interrupt.cancel();
            }
        });
        bridge.run(cancel).await?;
        Ok(())
    }
}
