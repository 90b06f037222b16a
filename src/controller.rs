use error_stack::Result;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::ForceCoolingError;
use crate::sensibo::AcState;
use crate::settings::Settings;
use crate::temperature::{should_activate, SensorReading};

const POWER_PROPERTY: &str = "on";

#[allow(async_fn_in_trait)]
pub trait TemperatureSensor {
    async fn read_temperature(&self) -> Result<SensorReading, ForceCoolingError>;
}

#[allow(async_fn_in_trait)]
pub trait AcController {
    /// Maps device display name to device id
    async fn list_devices(&self) -> Result<HashMap<String, String>, ForceCoolingError>;

    async fn get_ac_state(&self, device_id: &str) -> Result<AcState, ForceCoolingError>;

    async fn change_ac_state(
        &self,
        device_id: &str,
        current_state: &AcState,
        property: &str,
        value: Value,
    ) -> Result<AcState, ForceCoolingError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub device_name: String,
    pub temperature_threshold: f64,
    pub dry_run: bool,
}

impl ControllerConfig {
    pub fn from_settings(settings: &Settings, dry_run: bool) -> ControllerConfig {
        ControllerConfig {
            device_name: settings.sensibo.device_name.clone(),
            temperature_threshold: settings.temperature_threshold,
            dry_run,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    AcTurnedOn {
        reading: SensorReading,
        ac_state: AcState,
    },
    NoAction {
        reading: SensorReading,
        ac_on: bool,
    },
    /// Activation was due but suppressed
    DryRun { reading: SensorReading },
}

/// Reads the sensor once and turns the AC on when it is off and the temperature is
/// strictly above the threshold.
pub async fn run(
    config: &ControllerConfig,
    sensor: &impl TemperatureSensor,
    ac: &impl AcController,
) -> Result<Outcome, ForceCoolingError> {
    let reading = sensor.read_temperature().await?;
    debug!(
        raw = reading.raw,
        celsius = reading.celsius,
        fahrenheit = reading.fahrenheit,
        "Sensor reading"
    );

    let devices = ac.list_devices().await?;
    let device_id = devices
        .get(&config.device_name)
        .ok_or_else(|| ForceCoolingError::DeviceNotFound(config.device_name.clone()))?;

    let ac_state = ac.get_ac_state(device_id).await?;

    if !should_activate(reading.fahrenheit, config.temperature_threshold, ac_state.on) {
        info!(
            fahrenheit = reading.fahrenheit,
            threshold = config.temperature_threshold,
            ac_on = ac_state.on,
            "Temperature in Fahrenheit: {} °F, AC on: {}",
            reading.fahrenheit,
            ac_state.on
        );
        return Ok(Outcome::NoAction {
            reading,
            ac_on: ac_state.on,
        });
    }

    if config.dry_run {
        info!(
            fahrenheit = reading.fahrenheit,
            threshold = config.temperature_threshold,
            device = %config.device_name,
            "Dry run, AC would be turned on"
        );
        return Ok(Outcome::DryRun { reading });
    }

    let ac_state = ac
        .change_ac_state(device_id, &ac_state, POWER_PROPERTY, Value::Bool(true))
        .await?;

    info!(
        fahrenheit = reading.fahrenheit,
        threshold = config.temperature_threshold,
        device = %config.device_name,
        "AC turned on"
    );

    Ok(Outcome::AcTurnedOn { reading, ac_state })
}
