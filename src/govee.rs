use error_stack::{Result, ResultExt};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::controller::TemperatureSensor;
use crate::error::ForceCoolingError;
use crate::settings::{GoveeSettings, HttpSettings};
use crate::temperature::SensorReading;

pub const GOVEE_BASE_URL: &str = "https://openapi.api.govee.com";
const DEVICE_STATE_PATH: &str = "/router/api/v1/device/state";
const API_KEY_HEADER: &str = "govee-api-key";

// The sensor temperature is always the second capability
const TEMPERATURE_POINTER: &str = "/payload/capabilities/1/state/value";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceStateRequest<'a> {
    request_id: Uuid,
    payload: DeviceStatePayload<'a>,
}

#[derive(Debug, Serialize)]
struct DeviceStatePayload<'a> {
    device: &'a str,
    sku: &'a str,
}

#[derive(Debug, Clone)]
pub struct GoveeClient {
    client: reqwest::Client,
    base_url: String,
    device: String,
    sku: String,
}

impl GoveeClient {
    pub fn new(
        govee: &GoveeSettings,
        http: &HttpSettings,
    ) -> Result<GoveeClient, ForceCoolingError> {
        let mut api_key = HeaderValue::from_str(&govee.api_key).change_context(
            ForceCoolingError::ConfigurationError("Invalid Govee API key".to_string()),
        )?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, api_key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(http.timeout)
            .build()
            .change_context(ForceCoolingError::NetworkError)
            .attach_printable("Building Govee HTTP client")?;

        Ok(GoveeClient {
            client,
            base_url: GOVEE_BASE_URL.to_string(),
            device: govee.mac_address.clone(),
            sku: govee.sku_model_number.clone(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> GoveeClient {
        self.base_url = base_url.into();
        self
    }

    #[tracing::instrument(skip(self), fields(device = %self.device, sku = %self.sku))]
    async fn get_device_state(&self) -> Result<Value, ForceCoolingError> {
        let url = format!("{}{}", self.base_url, DEVICE_STATE_PATH);
        let request = DeviceStateRequest {
            request_id: Uuid::new_v4(),
            payload: DeviceStatePayload {
                device: &self.device,
                sku: &self.sku,
            },
        };

        debug!(request_id = %request.request_id, "Querying Govee device state");

        let body = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .change_context(ForceCoolingError::NetworkError)
            .attach_printable_lazy(|| format!("POST {url}"))?
            .text()
            .await
            .change_context(ForceCoolingError::NetworkError)
            .attach_printable_lazy(|| format!("Reading response body of POST {url}"))?;

        serde_json::from_str::<Value>(&body).change_context(ForceCoolingError::MalformedResponse(
            "Govee device state is not valid JSON".to_string(),
        ))
    }
}

/// Whole numbers sent as JSON floats (`2500.0`) are accepted, fractional values are not.
pub fn extract_raw_temperature(device_state: &Value) -> Result<i64, ForceCoolingError> {
    device_state
        .pointer(TEMPERATURE_POINTER)
        .and_then(|value| value.as_i64().or_else(|| whole_number(value)))
        .ok_or_else(|| {
            ForceCoolingError::MalformedResponse(format!(
                "Govee device state has no integer at {TEMPERATURE_POINTER}"
            ))
            .into()
        })
}

fn whole_number(value: &Value) -> Option<i64> {
    value
        .as_f64()
        .filter(|number| number.is_finite() && number.fract() == 0.0)
        .filter(|number| number.abs() < i64::MAX as f64)
        .map(|number| number as i64)
}

impl TemperatureSensor for GoveeClient {
    async fn read_temperature(&self) -> Result<SensorReading, ForceCoolingError> {
        let device_state = self.get_device_state().await?;
        let raw = extract_raw_temperature(&device_state)?;

        Ok(SensorReading::from_raw(raw))
    }
}
