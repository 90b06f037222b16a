use error_stack::{Result, ResultExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::controller::AcController;
use crate::error::ForceCoolingError;
use crate::settings::{HttpSettings, SensiboSettings};

pub const SENSIBO_BASE_URL: &str = "https://home.sensibo.com/api/v2";

/// State record of an AC unit. Only `on` is interpreted, the remaining fields are
/// kept so they can be echoed back as the current state when changing a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcState {
    pub on: bool,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Reply<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct Pod {
    id: String,
    room: Room,
}

#[derive(Debug, Deserialize)]
struct Room {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcStateEntry {
    ac_state: AcState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeResult {
    status: Option<String>,
    failure_reason: Option<Value>,
    ac_state: Option<AcState>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeRequest<'a> {
    current_ac_state: &'a AcState,
    new_value: &'a Value,
}

#[derive(Debug, Clone)]
pub struct SensiboClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SensiboClient {
    pub fn new(
        sensibo: &SensiboSettings,
        http: &HttpSettings,
    ) -> Result<SensiboClient, ForceCoolingError> {
        let client = reqwest::Client::builder()
            .timeout(http.timeout)
            .build()
            .change_context(ForceCoolingError::NetworkError)
            .attach_printable("Building Sensibo HTTP client")?;

        Ok(SensiboClient {
            client,
            base_url: SENSIBO_BASE_URL.to_string(),
            api_key: sensibo.api_key.clone(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> SensiboClient {
        self.base_url = base_url.into();
        self
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        description: &str,
    ) -> Result<T, ForceCoolingError> {
        let body = request
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            // The API key travels in the query string, keep it out of the report
            .map_err(|e| e.without_url())
            .change_context(ForceCoolingError::NetworkError)
            .attach_printable_lazy(|| description.to_string())?
            .text()
            .await
            .map_err(|e| e.without_url())
            .change_context(ForceCoolingError::NetworkError)
            .attach_printable_lazy(|| description.to_string())?;

        let reply = serde_json::from_str::<Reply<T>>(&body).change_context_lazy(|| {
            ForceCoolingError::MalformedResponse(format!("Unexpected reply to {description}"))
        })?;

        Ok(reply.result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn devices(&self) -> Result<HashMap<String, String>, ForceCoolingError> {
        let request = self
            .client
            .get(format!("{}/users/me/pods", self.base_url))
            .query(&[("fields", "id,room")]);

        let pods: Vec<Pod> = self.send(request, "Listing Sensibo devices").await?;
        debug!("Found {} Sensibo devices", pods.len());

        Ok(pods.into_iter().map(|pod| (pod.room.name, pod.id)).collect())
    }

    #[tracing::instrument(skip(self))]
    pub async fn pod_ac_state(&self, device_id: &str) -> Result<AcState, ForceCoolingError> {
        let request = self
            .client
            .get(format!("{}/pods/{}/acStates", self.base_url, device_id))
            .query(&[("limit", "1"), ("fields", "status,reason,acState")]);

        let entries: Vec<AcStateEntry> = self
            .send(request, &format!("Getting AC state of device {device_id}"))
            .await?;

        entries
            .into_iter()
            .next()
            .map(|entry| entry.ac_state)
            .ok_or_else(|| {
                ForceCoolingError::MalformedResponse(format!(
                    "No AC state reported for device {device_id}"
                ))
                .into()
            })
    }

    #[tracing::instrument(skip(self, current_state))]
    pub async fn pod_change_ac_state(
        &self,
        device_id: &str,
        current_state: &AcState,
        property: &str,
        new_value: &Value,
    ) -> Result<AcState, ForceCoolingError> {
        let description = format!("Changing '{property}' of device {device_id}");
        let request = self
            .client
            .patch(format!(
                "{}/pods/{}/acStates/{}",
                self.base_url, device_id, property
            ))
            .json(&ChangeRequest {
                current_ac_state: current_state,
                new_value,
            });

        let change: ChangeResult = self.send(request, &description).await?;

        if let Some(status) = change.status.as_deref() {
            if status.eq_ignore_ascii_case("failed") {
                let reason = change.failure_reason.unwrap_or(Value::Null);
                return Err(error_stack::Report::new(ForceCoolingError::NetworkError)
                    .attach_printable(format!("{description} failed: {reason}")));
            }
        }

        change.ac_state.ok_or_else(|| {
            ForceCoolingError::MalformedResponse(format!("{description}: no resulting AC state"))
                .into()
        })
    }
}

impl AcController for SensiboClient {
    async fn list_devices(&self) -> Result<HashMap<String, String>, ForceCoolingError> {
        self.devices().await
    }

    async fn get_ac_state(&self, device_id: &str) -> Result<AcState, ForceCoolingError> {
        self.pod_ac_state(device_id).await
    }

    async fn change_ac_state(
        &self,
        device_id: &str,
        current_state: &AcState,
        property: &str,
        value: Value,
    ) -> Result<AcState, ForceCoolingError> {
        self.pod_change_ac_state(device_id, current_state, property, &value)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client(base_url: String) -> SensiboClient {
        let sensibo = SensiboSettings {
            api_key: "sensibo-key".to_string(),
            device_name: "Living Room".to_string(),
        };

        SensiboClient::new(&sensibo, &HttpSettings::default())
            .unwrap()
            .with_base_url(base_url)
    }

    fn ac_state_json(on: bool) -> Value {
        json!({
            "timestamp": { "time": "2024-07-01T12:00:00.000000Z", "secondsAgo": 0 },
            "on": on,
            "mode": "cool",
            "targetTemperature": 22,
            "temperatureUnit": "C",
            "fanLevel": "auto",
            "swing": "stopped"
        })
    }

    #[test]
    fn test_ac_state_keeps_other_fields() {
        let state: AcState = serde_json::from_value(ac_state_json(false)).unwrap();

        assert!(!state.on);
        assert_eq!(state.other["mode"], json!("cool"));
        assert_eq!(serde_json::to_value(&state).unwrap(), ac_state_json(false));
    }

    #[tokio::test]
    async fn test_devices() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/users/me/pods")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("apiKey".into(), "sensibo-key".into()),
                Matcher::UrlEncoded("fields".into(), "id,room".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "status": "success",
                    "result": [
                        { "id": "abc123", "room": { "name": "Living Room", "icon": "lounge" } },
                        { "id": "def456", "room": { "name": "Bedroom", "icon": "bedroom" } }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let devices = client(server.url()).devices().await.unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices["Living Room"], "abc123");
        assert_eq!(devices["Bedroom"], "def456");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_pod_ac_state() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/pods/abc123/acStates")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("apiKey".into(), "sensibo-key".into()),
                Matcher::UrlEncoded("limit".into(), "1".into()),
                Matcher::UrlEncoded("fields".into(), "status,reason,acState".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "status": "success",
                    "result": [
                        { "status": "Success", "reason": "UserRequest", "acState": ac_state_json(true) },
                        { "status": "Success", "reason": "UserRequest", "acState": ac_state_json(false) }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let state = client(server.url()).pod_ac_state("abc123").await.unwrap();

        assert!(state.on);
        assert_eq!(state.other["targetTemperature"], json!(22));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_pod_ac_state_empty_result() {
        let mut server = Server::new_async().await;

        let _mock = server
            .mock("GET", "/pods/abc123/acStates")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({ "status": "success", "result": [] }).to_string())
            .create_async()
            .await;

        let report = client(server.url()).pod_ac_state("abc123").await.unwrap_err();
        assert!(matches!(
            report.current_context(),
            ForceCoolingError::MalformedResponse(_)
        ));
    }

    #[tokio::test]
    async fn test_pod_change_ac_state() {
        let mut server = Server::new_async().await;
        let current: AcState = serde_json::from_value(ac_state_json(false)).unwrap();

        let mock = server
            .mock("PATCH", "/pods/abc123/acStates/on")
            .match_query(Matcher::UrlEncoded("apiKey".into(), "sensibo-key".into()))
            .match_body(Matcher::Json(json!({
                "currentAcState": ac_state_json(false),
                "newValue": true
            })))
            .with_status(200)
            .with_body(
                json!({
                    "status": "success",
                    "result": {
                        "id": "state-1",
                        "status": "Success",
                        "reason": "UserRequest",
                        "acState": ac_state_json(true),
                        "changedProperties": ["on"],
                        "failureReason": null
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let state = client(server.url())
            .change_ac_state("abc123", &current, "on", Value::Bool(true))
            .await
            .unwrap();

        assert!(state.on);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_pod_change_ac_state_failed() {
        let mut server = Server::new_async().await;
        let current: AcState = serde_json::from_value(ac_state_json(false)).unwrap();

        let _mock = server
            .mock("PATCH", "/pods/abc123/acStates/on")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "status": "success",
                    "result": {
                        "status": "Failed",
                        "failureReason": "PodNotConnected",
                        "acState": ac_state_json(false)
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let report = client(server.url())
            .change_ac_state("abc123", &current, "on", Value::Bool(true))
            .await
            .unwrap_err();

        assert!(matches!(report.current_context(), ForceCoolingError::NetworkError));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let mut server = Server::new_async().await;

        let _mock = server
            .mock("GET", "/users/me/pods")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"status":"error","reason":"Forbidden"}"#)
            .create_async()
            .await;

        let report = client(server.url()).devices().await.unwrap_err();
        assert!(matches!(report.current_context(), ForceCoolingError::NetworkError));
    }
}
