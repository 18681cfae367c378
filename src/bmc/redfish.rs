//! Redfish back-end: session-authenticated HTTPS against
//! `{root}/Chassis/{motherboard}/Power` (§4.1.2). Certificates are not
//! validated — this targets lab appliance BMCs.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::BmcError;

const REDFISH_ROOT: &str = "/redfish/v1";
const KNOWN_MOTHERBOARDS: [&str; 3] = ["motherboard", "self", "1"];

/// Cached chassis list as a mutable attribute of an otherwise-immutable
/// endpoint (§9): credentials/client never change after construction,
/// only `chassis` is lazily populated, so it alone gets interior
/// mutability rather than requiring `&mut self` on every read operation.
pub struct RedfishBmc {
    hostname: String,
    username: String,
    password: String,
    client: reqwest::Client,
    token: Option<String>,
    session_id: Option<String>,
    chassis: Mutex<Option<Vec<String>>>,
    /// Overrides `root()`'s scheme+host, for pointing at a local mock
    /// server in tests. Always `None` in production.
    root_override: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "Id")]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChassisCollection {
    #[serde(rename = "Members", default)]
    members: Vec<ChassisMember>,
}

#[derive(Debug, Deserialize)]
struct ChassisMember {
    #[serde(rename = "@odata.id")]
    odata_id: String,
}

#[derive(Debug, Deserialize)]
struct PowerResponse {
    #[serde(rename = "PowerControl", default)]
    power_control: Vec<PowerControlEntry>,
}

#[derive(Debug, Deserialize)]
struct PowerControlEntry {
    #[serde(rename = "PowerConsumedWatts")]
    power_consumed_watts: Option<f64>,
    #[serde(rename = "PowerLimit", default)]
    power_limit: Option<PowerLimit>,
}

#[derive(Debug, Deserialize)]
struct PowerLimit {
    #[serde(rename = "LimitInWatts")]
    limit_in_watts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    #[serde(rename = "UserName")]
    username: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
}

impl RedfishBmc {
    pub fn new(hostname: String, username: String, password: String) -> Self {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .expect("failed to build redfish http client");

        RedfishBmc {
            hostname,
            username,
            password,
            client,
            token: None,
            session_id: None,
            chassis: Mutex::new(None),
            root_override: None,
        }
    }

    #[cfg(test)]
    fn with_root_override(mut self, root: String) -> Self {
        self.root_override = Some(root);
        self
    }

    fn root(&self) -> String {
        match &self.root_override {
            Some(root) => root.clone(),
            None => format!("https://{}{REDFISH_ROOT}", self.hostname),
        }
    }

    fn auth_header(&self) -> Result<&str, BmcError> {
        self.token
            .as_deref()
            .ok_or_else(|| BmcError::Auth("no active redfish session".into()))
    }

    pub async fn connect(&mut self) -> Result<(), BmcError> {
        let endpoint = format!("{}/SessionService/Sessions", self.root());
        let body = SessionRequest {
            username: &self.username,
            password: &self.password,
        };

        let resp = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| BmcError::Transport(format!("session create request failed: {e}")))?;

        let status = resp.status();
        let token = resp
            .headers()
            .get("X-Auth-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if !status.is_success() {
            return Err(BmcError::Auth(format!(
                "failed to establish redfish session: status {status}"
            )));
        }

        let parsed: SessionResponse = resp
            .json()
            .await
            .map_err(|e| BmcError::Parse(format!("invalid session response body: {e}")))?;

        self.token = Some(token.ok_or_else(|| BmcError::Auth("missing X-Auth-Token header".into()))?);
        self.session_id = parsed.id;
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), BmcError> {
        // Idempotent: a second call with no active session is a no-op (§8 property 7).
        let (Some(token), Some(session_id)) = (self.token.take(), self.session_id.take()) else {
            return Ok(());
        };

        let endpoint = format!("{}/SessionService/Sessions/{session_id}", self.root());
        match self
            .client
            .delete(&endpoint)
            .header("X-Auth-Token", token)
            .send()
            .await
        {
            Ok(resp) if resp.status().as_u16() != 204 => {
                warn!(status = %resp.status(), "unexpected disconnect status code");
            }
            Err(e) => warn!(error = %e, "disconnect request failed"),
            _ => {}
        }
        Ok(())
    }

    /// Lists all chassis members, caching the result for the lifetime of
    /// the session (§4.1.2 "Chassis enumeration").
    async fn chassis_names(&self) -> Result<Vec<String>, BmcError> {
        if let Some(cached) = self.chassis.lock().unwrap().as_ref() {
            return Ok(cached.clone());
        }

        let token = self.auth_header()?.to_owned();
        let endpoint = format!("{}/Chassis", self.root());
        let resp = self
            .client
            .get(&endpoint)
            .header("X-Auth-Token", token)
            .send()
            .await
            .map_err(|e| BmcError::Transport(format!("chassis enumeration failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(BmcError::Transport(format!(
                "failed to get chassis: status {}",
                resp.status()
            )));
        }

        let body: ChassisCollection = resp
            .json()
            .await
            .map_err(|e| BmcError::Parse(format!("invalid chassis collection body: {e}")))?;

        let names: Vec<String> = body
            .members
            .iter()
            .map(|m| m.odata_id.rsplit('/').next().unwrap_or(&m.odata_id).to_owned())
            .collect();

        *self.chassis.lock().unwrap() = Some(names.clone());
        Ok(names)
    }

    /// The first chassis whose lowercased name is a known motherboard alias.
    async fn motherboard(&self) -> Result<String, BmcError> {
        let chassis = self.chassis_names().await?;
        chassis
            .into_iter()
            .find(|c| KNOWN_MOTHERBOARDS.contains(&c.to_lowercase().as_str()))
            .ok_or_else(|| BmcError::Parse("no motherboard chassis found".into()))
    }

    async fn power_response(&self, motherboard: &str) -> Result<PowerResponse, BmcError> {
        let token = self.auth_header()?.to_owned();
        let endpoint = format!("{}/Chassis/{motherboard}/Power", self.root());
        debug!(%endpoint, "fetching power");
        let resp = self
            .client
            .get(&endpoint)
            .header("X-Auth-Token", token)
            .send()
            .await
            .map_err(|e| BmcError::Transport(format!("power request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(BmcError::Transport(format!(
                "failed to get power: status {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| BmcError::Parse(format!("invalid power response body: {e}")))
    }

    pub async fn current_power(&self) -> Result<i64, BmcError> {
        let motherboard = self.motherboard().await?;
        let body = self.power_response(&motherboard).await?;
        let watts = body
            .power_control
            .first()
            .and_then(|p| p.power_consumed_watts)
            .ok_or_else(|| BmcError::Parse("missing PowerControl[0].PowerConsumedWatts".into()))?;
        Ok(watts as i64)
    }

    pub async fn current_cap_level(&self) -> Result<Option<i64>, BmcError> {
        let motherboard = self.motherboard().await?;
        let body = self.power_response(&motherboard).await?;
        // Missing ⇒ 0, not NULL — the documented redfish/ipmi asymmetry (§9 OQ2).
        let watts = body
            .power_control
            .first()
            .and_then(|p| p.power_limit.as_ref())
            .and_then(|l| l.limit_in_watts)
            .unwrap_or(0);
        Ok(Some(watts))
    }

    pub async fn set_cap_level(&self, watts: i64) -> Result<(), BmcError> {
        let motherboard = self.motherboard().await?;
        let token = self.auth_header()?.to_owned();
        let endpoint = format!("{}/Chassis/{motherboard}/Power", self.root());
        let body = json!({
            "PowerControl": [{ "PowerLimit": { "LimitInWatts": watts } }]
        });

        let resp = self
            .client
            .patch(&endpoint)
            .header("X-Auth-Token", token)
            .header("If-Match", "*")
            .json(&body)
            .send()
            .await
            .map_err(|e| BmcError::Transport(format!("set cap request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(BmcError::Transport(format!(
                "failed to set cap level: status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Activates or deactivates capping via `LimitTrigger`. A 404 means
    /// the endpoint isn't implemented on this system and is treated as
    /// a non-fatal success (§4.1.2, §7 "Non-fatal success").
    async fn set_capping(&self, trigger: &str) -> Result<(), BmcError> {
        let motherboard = self.motherboard().await?;
        let token = self.auth_header()?.to_owned();
        let endpoint = format!("{}/Chassis/{motherboard}/Power/Actions/LimitTrigger", self.root());
        let body = json!({ "PowerLimitTrigger": trigger });

        let resp = self
            .client
            .patch(&endpoint)
            .header("X-Auth-Token", token)
            .header("If-Match", "*")
            .json(&body)
            .send()
            .await
            .map_err(|e| BmcError::Transport(format!("{trigger} capping request failed: {e}")))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            warn!("PowerLimitTrigger is not implemented on this system");
            return Ok(());
        }
        if !status.is_success() {
            return Err(BmcError::Transport(format!(
                "failed to {trigger} capping: status {status}"
            )));
        }
        Ok(())
    }

    pub async fn activate_capping(&self) -> Result<(), BmcError> {
        self.set_capping("Activate").await
    }

    pub async fn deactivate_capping(&self) -> Result<(), BmcError> {
        self.set_capping("Deactivate").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn known_motherboard_names_match_case_insensitively() {
        for name in ["Motherboard", "SELF", "1"] {
            assert!(KNOWN_MOTHERBOARDS.contains(&name.to_lowercase().as_str()));
        }
        assert!(!KNOWN_MOTHERBOARDS.contains(&"chassis-2".to_lowercase().as_str()));
    }

    fn bmc(server: &MockServer) -> RedfishBmc {
        RedfishBmc::new("unused".into(), "admin".into(), "secret".into()).with_root_override(server.uri())
    }

    async fn authenticated(server: &MockServer) -> RedfishBmc {
        Mock::given(method("POST"))
            .and(path("/SessionService/Sessions"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Auth-Token", "tok-123")
                    .set_body_json(serde_json::json!({"Id": "session-1"})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Chassis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Members": [{"@odata.id": "/redfish/v1/Chassis/Motherboard"}],
            })))
            .mount(server)
            .await;

        let mut bmc = bmc(server);
        bmc.connect().await.unwrap();
        bmc
    }

    #[tokio::test]
    async fn connect_stores_token_and_session_id() {
        let server = MockServer::start().await;
        let bmc = authenticated(&server).await;
        assert_eq!(bmc.token.as_deref(), Some("tok-123"));
        assert_eq!(bmc.session_id.as_deref(), Some("session-1"));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/SessionService/Sessions/session-1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let mut bmc = authenticated(&server).await;
        bmc.disconnect().await.unwrap();
        assert!(bmc.token.is_none());
        // Second call has no session left to release and must not error (§8 property 7).
        bmc.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn current_cap_level_defaults_to_zero_not_null_when_unset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Chassis/Motherboard/Power"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "PowerControl": [{"PowerConsumedWatts": 250}],
            })))
            .mount(&server)
            .await;

        let bmc = authenticated(&server).await;
        // Missing PowerLimit ⇒ Some(0), never None (§9 OQ2 asymmetry vs. IPMI).
        assert_eq!(bmc.current_cap_level().await.unwrap(), Some(0));
        assert_eq!(bmc.current_power().await.unwrap(), 250);
    }

    #[tokio::test]
    async fn set_cap_level_patches_power_limit() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/Chassis/Motherboard/Power"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let bmc = authenticated(&server).await;
        bmc.set_cap_level(600).await.unwrap();
    }

    #[tokio::test]
    async fn activate_capping_404_is_treated_as_non_fatal_success() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/Chassis/Motherboard/Power/Actions/LimitTrigger"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let bmc = authenticated(&server).await;
        bmc.activate_capping().await.unwrap();
    }

    #[tokio::test]
    async fn activate_capping_propagates_other_failures() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/Chassis/Motherboard/Power/Actions/LimitTrigger"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let bmc = authenticated(&server).await;
        assert!(bmc.activate_capping().await.is_err());
    }
}
