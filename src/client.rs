//! Blocking HTTP client for the EMS-ESP gateway REST endpoints used by the console.
//!
//! - `ureq` agent, no async, no retries.
//! - JSON bodies everywhere except `deviceEntities`, which answers in MessagePack.
//! - Read endpoints work without a token; writes need the gateway's bearer access token.
//!
//! Sessions depend on the [`Gateway`] trait, not on this client, so they can be driven
//! by an in-memory gateway in tests.

use http::StatusCode;
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::models::ems::*;

const REBOOT_REQUIRED: &str = "Reboot required";

#[derive(Debug)]
pub enum GatewayError {
    MissingAuth,
    Transport(String),
    Http { status: u16, message: String },
    /// The gateway accepted the request and must restart to apply it.
    RebootRequired,
    Decode(String),
}

impl core::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GatewayError::MissingAuth => write!(f, "missing access token for authenticated endpoint"),
            GatewayError::Transport(s) => write!(f, "transport error: {}", s),
            GatewayError::Http { status, message } => write!(f, "http {}: {}", status, message),
            GatewayError::RebootRequired => write!(f, "gateway restart required to apply the change"),
            GatewayError::Decode(s) => write!(f, "decode error: {}", s),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<ureq::Error> for GatewayError {
    fn from(value: ureq::Error) -> Self {
        GatewayError::Transport(value.to_string())
    }
}

impl From<rmp_serde::decode::Error> for GatewayError {
    fn from(value: rmp_serde::decode::Error) -> Self {
        GatewayError::Decode(value.to_string())
    }
}

/// Operations the console needs from the gateway.
pub trait Gateway {
    fn core_data(&self) -> Result<CoreData, GatewayError>;
    fn device_entities(&self, device: DeviceId) -> Result<Vec<DeviceEntity>, GatewayError>;
    /// `entity_ids` are customization tokens; the list replaces nothing the tokens don't name.
    fn save_customization(&self, request: &CustomizationRequest) -> Result<(), GatewayError>;
    fn reset_customizations(&self) -> Result<(), GatewayError>;
    fn schedule(&self) -> Result<Vec<ScheduleItem>, GatewayError>;
    fn save_schedule(&self, items: &[ScheduleItem]) -> Result<(), GatewayError>;
    fn custom_entities(&self) -> Result<Vec<EntityItem>, GatewayError>;
    fn save_custom_entities(&self, items: &[EntityItem]) -> Result<(), GatewayError>;
    fn modules(&self) -> Result<Vec<ModuleItem>, GatewayError>;
    fn save_module(&self, update: &ModuleUpdate) -> Result<(), GatewayError>;
}

pub struct GatewayClient {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
}

type Response = http::Response<ureq::Body>;

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        GatewayClient {
            agent,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn bearer(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, GatewayError> {
        let mut req = self.agent.get(&self.url(path)).header("Accept", "application/json");
        for (k, v) in query {
            req = req.query(*k, v);
        }
        if let Some(bearer) = self.bearer() {
            req = req.header("Authorization", &bearer);
        }
        check_status(req.call()?)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, GatewayError> {
        let mut res = self.get(path, query)?;
        let body = res.body_mut().read_to_string()?;
        decode_json(&body)
    }

    fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), GatewayError> {
        let bearer = self.bearer().ok_or(GatewayError::MissingAuth)?;
        let res = self
            .agent
            .post(&self.url(path))
            .header("Accept", "application/json")
            .header("Authorization", &bearer)
            .send_json(body)?;
        check_status(res).map(|_| ())
    }

    fn post_empty(&self, path: &str) -> Result<(), GatewayError> {
        let bearer = self.bearer().ok_or(GatewayError::MissingAuth)?;
        let res = self
            .agent
            .post(&self.url(path))
            .header("Authorization", &bearer)
            .send_empty()?;
        check_status(res).map(|_| ())
    }
}

/// Map everything but a plain success onto an error. A 205 or a `Reboot required` body is
/// the gateway accepting a change that needs a restart.
fn check_status(mut res: Response) -> Result<Response, GatewayError> {
    let status = res.status();
    if status == StatusCode::RESET_CONTENT {
        return Err(GatewayError::RebootRequired);
    }
    if status.is_success() {
        return Ok(res);
    }
    let body = res
        .body_mut()
        .read_to_string()
        .unwrap_or_else(|_| String::from("<no body>"));
    if body.trim().eq_ignore_ascii_case(REBOOT_REQUIRED) {
        return Err(GatewayError::RebootRequired);
    }
    Err(GatewayError::Http {
        status: status.as_u16(),
        message: body,
    })
}

/// JSON decode with the failing path in the message, e.g. `schedule[3].flags`.
pub fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, GatewayError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| GatewayError::Decode(format!("{} at {}", e.inner(), e.path())))
}

/// An empty MessagePack body is an empty list.
pub fn decode_entities(bytes: &[u8]) -> Result<Vec<DeviceEntity>, GatewayError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(rmp_serde::from_slice(bytes)?)
}

impl Gateway for GatewayClient {
    fn core_data(&self) -> Result<CoreData, GatewayError> {
        self.get_json("/rest/coreData", &[])
    }

    fn device_entities(&self, device: DeviceId) -> Result<Vec<DeviceEntity>, GatewayError> {
        let mut res = self.get("/rest/deviceEntities", &[("id", device.0.to_string())])?;
        let bytes = res.body_mut().read_to_vec()?;
        debug!("deviceEntities id={} -> {} bytes", device.0, bytes.len());
        decode_entities(&bytes)
    }

    fn save_customization(&self, request: &CustomizationRequest) -> Result<(), GatewayError> {
        self.post_json("/rest/customizationEntities", request)
    }

    fn reset_customizations(&self) -> Result<(), GatewayError> {
        self.post_empty("/rest/resetCustomizations")
    }

    fn schedule(&self) -> Result<Vec<ScheduleItem>, GatewayError> {
        let s: Schedule = self.get_json("/rest/schedule", &[])?;
        Ok(s.schedule)
    }

    fn save_schedule(&self, items: &[ScheduleItem]) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        struct Body<'a> {
            schedule: &'a [ScheduleItem],
        }
        self.post_json("/rest/schedule", &Body { schedule: items })
    }

    fn custom_entities(&self) -> Result<Vec<EntityItem>, GatewayError> {
        let e: Entities = self.get_json("/rest/customEntities", &[])?;
        Ok(e.entities)
    }

    fn save_custom_entities(&self, items: &[EntityItem]) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        struct Body<'a> {
            entities: &'a [EntityItem],
        }
        self.post_json("/rest/customEntities", &Body { entities: items })
    }

    fn modules(&self) -> Result<Vec<ModuleItem>, GatewayError> {
        let m: Modules = self.get_json("/rest/modules", &[])?;
        Ok(m.modules)
    }

    fn save_module(&self, update: &ModuleUpdate) -> Result<(), GatewayError> {
        self.post_json("/rest/modules", update)
    }
}
