// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Client-daemon protocol over a Unix domain socket.
//!
//! Each connection carries exactly one JSON request object and one JSON
//! response object, after which the daemon closes the socket. Requests name
//! an `action` from a fixed allow-list; anything else is rejected before it
//! gets near the hardware.

use crate::mode::PowerMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Largest request the daemon will read.
pub const MAX_REQUEST_SIZE: usize = 4096;

/// Error message for a mutation without a valid session token.
pub const AUTH_REQUIRED: &str = "Authentication required";

// ---------------------------------------------------------------------------
// Requests (client -> daemon)
// ---------------------------------------------------------------------------

/// Every action the daemon is willing to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Authenticate,
    GetStatus,
    GetTemps,
    GetFans,
    GetPowerMode,
    GetAllData,
    SetPowerMode,
    SetFanBoost,
    ToggleGMode,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::Authenticate,
        Action::GetStatus,
        Action::GetTemps,
        Action::GetFans,
        Action::GetPowerMode,
        Action::GetAllData,
        Action::SetPowerMode,
        Action::SetFanBoost,
        Action::ToggleGMode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::Authenticate => "authenticate",
            Action::GetStatus => "get_status",
            Action::GetTemps => "get_temps",
            Action::GetFans => "get_fans",
            Action::GetPowerMode => "get_power_mode",
            Action::GetAllData => "get_all_data",
            Action::SetPowerMode => "set_power_mode",
            Action::SetFanBoost => "set_fan_boost",
            Action::ToggleGMode => "toggle_g_mode",
        }
    }

    /// Look up an action by wire name. This is the allow-list.
    pub fn from_name(name: &str) -> Option<Action> {
        Action::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Actions that write to hardware or persisted state.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Action::SetPowerMode | Action::SetFanBoost | Action::ToggleGMode
        )
    }
}

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Authenticate,
    GetStatus,
    GetTemps,
    GetFans,
    GetPowerMode,
    GetAllData,
    SetPowerMode { mode: PowerMode },
    /// Range checks happen in the controller; here both are only known to be integers.
    SetFanBoost { fan_id: i64, percentage: i64 },
    ToggleGMode,
}

impl Request {
    pub fn action(&self) -> Action {
        match self {
            Request::Authenticate => Action::Authenticate,
            Request::GetStatus => Action::GetStatus,
            Request::GetTemps => Action::GetTemps,
            Request::GetFans => Action::GetFans,
            Request::GetPowerMode => Action::GetPowerMode,
            Request::GetAllData => Action::GetAllData,
            Request::SetPowerMode { .. } => Action::SetPowerMode,
            Request::SetFanBoost { .. } => Action::SetFanBoost,
            Request::ToggleGMode => Action::ToggleGMode,
        }
    }
}

/// A request together with the session token it carried, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub request: Request,
    pub token: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Request validation failed")]
    MissingAction,

    #[error("Unauthorized action")]
    UnauthorizedAction(String),

    #[error("Invalid power mode")]
    InvalidPowerMode,

    #[error("Invalid parameters")]
    InvalidParameters,
}

/// Parse the raw bytes of a request into a JSON object.
pub fn decode(bytes: &[u8]) -> Result<Map<String, Value>, ProtocolError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err(ProtocolError::MissingAction),
        Err(_) => Err(ProtocolError::InvalidJson),
    }
}

impl Envelope {
    /// Route a decoded request object through the allow-list and check its parameters.
    pub fn from_object(obj: &Map<String, Value>) -> Result<Envelope, ProtocolError> {
        let name = obj
            .get("action")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingAction)?;
        let action = Action::from_name(name)
            .ok_or_else(|| ProtocolError::UnauthorizedAction(name.to_string()))?;

        let request = match action {
            Action::Authenticate => Request::Authenticate,
            Action::GetStatus => Request::GetStatus,
            Action::GetTemps => Request::GetTemps,
            Action::GetFans => Request::GetFans,
            Action::GetPowerMode => Request::GetPowerMode,
            Action::GetAllData => Request::GetAllData,
            Action::ToggleGMode => Request::ToggleGMode,
            Action::SetPowerMode => {
                let mode = obj
                    .get("mode")
                    .and_then(Value::as_str)
                    .and_then(|m| m.parse::<PowerMode>().ok())
                    .ok_or(ProtocolError::InvalidPowerMode)?;
                Request::SetPowerMode { mode }
            }
            Action::SetFanBoost => {
                let int_field = |key: &str| obj.get(key).and_then(Value::as_i64);
                match (int_field("fan_id"), int_field("percentage")) {
                    (Some(fan_id), Some(percentage)) => Request::SetFanBoost { fan_id, percentage },
                    _ => return Err(ProtocolError::InvalidParameters),
                }
            }
        };

        let token = obj.get("token").and_then(Value::as_str).map(str::to_string);
        Ok(Envelope { request, token })
    }

    /// Wire form of this request, as a client sends it.
    pub fn to_json(&self) -> Value {
        let mut value = json!({ "action": self.request.action().name() });
        match &self.request {
            Request::SetPowerMode { mode } => {
                value["mode"] = json!(mode.label());
            }
            Request::SetFanBoost { fan_id, percentage } => {
                value["fan_id"] = json!(fan_id);
                value["percentage"] = json!(percentage);
            }
            _ => {}
        }
        if let Some(token) = &self.token {
            value["token"] = json!(token);
        }
        value
    }
}

// ---------------------------------------------------------------------------
// Responses (daemon -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// The only shape the daemon ever answers with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: Status::Success,
            data: None,
            message: None,
            token: None,
        }
    }

    pub fn with_data<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                data: Some(value),
                ..Self::ok()
            },
            Err(e) => {
                log::error!("Failed to serialize response data: {e}");
                Self::internal_error()
            }
        }
    }

    pub fn with_token(token: String) -> Self {
        Self {
            token: Some(token),
            ..Self::ok()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: None,
            message: Some(message.into()),
            token: None,
        }
    }

    /// Deliberately vague: hardware diagnostics stay in the daemon log.
    pub fn internal_error() -> Self {
        Self::error("Internal server error")
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Deserialize `data` into a typed payload.
    pub fn data_as<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        self.data
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

impl From<ProtocolError> for Response {
    fn from(e: ProtocolError) -> Self {
        Response::error(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusData {
    pub model: String,
    pub hwmon_available: bool,
    pub g_mode_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempsData {
    pub cpu_temp: u32,
    pub gpu_temp: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FansData {
    pub fan1_rpm: u32,
    pub fan2_rpm: u32,
    pub fan1_boost: u8,
    pub fan2_boost: u8,
    pub fan1_manual: bool,
    pub fan2_manual: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerData {
    pub current_mode: PowerMode,
    pub g_mode: bool,
}

/// Everything a client polls for, in one round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllData {
    pub temps: TempsData,
    pub fans: FansData,
    pub power: PowerData,
    pub status: StatusData,
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Encode a message as a JSON string.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Envelope, ProtocolError> {
        Envelope::from_object(&decode(s.as_bytes())?)
    }

    #[test]
    fn test_allow_list_round_trips_names() {
        for action in Action::ALL {
            assert_eq!(Action::from_name(action.name()), Some(action));
        }
        assert_eq!(Action::from_name("drop_table"), None);
        assert_eq!(Action::from_name("GET_STATUS"), None);
    }

    #[test]
    fn test_parse_simple_actions() {
        assert_eq!(parse(r#"{"action": "get_all_data"}"#).unwrap().request, Request::GetAllData);
        let env = parse(r#"{"action": "toggle_g_mode", "token": "abc"}"#).unwrap();
        assert_eq!(env.request, Request::ToggleGMode);
        assert_eq!(env.token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("{not json").unwrap_err(), ProtocolError::InvalidJson);
        assert_eq!(parse(r#"{"mode": "Quiet"}"#).unwrap_err(), ProtocolError::MissingAction);
        assert_eq!(parse(r#""get_status""#).unwrap_err(), ProtocolError::MissingAction);
        assert_eq!(
            parse(r#"{"action": "drop_table"}"#).unwrap_err(),
            ProtocolError::UnauthorizedAction("drop_table".to_string())
        );
        assert_eq!(
            parse(r#"{"action": "set_power_mode", "mode": "Turbo"}"#).unwrap_err(),
            ProtocolError::InvalidPowerMode
        );
        assert_eq!(
            parse(r#"{"action": "set_fan_boost", "fan_id": "1", "percentage": 40}"#).unwrap_err(),
            ProtocolError::InvalidParameters
        );
        assert_eq!(
            parse(r#"{"action": "set_fan_boost", "fan_id": 1, "percentage": 40.5}"#).unwrap_err(),
            ProtocolError::InvalidParameters
        );
        assert_eq!(
            parse(r#"{"action": "set_fan_boost", "fan_id": 1}"#).unwrap_err(),
            ProtocolError::InvalidParameters
        );
    }

    #[test]
    fn test_out_of_range_integers_still_parse() {
        let env = parse(r#"{"action": "set_fan_boost", "fan_id": 7, "percentage": -3}"#).unwrap();
        assert_eq!(env.request, Request::SetFanBoost { fan_id: 7, percentage: -3 });
    }

    #[test]
    fn test_client_encoding_matches_parser() {
        let env = Envelope {
            request: Request::SetPowerMode { mode: PowerMode::Quiet },
            token: Some("t0k3n".to_string()),
        };
        let wire = env.to_json();
        assert_eq!(wire["action"], "set_power_mode");
        assert_eq!(wire["mode"], "Quiet");
        assert_eq!(Envelope::from_object(wire.as_object().unwrap()).unwrap(), env);
    }

    #[test]
    fn test_response_shape() {
        let ok = encode(&Response::ok()).unwrap();
        assert_eq!(ok, r#"{"status":"success"}"#);

        let err = encode(&Response::from(ProtocolError::UnauthorizedAction("x".into()))).unwrap();
        assert_eq!(err, r#"{"status":"error","message":"Unauthorized action"}"#);

        let token = encode(&Response::with_token("ab".into())).unwrap();
        assert_eq!(token, r#"{"status":"success","token":"ab"}"#);
    }

    #[test]
    fn test_typed_payload_round_trip() {
        let resp = Response::with_data(&PowerData {
            current_mode: PowerMode::Custom,
            g_mode: true,
        });
        assert_eq!(resp.data.as_ref().unwrap()["current_mode"], "Custom");
        let back: PowerData = resp.data_as().unwrap();
        assert!(back.g_mode);
    }
}
