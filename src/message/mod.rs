//! # Messages
//!
//! Transport-agnostic request, response and error values. The wire form is
//! JSON-RPC 2.0 shaped:
//!
//! ```text
//! Request  { "jsonrpc": "2.0", "id"?: string, "method": string, "params": object }
//! Response { "jsonrpc": "2.0", "id": string | null, "result": any }
//!        | { "jsonrpc": "2.0", "id": string | null, "error": { "code", "message" } }
//! ```
//!
//! A request without an id is a notification: no reply is expected and no
//! pending entry is ever created for it.
//!
//! Construction validates the same invariants as decoding, so a `Request`
//! or `Response` value is always well formed.

pub mod schema;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{RpcError, RpcResult};

pub use schema::{AccessLevel, MethodSchema, MethodTable, ParamKind, ParamSpec};

pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation token linking a request to its response.
pub type CorrelationId = String;

/// Named parameters, in insertion order.
pub type Params = serde_json::Map<String, Value>;

pub fn new_correlation_id() -> CorrelationId {
    Uuid::new_v4().to_string()
}

/// Converts an arbitrary JSON value into a params object. `null` becomes an
/// empty object; anything other than an object is rejected.
pub fn into_params(value: Value) -> RpcResult<Params> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Params::new()),
        other => Err(RpcError::InvalidParams(format!(
            "params must be an object, got {}",
            json_kind(&other)
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Typed access to named parameters.
pub trait ParamsExt {
    fn required_str(&self, name: &str) -> RpcResult<&str>;
    fn optional_str(&self, name: &str) -> RpcResult<Option<&str>>;
    fn optional_object(&self, name: &str) -> RpcResult<Option<&Params>>;
}

impl ParamsExt for Params {
    fn required_str(&self, name: &str) -> RpcResult<&str> {
        self.optional_str(name)?
            .ok_or_else(|| RpcError::InvalidParams(format!("missing required param '{}'", name)))
    }

    fn optional_str(&self, name: &str) -> RpcResult<Option<&str>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(RpcError::InvalidParams(format!(
                "param '{}' must be a string, got {}",
                name,
                json_kind(other)
            ))),
        }
    }

    fn optional_object(&self, name: &str) -> RpcResult<Option<&Params>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(RpcError::InvalidParams(format!(
                "param '{}' must be an object, got {}",
                name,
                json_kind(other)
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRequest", into = "RawRequest")]
pub struct Request {
    id: Option<CorrelationId>,
    method: String,
    params: Params,
}

impl Request {
    /// Builds a request. A missing or empty method is rejected with
    /// `InvalidRequest`.
    pub fn new(id: Option<CorrelationId>, method: impl Into<String>, params: Params) -> RpcResult<Self> {
        let method = method.into();
        if method.trim().is_empty() {
            return Err(RpcError::InvalidRequest(
                "Member 'method' missing in request".to_string(),
            ));
        }
        Ok(Self { id, method, params })
    }

    /// A request carrying a freshly generated correlation id.
    pub fn call(method: impl Into<String>, params: Params) -> RpcResult<Self> {
        Self::new(Some(new_correlation_id()), method, params)
    }

    pub fn notification(method: impl Into<String>, params: Params) -> RpcResult<Self> {
        Self::new(None, method, params)
    }

    /// Replaces the correlation id; `None` turns the request into a notification.
    pub fn with_id(mut self, id: Option<CorrelationId>) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn into_params(self) -> Params {
        self.params
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn put_param(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn remove_param(&mut self, name: &str) -> Option<Value> {
        self.params.remove(name)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn encode(&self) -> RpcResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> RpcResult<Self> {
        serde_json::from_str(payload).map_err(|e| RpcError::InvalidRequest(e.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct RawRequest {
    #[serde(default = "default_version")]
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<CorrelationId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl TryFrom<RawRequest> for Request {
    type Error = RpcError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        let method = raw.method.ok_or_else(|| {
            RpcError::InvalidRequest("Member 'method' missing in request".to_string())
        })?;
        let params = into_params(raw.params)
            .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
        Request::new(raw.id, method, params)
    }
}

impl From<Request> for RawRequest {
    fn from(request: Request) -> Self {
        RawRequest {
            jsonrpc: default_version(),
            id: request.id,
            method: Some(request.method),
            params: Value::Object(request.params),
        }
    }
}

/// Reply to a [`Request`]. Exactly one of result or error is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResponse", into = "RawResponse")]
pub struct Response {
    id: Option<CorrelationId>,
    outcome: Result<Value, ErrorObject>,
}

impl Response {
    pub fn success(id: Option<CorrelationId>, result: Value) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    pub fn failure(id: Option<CorrelationId>, error: ErrorObject) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }

    pub fn from_result(id: Option<CorrelationId>, result: RpcResult<Value>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::failure(id, e.to_error_object()),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn result(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ErrorObject> {
        self.outcome.as_ref().err()
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Error responses become [`RpcError::Remote`].
    pub fn into_result(self) -> RpcResult<Value> {
        self.outcome.map_err(RpcError::from)
    }

    pub fn encode(&self) -> RpcResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> RpcResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[derive(Serialize, Deserialize)]
struct RawResponse {
    #[serde(default = "default_version")]
    jsonrpc: String,
    #[serde(default)]
    id: Option<CorrelationId>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject>,
}

/// Distinguishes `"result": null` (present) from a missing member.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawResponse> for Response {
    type Error = RpcError;

    fn try_from(raw: RawResponse) -> Result<Self, Self::Error> {
        let outcome = match (raw.result, raw.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(error),
            (Some(_), Some(_)) => {
                return Err(RpcError::InvalidRequest(
                    "response carries both result and error".to_string(),
                ))
            }
            (None, None) => {
                return Err(RpcError::InvalidRequest(
                    "response carries neither result nor error".to_string(),
                ))
            }
        };
        Ok(Response {
            id: raw.id,
            outcome,
        })
    }
}

impl From<Response> for RawResponse {
    fn from(response: Response) -> Self {
        let (result, error) = match response.outcome {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error)),
        };
        RawResponse {
            jsonrpc: default_version(),
            id: response.id,
            result,
            error,
        }
    }
}

/// Anything that can arrive on a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn decode(payload: &str) -> RpcResult<Self> {
        let value: Value = serde_json::from_str(payload)?;
        if value.get("method").is_some() {
            let request = serde_json::from_value(value)
                .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
            Ok(Message::Request(request))
        } else {
            let response = serde_json::from_value(value)
                .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
            Ok(Message::Response(response))
        }
    }

    pub fn encode(&self) -> RpcResult<String> {
        match self {
            Message::Request(request) => request.encode(),
            Message::Response(response) => response.encode(),
        }
    }
}
