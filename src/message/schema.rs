//! Statically declared method signatures.
//!
//! Each callable method declares an ordered list of named parameters, an
//! access level and optionally the event whose occurrence changes its
//! result. Tables are built once when an agent is registered and are read
//! without locking afterwards.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use super::{json_kind, Params};
use crate::{RpcError, RpcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
            ParamKind::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "camelCase")]
pub enum AccessLevel {
    /// Anyone may call.
    #[default]
    Public,
    /// Allowed when the agent's access hook approves the sender.
    Private,
    /// Only the agent itself (its own address) may call.
    SelfOnly,
    /// Never callable over RPC.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSchema {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub access: AccessLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggering_event: Option<String>,
}

impl MethodSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            access: AccessLevel::default(),
            triggering_event: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            required: true,
            kind,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            required: false,
            kind,
        });
        self
    }

    pub fn access(mut self, access: AccessLevel) -> Self {
        self.access = access;
        self
    }

    /// Names the event after which this method's result is expected to change.
    pub fn triggered_by(mut self, event: impl Into<String>) -> Self {
        self.triggering_event = Some(event.into());
        self
    }

    /// Checks required members and declared kinds. Undeclared members are
    /// passed through untouched; a `null` optional counts as absent.
    pub fn validate(&self, params: &Params) -> RpcResult<()> {
        for spec in &self.params {
            match params.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(RpcError::InvalidParams(format!(
                        "Required parameter '{}' of method '{}' is missing",
                        spec.name, self.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(RpcError::InvalidParams(format!(
                        "Parameter '{}' of method '{}' must be {}, got {}",
                        spec.name,
                        self.name,
                        spec.kind,
                        json_kind(value)
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Builds a params object from positional arguments. `None` (or a
    /// missing trailing argument) leaves an optional parameter out.
    pub fn build_params(&self, args: Vec<Option<Value>>) -> RpcResult<Params> {
        if args.len() > self.params.len() {
            return Err(RpcError::InvalidParams(format!(
                "Method '{}' takes {} parameters, got {}",
                self.name,
                self.params.len(),
                args.len()
            )));
        }
        let mut params = Params::new();
        let mut args = args.into_iter();
        for spec in &self.params {
            match args.next().flatten() {
                Some(Value::Null) | None => {
                    if spec.required {
                        return Err(RpcError::InvalidParams(format!(
                            "Required parameter '{}' in method '{}' is null",
                            spec.name, self.name
                        )));
                    }
                }
                Some(value) => {
                    params.insert(spec.name.clone(), value);
                }
            }
        }
        self.validate(&params)?;
        Ok(params)
    }
}

/// Method name → schema.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodSchema>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations for the same name replace earlier ones.
    pub fn register(&mut self, schema: MethodSchema) {
        self.methods.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, method: &str) -> Option<&MethodSchema> {
        self.methods.get(method)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn access(&self, method: &str) -> Option<AccessLevel> {
        self.get(method).map(|schema| schema.access)
    }

    pub fn triggering_event(&self, method: &str) -> Option<&str> {
        self.get(method)
            .and_then(|schema| schema.triggering_event.as_deref())
    }

    /// Callable schemas sorted by name; unavailable methods are hidden.
    pub fn list(&self) -> Vec<&MethodSchema> {
        let mut schemas: Vec<_> = self
            .methods
            .values()
            .filter(|schema| schema.access != AccessLevel::Unavailable)
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl FromIterator<MethodSchema> for MethodTable {
    fn from_iter<I: IntoIterator<Item = MethodSchema>>(iter: I) -> Self {
        let mut table = MethodTable::new();
        for schema in iter {
            table.register(schema);
        }
        table
    }
}
