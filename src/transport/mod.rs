//! # Transports
//!
//! A transport moves an encoded message to an address and hands inbound
//! messages to a [`Receiver`]. The core never looks inside a transport; it
//! only picks one by the scheme of the destination address (see
//! [`router::Router`]).
//!
//! The `tag` travelling with every payload carries the sender's reply
//! address. Receivers use it to route a response back, and to tell callees
//! who is calling.

pub mod local;
pub mod router;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{RpcError, RpcResult};

pub use local::LocalTransport;
pub use router::Router;

pub const LOCAL_SCHEME: &str = "local";

/// URI-like destination, `scheme://rest`. The scheme is stored lowercase,
/// so addresses compare equal whatever case they were written in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: impl Into<String>) -> RpcResult<Self> {
        let raw = raw.into();
        match raw.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() => {
                Ok(Self(format!("{}://{}", scheme.to_lowercase(), rest)))
            }
            _ => Err(RpcError::InvalidParams(format!(
                "address '{}' has no scheme",
                raw
            ))),
        }
    }

    /// `local://<agentId>`
    pub fn local(agent_id: &str) -> Self {
        Self(format!("{}://{}", LOCAL_SCHEME, agent_id))
    }

    pub fn scheme(&self) -> &str {
        self.0
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .unwrap_or_default()
    }

    /// Everything after `://`.
    pub fn path(&self) -> &str {
        self.0
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = RpcError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Address::parse(raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl std::str::FromStr for Address {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `payload` to `address`. `tag` is the sender's reply address.
    async fn send(&self, address: &Address, payload: &str, tag: &str) -> RpcResult<()>;

    /// Schemes this transport serves, lowercase.
    fn protocols(&self) -> Vec<String>;

    /// Externally reachable address of this transport, if any.
    fn address(&self) -> Option<Address>;

    async fn connect(&self) -> RpcResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> RpcResult<()> {
        Ok(())
    }

    /// Configuration snapshot for diagnostics.
    fn describe(&self) -> Value {
        serde_json::json!({ "protocols": self.protocols() })
    }
}

/// Inbound side of a transport.
#[async_trait]
pub trait Receiver: Send + Sync {
    /// `recipient` is the address the payload was sent to, `tag` the
    /// sender's reply address (empty when unknown).
    async fn receive(&self, recipient: Address, payload: String, tag: String);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_lowercased() {
        let address = Address::parse("HTTP://example.com/agents/a").unwrap();
        assert_eq!(address.scheme(), "http");
        assert_eq!(address.path(), "example.com/agents/a");
    }

    #[test]
    fn test_scheme_case_does_not_change_identity() {
        let shouting = Address::parse("LOCAL://display").unwrap();
        assert_eq!(shouting, Address::local("display"));
        assert_eq!(shouting.as_str(), "local://display");

        let mixed = Address::parse("Http://Example.com/Agents/A").unwrap();
        assert_eq!(mixed.as_str(), "http://Example.com/Agents/A");
    }

    #[test]
    fn test_deserialized_address_is_normalized() {
        let address: Address = serde_json::from_str("\"MEM://node1/sensor\"").unwrap();
        assert_eq!(address, Address::parse("mem://node1/sensor").unwrap());
        assert_eq!(serde_json::to_string(&address).unwrap(), "\"mem://node1/sensor\"");

        let invalid: Result<Address, _> = serde_json::from_str("\"sensor\"");
        assert!(invalid.is_err());
    }

    #[test]
    fn test_local_address() {
        let address = Address::local("alice");
        assert_eq!(address.as_str(), "local://alice");
        assert_eq!(address.path(), "alice");
    }

    #[test]
    fn test_address_without_scheme_is_rejected() {
        assert!(Address::parse("alice").is_err());
        assert!(Address::parse("://alice").is_err());
    }
}
