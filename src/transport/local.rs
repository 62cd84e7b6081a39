//! In-process transport for `local://<agentId>` addresses.

use std::sync::Weak;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Address, Receiver, Transport, LOCAL_SCHEME};
use crate::{RpcError, RpcResult};

/// Every send is handed to the receiver on its own task, so a sender never
/// runs the recipient's code on its own stack.
pub struct LocalTransport {
    receiver: Weak<dyn Receiver>,
}

impl LocalTransport {
    pub fn new(receiver: Weak<dyn Receiver>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, address: &Address, payload: &str, tag: &str) -> RpcResult<()> {
        let receiver = self.receiver.upgrade().ok_or_else(|| {
            RpcError::Transport("local receiver has been shut down".to_string())
        })?;
        if address.path().is_empty() {
            return Err(RpcError::Transport(format!(
                "local address '{}' names no agent",
                address
            )));
        }
        debug!("local delivery to {}", address);
        let recipient = address.clone();
        let payload = payload.to_string();
        let tag = tag.to_string();
        tokio::spawn(async move {
            receiver.receive(recipient, payload, tag).await;
        });
        Ok(())
    }

    fn protocols(&self) -> Vec<String> {
        vec![LOCAL_SCHEME.to_string()]
    }

    fn address(&self) -> Option<Address> {
        None
    }

    async fn disconnect(&self) -> RpcResult<()> {
        if self.receiver.strong_count() == 0 {
            warn!("local transport disconnected after its receiver was dropped");
        }
        Ok(())
    }

    fn describe(&self) -> Value {
        json!({ "protocols": self.protocols(), "kind": "in-process" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct ChannelReceiver {
        tx: mpsc::UnboundedSender<(Address, String, String)>,
    }

    #[async_trait]
    impl Receiver for ChannelReceiver {
        async fn receive(&self, recipient: Address, payload: String, tag: String) {
            let _ = self.tx.send((recipient, payload, tag));
        }
    }

    #[tokio::test]
    async fn test_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let receiver: Arc<dyn Receiver> = Arc::new(ChannelReceiver { tx });
        let transport = LocalTransport::new(Arc::downgrade(&receiver));

        transport
            .send(&Address::local("bob"), "{\"x\":1}", "local://alice")
            .await
            .unwrap();

        let (recipient, payload, tag) = rx.recv().await.unwrap();
        assert_eq!(recipient, Address::local("bob"));
        assert_eq!(payload, "{\"x\":1}");
        assert_eq!(tag, "local://alice");
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_a_transport_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let receiver: Arc<dyn Receiver> = Arc::new(ChannelReceiver { tx });
        let transport = LocalTransport::new(Arc::downgrade(&receiver));
        drop(receiver);

        let result = transport.send(&Address::local("bob"), "{}", "").await;
        assert!(matches!(result, Err(RpcError::Transport(_))));
    }
}
