//! Router-scoped request plumbing and response payloads.
//!
//! Capability and parameter objects (`rtpCapabilities`, `dtlsParameters`,
//! ...) are opaque to the signaling server and kept as JSON values.

use crate::errors::SsError;
use crate::rpc::RpcConnection;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

/// A connection plus the router id every message on it is scoped to.
#[derive(Debug, Clone)]
pub struct RouterChannel {
    router_id: String,
    connection: RpcConnection,
}

impl RouterChannel {
    pub(crate) fn new(router_id: String, connection: RpcConnection) -> Self {
        Self {
            router_id,
            connection,
        }
    }

    #[must_use]
    pub fn router_id(&self) -> &str {
        &self.router_id
    }

    #[must_use]
    pub fn connection(&self) -> &RpcConnection {
        &self.connection
    }

    /// Notify with `routerId` added to the payload.
    pub fn notify(&self, method: &str, data: Value) {
        self.connection
            .notify(method, with_router_id(&self.router_id, data));
    }

    /// Request with `routerId` added to the payload, decoding the response.
    ///
    /// # Errors
    ///
    /// Propagates the connection error, or `SsError::InvalidResponse` if the
    /// response does not decode as `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        data: Value,
    ) -> Result<T, SsError> {
        let response = self
            .connection
            .request(method, with_router_id(&self.router_id, data))
            .await?;
        decode(method, response)
    }
}

/// Decode a response payload.
///
/// # Errors
///
/// Returns `SsError::InvalidResponse` naming the method on mismatch.
pub fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, SsError> {
    serde_json::from_value(value).map_err(|e| SsError::InvalidResponse(format!("{method}: {e}")))
}

fn with_router_id(router_id: &str, data: Value) -> Value {
    match data {
        Value::Object(mut map) => {
            map.insert("routerId".to_string(), Value::String(router_id.to_string()));
            Value::Object(map)
        }
        _ => json!({ "routerId": router_id }),
    }
}

/// `getRouter` response and `newRouter` notification payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterDescriptor {
    pub id: String,
    #[serde(default)]
    pub rtp_capabilities: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcTransportCreated {
    pub id: String,
    #[serde(default)]
    pub ice_parameters: Value,
    #[serde(default)]
    pub ice_candidates: Value,
    #[serde(default)]
    pub dtls_parameters: Value,
    #[serde(default)]
    pub sctp_parameters: Option<Value>,
}

/// `createPipeTransport` response: the local tuple the peer connects to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipeTransportCreated {
    pub id: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub srtp_parameters: Option<Value>,
}

/// Response carrying only the created entity id.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityCreated {
    pub id: String,
}

/// `consume` / `createPipeConsumer` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerCreated {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub rtp_parameters: Value,
    #[serde(default)]
    pub producer_paused: bool,
}

/// `produceData` / `consumeData` / `createPipeDataConsumer` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEntityCreated {
    pub id: String,
    #[serde(default)]
    pub sctp_stream_parameters: Value,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub protocol: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanConsumeResult {
    pub can_consume: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceRestarted {
    pub ice_parameters: Value,
}
