//! JSON-RPC 2.0 envelope types (§6.1): request/response/batch framing and
//! the standard + orchestrator-specific error taxonomy (§7).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::OrchestratorError;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications — a request with no `id` gets no response.
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub outcome: JsonRpcOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcOutcome {
    Result { result: Value },
    Error { error: JsonRpcError },
}

impl JsonRpcResponse {
    pub fn ok(id: Option<RequestId>, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, id, outcome: JsonRpcOutcome::Result { result } }
    }

    pub fn err(id: Option<RequestId>, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: JsonRpcOutcome::Error { error: JsonRpcError { code, message: message.into(), data } },
        }
    }

    pub fn invalid_request(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self::err(id, -32600, reason, None)
    }

    pub fn method_not_found(id: Option<RequestId>, method: &str) -> Self {
        Self::err(id, -32601, format!("method not found: {method}"), None)
    }

    pub fn invalid_params(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self::err(id, -32602, reason, None)
    }

    pub fn from_orchestrator_error(id: Option<RequestId>, error: &OrchestratorError) -> Self {
        let rpc_code = error.rpc_code();
        Self::err(id, rpc_code.code, error.to_string(), Some(serde_json::json!({ "name": rpc_code.name })))
    }
}

/// Accepts either a single request or a JSON-RPC batch array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcEnvelope {
    Single(JsonRpcRequest),
    Batch(Vec<JsonRpcRequest>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_request_deserializes() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"status","params":{}}"#;
        let envelope: JsonRpcEnvelope = serde_json::from_str(raw).unwrap();
        assert!(matches!(envelope, JsonRpcEnvelope::Single(_)));
    }

    #[test]
    fn batch_request_deserializes() {
        let raw = r#"[{"jsonrpc":"2.0","id":1,"method":"status","params":{}},{"jsonrpc":"2.0","id":2,"method":"status","params":{}}]"#;
        let envelope: JsonRpcEnvelope = serde_json::from_str(raw).unwrap();
        match envelope {
            JsonRpcEnvelope::Batch(reqs) => assert_eq!(reqs.len(), 2),
            _ => panic!("expected batch"),
        }
    }

    #[test]
    fn notification_has_no_id() {
        let raw = r#"{"jsonrpc":"2.0","method":"status","params":{}}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert!(req.id.is_none());
    }

    #[test]
    fn error_response_serializes_without_data_field() {
        let resp = JsonRpcResponse::method_not_found(Some(RequestId::Number(1)), "nope");
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["error"].get("data").is_none());
    }
}
