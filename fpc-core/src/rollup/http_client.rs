//! JSON-RPC transport adapter for the rollup node contract.
//!
//! Method names default to the node's public JSON-RPC namespace and can be
//! overridden in config. The primary balance read has no default: unless
//! `balance_method` is configured, it reports `Unsupported` and callers fall
//! back to raw storage reads.
#![forbid(unsafe_code)]

use super::{NodeInfo, RollupError, RollupNode};
use crate::{parse_word_hex, Address};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupRpcConfig {
    pub url: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub balance_method: Option<String>,
    #[serde(default)]
    pub methods: RollupMethodMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupMethodMap {
    #[serde(default = "default_node_info")]
    pub node_info: String,
    #[serde(default = "default_storage_at")]
    pub public_storage_at: String,
    #[serde(default = "default_message_ready")]
    pub message_ready: String,
}

fn default_node_info() -> String {
    "node_getNodeInfo".to_string()
}

fn default_storage_at() -> String {
    "node_getPublicStorageAt".to_string()
}

fn default_message_ready() -> String {
    "node_isL1ToL2MessageSynced".to_string()
}

impl Default for RollupMethodMap {
    fn default() -> Self {
        Self {
            node_info: default_node_info(),
            public_storage_at: default_storage_at(),
            message_ready: default_message_ready(),
        }
    }
}

impl RollupRpcConfig {
    pub fn validate(&self) -> Result<(), RollupError> {
        if self.url.trim().is_empty() {
            return Err(RollupError::Config("rollup.url is empty".to_string()));
        }
        if let Some(m) = self.balance_method.as_deref() {
            if m.trim().is_empty() {
                return Err(RollupError::Config(
                    "rollup.balance_method is set but empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct JsonRpcRollupNode {
    cfg: RollupRpcConfig,
    client: reqwest::Client,
    next_id: AtomicU64,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNodeInfo {
    #[serde(default)]
    node_version: String,
    #[serde(default)]
    l1_chain_id: u64,
    protocol_contract_addresses: RawProtocolAddresses,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProtocolAddresses {
    fee_juice: String,
}

impl JsonRpcRollupNode {
    pub fn new(cfg: RollupRpcConfig) -> Result<Self, RollupError> {
        cfg.validate()?;
        let timeout = Duration::from_millis(cfg.timeout_ms.unwrap_or(10_000));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RollupError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            cfg,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RollupError> {
        let req = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let resp = self
            .client
            .post(&self.cfg.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| RollupError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RollupError::Network(format!("{method}: http status {status}")));
        }
        let body: RpcResponse = resp
            .json()
            .await
            .map_err(|e| RollupError::Malformed(format!("{method}: {e}")))?;
        if let Some(err) = body.error {
            if err.code == METHOD_NOT_FOUND {
                return Err(RollupError::Unsupported(format!("{method}: {}", err.message)));
            }
            return Err(RollupError::Rpc(format!(
                "{method}: code {} {}",
                err.code, err.message
            )));
        }
        body.result
            .ok_or_else(|| RollupError::Malformed(format!("{method}: missing result")))
    }
}

/// Decode a balance value: decimal string, `0x` hex string, or JSON integer.
pub fn parse_balance_value(v: &Value) -> Result<u128, RollupError> {
    match v {
        Value::String(s) if s.starts_with("0x") || s.starts_with("0X") => {
            let word = parse_word_hex(s)
                .map_err(|e| RollupError::Malformed(format!("balance hex: {e}")))?;
            crate::word_to_u128(&word)
                .ok_or_else(|| RollupError::Malformed("balance exceeds u128".to_string()))
        }
        Value::String(s) => s
            .trim()
            .parse::<u128>()
            .map_err(|e| RollupError::Malformed(format!("balance decimal: {e}"))),
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| RollupError::Malformed(format!("balance number: {n}"))),
        other => Err(RollupError::Malformed(format!(
            "unexpected balance value: {other}"
        ))),
    }
}

#[async_trait]
impl RollupNode for JsonRpcRollupNode {
    async fn node_info(&self) -> Result<NodeInfo, RollupError> {
        let v = self.call(&self.cfg.methods.node_info, Value::Array(vec![])).await?;
        let raw: RawNodeInfo =
            serde_json::from_value(v).map_err(|e| RollupError::Malformed(e.to_string()))?;
        let fee_juice_address: Address = raw
            .protocol_contract_addresses
            .fee_juice
            .parse()
            .map_err(|e| RollupError::Malformed(format!("feeJuice address: {e}")))?;
        Ok(NodeInfo {
            fee_juice_address,
            l1_chain_id: raw.l1_chain_id,
            node_version: raw.node_version,
        })
    }

    async fn read_public_balance(
        &self,
        token: &Address,
        owner: &Address,
    ) -> Result<u128, RollupError> {
        let Some(method) = self.cfg.balance_method.as_deref() else {
            return Err(RollupError::Unsupported(
                "no balance_method configured".to_string(),
            ));
        };
        let v = self
            .call(
                method,
                serde_json::json!([token.to_hex(), owner.to_hex()]),
            )
            .await?;
        parse_balance_value(&v)
    }

    async fn public_storage_at(
        &self,
        contract: &Address,
        slot: &[u8; 32],
    ) -> Result<[u8; 32], RollupError> {
        let v = self
            .call(
                &self.cfg.methods.public_storage_at,
                serde_json::json!(["latest", contract.to_hex(), format!("0x{}", hex::encode(slot))]),
            )
            .await?;
        let s = v
            .as_str()
            .ok_or_else(|| RollupError::Malformed(format!("storage word is not a string: {v}")))?;
        parse_word_hex(s).map_err(|e| RollupError::Malformed(format!("storage word: {e}")))
    }

    async fn is_l1_to_l2_message_ready(
        &self,
        message_hash: &[u8; 32],
    ) -> Result<bool, RollupError> {
        let v = self
            .call(
                &self.cfg.methods.message_ready,
                serde_json::json!([format!("0x{}", hex::encode(message_hash))]),
            )
            .await?;
        v.as_bool()
            .ok_or_else(|| RollupError::Malformed(format!("message readiness is not a bool: {v}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_values_decode() {
        assert_eq!(parse_balance_value(&Value::from("42")).unwrap(), 42);
        assert_eq!(parse_balance_value(&Value::from("0x2a")).unwrap(), 42);
        assert_eq!(parse_balance_value(&Value::from(42u64)).unwrap(), 42);
        assert!(matches!(
            parse_balance_value(&Value::from("-1")),
            Err(RollupError::Malformed(_))
        ));
        assert!(matches!(
            parse_balance_value(&Value::Bool(true)),
            Err(RollupError::Malformed(_))
        ));
        let wide = format!("0x01{}", "00".repeat(31));
        assert!(matches!(
            parse_balance_value(&Value::from(wide)),
            Err(RollupError::Malformed(_))
        ));
    }

    #[test]
    fn node_info_decodes_fee_juice_address() {
        let raw: RawNodeInfo = serde_json::from_str(
            r#"{"nodeVersion":"1.2.3","l1ChainId":11155111,
                "protocolContractAddresses":{"feeJuice":"0x05","classRegisterer":"0x03"}}"#,
        )
        .unwrap();
        assert_eq!(raw.l1_chain_id, 11_155_111);
        let a: Address = raw.protocol_contract_addresses.fee_juice.parse().unwrap();
        assert_eq!(a.0[31], 5);
    }

    #[test]
    fn config_defaults_and_validation() {
        let cfg: RollupRpcConfig = serde_json::from_str(r#"{"url":"http://node:8080"}"#).unwrap();
        assert_eq!(cfg.methods.node_info, "node_getNodeInfo");
        assert!(cfg.balance_method.is_none());
        assert!(cfg.validate().is_ok());

        let bad: RollupRpcConfig = serde_json::from_str(r#"{"url":"  "}"#).unwrap();
        assert!(bad.validate().is_err());
    }
}
