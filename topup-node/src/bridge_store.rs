//! Durable record of the bridge currently awaiting confirmation.
//!
//! On-disk format (`version` 1), all integers as decimal strings:
//!
//! ```text
//! {"version":1,"bridge":{"baselineBalance":"1","amount":"2","claimSecretHash":"0x..",
//!  "messageHash":"0x..","messageLeafIndex":"0","submittedAtMs":"1700000000000"}}
//! ```
//!
//! The file exists only while a bridge is unconfirmed. A file that cannot be
//! decoded is an error, never treated as "no record".
#![forbid(unsafe_code)]

use fpc_core::parse_word_hex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRecord {
    /// Reserve balance observed right before the bridge was submitted.
    pub baseline_balance: u128,
    pub amount: u128,
    pub claim_secret_hash: [u8; 32],
    pub message_hash: [u8; 32],
    pub message_leaf_index: u64,
    pub submitted_at_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeStoreError {
    #[error("bridge state io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bridge state file {} is not valid JSON: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error(
        "bridge state file {} has unsupported version {version} (expected 1)",
        .path.display()
    )]
    UnsupportedVersion { path: PathBuf, version: u64 },
    #[error("bridge state file {}: invalid {field}: {reason}", .path.display())]
    InvalidField {
        path: PathBuf,
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u64,
    #[serde(default)]
    bridge: Option<WireRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    baseline_balance: String,
    amount: String,
    claim_secret_hash: String,
    message_hash: String,
    message_leaf_index: String,
    submitted_at_ms: String,
}

impl From<&BridgeRecord> for WireRecord {
    fn from(r: &BridgeRecord) -> Self {
        Self {
            baseline_balance: r.baseline_balance.to_string(),
            amount: r.amount.to_string(),
            claim_secret_hash: format!("0x{}", hex::encode(r.claim_secret_hash)),
            message_hash: format!("0x{}", hex::encode(r.message_hash)),
            message_leaf_index: r.message_leaf_index.to_string(),
            submitted_at_ms: r.submitted_at_ms.to_string(),
        }
    }
}

/// Single-record JSON store with atomic replace.
#[derive(Debug, Clone)]
pub struct BridgeStateStore {
    path: PathBuf,
}

impl BridgeStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> BridgeStoreError {
        BridgeStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub fn load(&self) -> Result<Option<BridgeRecord>, BridgeStoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        let file: StateFile =
            serde_json::from_slice(&raw).map_err(|e| BridgeStoreError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if file.version != u64::from(STATE_FILE_VERSION) {
            return Err(BridgeStoreError::UnsupportedVersion {
                path: self.path.clone(),
                version: file.version,
            });
        }
        file.bridge.map(|w| self.decode(&w)).transpose()
    }

    fn decode(&self, w: &WireRecord) -> Result<BridgeRecord, BridgeStoreError> {
        let invalid = |field: &'static str, reason: String| BridgeStoreError::InvalidField {
            path: self.path.clone(),
            field,
            reason,
        };
        let word = |field: &'static str, v: &str| {
            if !v.starts_with("0x") || v.len() != 66 {
                return Err(invalid(field, "expected 0x followed by 64 hex digits".to_string()));
            }
            parse_word_hex(v).map_err(|e| invalid(field, e.to_string()))
        };
        Ok(BridgeRecord {
            baseline_balance: parse_decimal(&w.baseline_balance)
                .map_err(|e| invalid("bridge.baselineBalance", e))?,
            amount: parse_decimal(&w.amount).map_err(|e| invalid("bridge.amount", e))?,
            claim_secret_hash: word("bridge.claimSecretHash", &w.claim_secret_hash)?,
            message_hash: word("bridge.messageHash", &w.message_hash)?,
            message_leaf_index: parse_decimal(&w.message_leaf_index)
                .map_err(|e| invalid("bridge.messageLeafIndex", e))?,
            submitted_at_ms: parse_decimal(&w.submitted_at_ms)
                .map_err(|e| invalid("bridge.submittedAtMs", e))?,
        })
    }

    /// Write `tmp`, then rename over the live file.
    pub fn save(&self, record: &BridgeRecord) -> Result<(), BridgeStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let file = StateFile {
            version: u64::from(STATE_FILE_VERSION),
            bridge: Some(WireRecord::from(record)),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| BridgeStoreError::Malformed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), BridgeStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }
}

fn parse_decimal<T: std::str::FromStr>(s: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("expected a decimal string, got {s:?}"));
    }
    s.parse::<T>().map_err(|e| format!("{e} ({s:?})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BridgeRecord {
        BridgeRecord {
            baseline_balance: 1,
            amount: 2,
            claim_secret_hash: [3u8; 32],
            message_hash: [4u8; 32],
            message_leaf_index: 7,
            submitted_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn missing_file_is_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = BridgeStateStore::new(dir.path().join("bridge.json"));
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = BridgeStateStore::new(dir.path().join("nested").join("bridge.json"));
        store.save(&record()).unwrap();
        assert_eq!(store.load().unwrap(), Some(record()));
        assert!(!dir.path().join("nested").join("bridge.json.tmp").exists());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["bridge"]["baselineBalance"], "1");
        assert_eq!(raw["bridge"]["submittedAtMs"], "1700000000000");

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn null_bridge_is_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        std::fs::write(&path, r#"{"version":1,"bridge":null}"#).unwrap();
        assert_eq!(BridgeStateStore::new(path).load().unwrap(), None);
    }

    #[test]
    fn corruption_is_reported_not_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        let store = BridgeStateStore::new(&path);

        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(store.load(), Err(BridgeStoreError::Malformed { .. })));

        std::fs::write(&path, r#"{"version":2,"bridge":null}"#).unwrap();
        assert!(matches!(
            store.load(),
            Err(BridgeStoreError::UnsupportedVersion { version: 2, .. })
        ));
    }

    #[test]
    fn field_errors_name_the_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        let store = BridgeStateStore::new(&path);
        let hash = format!("0x{}", "ab".repeat(32));

        let cases = [
            ("-1", "0", hash.as_str(), "bridge.baselineBalance"),
            (
                "340282366920938463463374607431768211456",
                "0",
                hash.as_str(),
                "bridge.baselineBalance",
            ),
            ("1", "18446744073709551616", hash.as_str(), "bridge.messageLeafIndex"),
            ("1", "0", "abab", "bridge.messageHash"),
        ];
        for (baseline, leaf, msg, field) in cases {
            let body = serde_json::json!({
                "version": 1,
                "bridge": {
                    "baselineBalance": baseline,
                    "amount": "2",
                    "claimSecretHash": hash,
                    "messageHash": msg,
                    "messageLeafIndex": leaf,
                    "submittedAtMs": "5",
                }
            });
            std::fs::write(&path, body.to_string()).unwrap();
            match store.load() {
                Err(BridgeStoreError::InvalidField { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected {field} error, got {other:?}"),
            }
        }
    }
}
