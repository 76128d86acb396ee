#![forbid(unsafe_code)]
// `serde` derive visitors reference float types even when the structs do not.
#![allow(clippy::disallowed_types)]

use crate::checker::TopupPolicy;
use crate::confirm::WaitConfig;
use crate::monitor::MonitorConfig;
use crate::readiness::ReadinessState;
use fpc_core::config::{de_u128, LoggingConfig, MountedProviderConfig, RuntimeConfig};
use fpc_core::portal::ethers_client::PortalConfig;
use fpc_core::rollup::http_client::RollupRpcConfig;
use fpc_core::secrets::SecretSource;
use fpc_core::{parse_word_hex, Address};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which collaborators the node talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// In-process rollup node and bridge (no network).
    Mock,
    /// JSON-RPC rollup node and the L1 fee juice portal.
    Live,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Mock => "mock",
            Backend::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopupNodeConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub ops: OpsConfig,
    pub facility: FacilityConfig,
    pub topup: TopupConfig,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub rollup: Option<RollupRpcConfig>,
    #[serde(default)]
    pub l1: Option<PortalConfig>,
    #[serde(default)]
    pub l1_signer: Option<L1SignerConfig>,
    #[serde(default)]
    pub mock: MockConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpsConfig {
    #[serde(default = "default_ops_bind")]
    pub bind_address: String,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    /// Overrides the readiness staleness bound (default: 3 × check interval, min 1 s).
    #[serde(default)]
    pub stale_after_ms: Option<u64>,
}

fn default_ops_bind() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            bind_address: default_ops_bind(),
            metrics_enabled: true,
            stale_after_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FacilityConfig {
    pub address: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopupConfig {
    #[serde(deserialize_with = "de_u128")]
    pub threshold: u128,
    #[serde(deserialize_with = "de_u128")]
    pub amount: u128,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_poll_min_ms")]
    pub poll_min_ms: u64,
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
}

fn default_check_interval_ms() -> u64 {
    60_000
}

fn default_cooldown_ms() -> u64 {
    120_000
}

fn default_poll_min_ms() -> u64 {
    1_000
}

fn default_poll_max_ms() -> u64 {
    15_000
}

fn default_confirmation_timeout_ms() -> u64 {
    600_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    /// Storage slot of the fee juice `balances` map, as hex.
    #[serde(default = "default_balances_slot")]
    pub balances_slot: String,
    #[serde(default = "default_true")]
    pub storage_fallback: bool,
}

fn default_balances_slot() -> String {
    "0x1".to_string()
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            balances_slot: default_balances_slot(),
            storage_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./data/bridge-state.json")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct L1SignerConfig {
    /// Hex-encoded L1 private key that funds deposits.
    pub key: SecretSource,
}

/// Behaviour of the `mock` backend.
#[derive(Debug, Clone, Deserialize)]
pub struct MockConfig {
    #[serde(default = "default_mock_fee_juice")]
    pub fee_juice_address: Address,
    #[serde(default, deserialize_with = "de_u128")]
    pub initial_balance: u128,
    #[serde(default = "default_credit_after_reads")]
    pub credit_after_reads: u32,
    #[serde(default = "default_message_ready_after_checks")]
    pub message_ready_after_checks: u32,
}

fn default_mock_fee_juice() -> Address {
    let mut a = [0u8; 32];
    a[30] = 0x0f;
    a[31] = 0xee;
    Address(a)
}

fn default_credit_after_reads() -> u32 {
    2
}

fn default_message_ready_after_checks() -> u32 {
    3
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            fee_juice_address: default_mock_fee_juice(),
            initial_balance: 0,
            credit_after_reads: default_credit_after_reads(),
            message_ready_after_checks: default_message_ready_after_checks(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub mounted: Vec<MountedProviderConfig>,
}

pub fn load_config(path: &Path) -> Result<TopupNodeConfig, String> {
    fpc_core::config::load_toml(path)
}

impl TopupNodeConfig {
    pub fn validate(&self, backend: Backend) -> Result<(), String> {
        self.logging.validate()?;

        if self.ops.bind_address.trim().is_empty() {
            return Err("ops.bind_address is empty".to_string());
        }
        if self.facility.address.is_zero() {
            return Err("facility.address must not be zero".to_string());
        }

        let t = &self.topup;
        if t.threshold == 0 {
            return Err("topup.threshold must be > 0".to_string());
        }
        if t.amount == 0 {
            return Err("topup.amount must be > 0".to_string());
        }
        if t.check_interval_ms == 0 {
            return Err("topup.check_interval_ms must be > 0".to_string());
        }
        if t.poll_min_ms == 0 {
            return Err("topup.poll_min_ms must be > 0".to_string());
        }
        if t.poll_max_ms < t.poll_min_ms {
            return Err("topup.poll_max_ms must be >= topup.poll_min_ms".to_string());
        }
        if t.confirmation_timeout_ms == 0 {
            return Err("topup.confirmation_timeout_ms must be > 0".to_string());
        }

        self.balances_slot()?;
        if self.state.path.as_os_str().is_empty() {
            return Err("state.path is empty".to_string());
        }

        match backend {
            Backend::Mock => {
                if self.runtime.profile.is_production() {
                    return Err(
                        "the mock backend is not allowed in the production profile".to_string()
                    );
                }
            }
            Backend::Live => {
                let rollup = self
                    .rollup
                    .as_ref()
                    .ok_or("[rollup] is required for the live backend")?;
                rollup.validate().map_err(|e| e.to_string())?;
                let l1 = self
                    .l1
                    .as_ref()
                    .ok_or("[l1] is required for the live backend")?;
                l1.validate().map_err(|e| e.to_string())?;
                let signer = self
                    .l1_signer
                    .as_ref()
                    .ok_or("[l1_signer] is required for the live backend")?;
                if self.runtime.profile.is_production() && signer.key.is_inline() {
                    return Err(
                        "inline secrets are not allowed in the production profile: l1_signer.key"
                            .to_string(),
                    );
                }
            }
        }
        Ok(())
    }

    pub fn balances_slot(&self) -> Result<[u8; 32], String> {
        parse_word_hex(&self.monitor.balances_slot)
            .map_err(|e| format!("invalid monitor.balances_slot: {e}"))
    }

    pub fn monitor_config(&self) -> Result<MonitorConfig, String> {
        Ok(MonitorConfig {
            balances_slot: self.balances_slot()?,
            storage_fallback: self.monitor.storage_fallback,
        })
    }

    pub fn policy(&self) -> TopupPolicy {
        let t = &self.topup;
        TopupPolicy {
            threshold: t.threshold,
            amount: t.amount,
            check_interval: Duration::from_millis(t.check_interval_ms),
            cooldown: Duration::from_millis(t.cooldown_ms),
            wait: WaitConfig {
                poll_min: Duration::from_millis(t.poll_min_ms),
                poll_max: Duration::from_millis(t.poll_max_ms),
                timeout: Duration::from_millis(t.confirmation_timeout_ms),
            },
        }
    }

    pub fn stale_after(&self) -> Duration {
        match self.ops.stale_after_ms {
            Some(ms) => Duration::from_millis(ms),
            None => ReadinessState::default_stale_after(Duration::from_millis(
                self.topup.check_interval_ms,
            )),
        }
    }
}
