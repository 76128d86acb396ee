#![forbid(unsafe_code)]
// Workspace clippy config forbids float types, but `serde` derive macros generate
// visitors that reference `f32`/`f64` even if our config structs do not use them.
#![allow(clippy::disallowed_types)]

use crate::access::AuthMode;
use fpc_core::config::{de_u128, LoggingConfig, MountedProviderConfig, RuntimeConfig};
use fpc_core::quote::MAX_QUOTE_VALIDITY_SECS;
use fpc_core::secrets::SecretSource;
use fpc_core::Address;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteNodeConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub quote: QuoteConfig,
    pub signer: SignerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            metrics_enabled: default_metrics_enabled(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteConfig {
    pub facility_address: Address,
    pub accepted_asset_address: Address,
    #[serde(default = "default_asset_name")]
    pub accepted_asset_name: String,
    #[serde(deserialize_with = "de_u128")]
    pub market_rate_num: u128,
    #[serde(deserialize_with = "de_u128")]
    pub market_rate_den: u128,
    #[serde(default)]
    pub fee_bips: u32,
    #[serde(default = "default_validity_seconds")]
    pub validity_seconds: u64,
}

fn default_asset_name() -> String {
    "accepted-asset".to_string()
}

fn default_validity_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    /// Hex-encoded 32-byte Ed25519 secret key.
    pub key: SecretSource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_mode")]
    pub mode: AuthMode,
    #[serde(default)]
    pub api_key: Option<SecretSource>,
    #[serde(default = "default_trusted_header_name")]
    pub trusted_header_name: String,
    #[serde(default)]
    pub trusted_header_value: Option<SecretSource>,
}

fn default_auth_mode() -> AuthMode {
    AuthMode::Disabled
}

fn default_trusted_header_name() -> String {
    "x-fpc-trusted".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            api_key: None,
            trusted_header_name: default_trusted_header_name(),
            trusted_header_value: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rl_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
}

fn default_rl_enabled() -> bool {
    true
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_seconds() -> u64 {
    60
}

fn default_max_tracked_keys() -> usize {
    10_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rl_enabled(),
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
            max_tracked_keys: default_max_tracked_keys(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub mounted: Vec<MountedProviderConfig>,
}

pub fn load_config(path: &Path) -> Result<QuoteNodeConfig, String> {
    fpc_core::config::load_toml(path)
}

impl QuoteNodeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.logging.validate()?;

        if self.server.bind_address.trim().is_empty() {
            return Err("server.bind_address is empty".to_string());
        }
        if self.server.workers == 0 {
            return Err("server.workers must be >= 1".to_string());
        }

        let q = &self.quote;
        if q.facility_address.is_zero() {
            return Err("quote.facility_address must not be zero".to_string());
        }
        if q.accepted_asset_address.is_zero() {
            return Err("quote.accepted_asset_address must not be zero".to_string());
        }
        if q.accepted_asset_name.trim().is_empty() {
            return Err("quote.accepted_asset_name is empty".to_string());
        }
        if q.market_rate_num == 0 {
            return Err("quote.market_rate_num must be > 0".to_string());
        }
        if q.market_rate_den == 0 {
            return Err("quote.market_rate_den must be > 0".to_string());
        }
        if q.fee_bips > 10_000 {
            return Err("quote.fee_bips must be <= 10000".to_string());
        }
        if q.validity_seconds == 0 {
            return Err("quote.validity_seconds must be > 0".to_string());
        }

        let a = &self.auth;
        if a.mode.uses_api_key() && a.api_key.is_none() {
            return Err(format!(
                "auth.api_key is required for auth.mode = {}",
                a.mode.as_str()
            ));
        }
        if a.mode.uses_trusted_header() {
            if a.trusted_header_value.is_none() {
                return Err(format!(
                    "auth.trusted_header_value is required for auth.mode = {}",
                    a.mode.as_str()
                ));
            }
            if a.trusted_header_name.trim().is_empty() {
                return Err("auth.trusted_header_name is empty".to_string());
            }
        }

        let rl = &self.rate_limit;
        if rl.enabled {
            if rl.max_requests == 0 {
                return Err("rate_limit.max_requests must be >= 1".to_string());
            }
            if rl.window_seconds == 0 {
                return Err("rate_limit.window_seconds must be >= 1".to_string());
            }
            if rl.max_tracked_keys == 0 {
                return Err("rate_limit.max_tracked_keys must be >= 1".to_string());
            }
        }

        if self.runtime.profile.is_production() {
            self.validate_production()?;
        }
        Ok(())
    }

    fn validate_production(&self) -> Result<(), String> {
        if self.auth.mode == AuthMode::Disabled {
            return Err("auth.mode = disabled is not allowed in the production profile".to_string());
        }
        let inline = [
            ("signer.key", Some(&self.signer.key)),
            ("auth.api_key", self.auth.api_key.as_ref()),
            ("auth.trusted_header_value", self.auth.trusted_header_value.as_ref()),
        ]
        .into_iter()
        .filter(|(_, s)| s.map(SecretSource::is_inline).unwrap_or(false))
        .map(|(k, _)| k)
        .collect::<Vec<_>>();
        if !inline.is_empty() {
            return Err(format!(
                "inline secrets are not allowed in the production profile: {}",
                inline.join(", ")
            ));
        }
        Ok(())
    }

    /// Validity that will actually be applied to issued quotes.
    pub fn effective_validity_secs(&self) -> u64 {
        self.quote.validity_seconds.min(MAX_QUOTE_VALIDITY_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpc_core::config::parse_toml;

    const BASE: &str = r#"
        [quote]
        facility_address = "0x0a"
        accepted_asset_address = "0x0b"
        accepted_asset_name = "humanUSDC"
        market_rate_num = 1
        market_rate_den = 100000
        fee_bips = 200

        [signer]
        key = { source = "inline", value = "0101010101010101010101010101010101010101010101010101010101010101" }
    "#;

    fn parse(extra: &str) -> QuoteNodeConfig {
        parse_toml(&format!("{BASE}\n{extra}"), "test").unwrap()
    }

    #[test]
    fn defaults_apply() {
        let cfg = parse("");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.server.bind_address, "0.0.0.0:3000");
        assert_eq!(cfg.auth.mode, AuthMode::Disabled);
        assert_eq!(cfg.auth.trusted_header_name, "x-fpc-trusted");
        assert!(cfg.rate_limit.enabled);
        assert_eq!(cfg.quote.validity_seconds, 300);
        assert_eq!(cfg.quote.facility_address.0[31], 0x0a);
    }

    #[test]
    fn load_config_reads_rate_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quote.toml");
        std::fs::write(
            &path,
            format!("{BASE}\n[runtime]\nprofile = \"production\"\n"),
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.quote.market_rate_num, 1);
        assert_eq!(cfg.quote.market_rate_den, 100_000);
        // Decoding succeeds, so the production checks are what reject it.
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("auth.mode = disabled"), "{err}");
    }

    #[test]
    fn rate_accepts_values_beyond_toml_integers() {
        let cfg = parse("").quote;
        assert_eq!(cfg.market_rate_den, 100_000);
        let raw = BASE.replace(
            "market_rate_den = 100000",
            "market_rate_den = \"100000000000000000000000\"",
        );
        let cfg: QuoteNodeConfig = parse_toml(&raw, "test").unwrap();
        assert_eq!(cfg.quote.market_rate_den, 100_000_000_000_000_000_000_000);
    }

    #[test]
    fn validity_is_capped_for_issuance() {
        let mut long = parse("");
        long.quote.validity_seconds = 7_200;
        assert!(long.validate().is_ok());
        assert_eq!(long.effective_validity_secs(), 3_600);
    }

    #[test]
    fn api_key_mode_requires_key() {
        let cfg = parse("[auth]\nmode = \"api_key\"");
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("auth.api_key"), "{err}");
    }

    #[test]
    fn production_rejects_disabled_auth() {
        let cfg = parse("[runtime]\nprofile = \"production\"");
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("disabled"), "{err}");
    }

    #[test]
    fn production_rejects_inline_secrets() {
        let cfg = parse(
            r#"
            [runtime]
            profile = "production"
            [auth]
            mode = "api_key"
            api_key = { source = "env", var = "FPC_QUOTE_API_KEY" }
            "#,
        );
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("signer.key"), "{err}");
        assert!(!err.contains("auth.api_key"), "{err}");
    }

    #[test]
    fn zero_rate_and_bad_limits_are_rejected() {
        let mut cfg = parse("");
        cfg.quote.market_rate_num = 0;
        assert!(cfg.validate().unwrap_err().contains("market_rate_num"));

        let mut cfg = parse("");
        cfg.rate_limit.window_seconds = 0;
        assert!(cfg.validate().unwrap_err().contains("window_seconds"));

        let mut cfg = parse("");
        cfg.rate_limit.enabled = false;
        cfg.rate_limit.window_seconds = 0;
        assert!(cfg.validate().is_ok());
    }
}
