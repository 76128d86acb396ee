#![forbid(unsafe_code)]
// `serde` derive visitors reference float types even when the structs do not.
#![allow(clippy::disallowed_types)]

//! Config plumbing shared by both services.
//!
//! Files are TOML. Any string value of the form `env:NAME` is replaced by the
//! value of environment variable `NAME` before the tree is decoded, so every
//! key (including nested tables and arrays) can be injected at deploy time.

use crate::secrets::{MountedSecretsProvider, SecretResolver};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

/// Deployment profile. `production` enables the fail-fast checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Development,
    Production,
}

impl Profile {
    pub fn is_production(self) -> bool {
        self == Profile::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub profile: Profile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }

    pub fn validate(&self) -> Result<(), String> {
        let f = self.format.to_ascii_lowercase();
        if f != "json" && f != "text" {
            return Err(format!(
                "logging.format must be \"json\" or \"text\", got {:?}",
                self.format
            ));
        }
        Ok(())
    }
}

/// A mounted-secrets directory registered as a named secret provider.
#[derive(Debug, Clone, Deserialize)]
pub struct MountedProviderConfig {
    pub name: String,
    pub dir: String,
}

/// Secret resolver for a profile: production forbids inline values.
pub fn build_secret_resolver(
    profile: Profile,
    mounted: &[MountedProviderConfig],
) -> Result<SecretResolver, String> {
    let mut resolver = SecretResolver::new();
    if profile.is_production() {
        resolver = resolver.forbid_inline();
    }
    for m in mounted {
        if m.name.trim().is_empty() {
            return Err("secrets.mounted[].name is empty".to_string());
        }
        resolver
            .register(Box::new(MountedSecretsProvider::new(m.name.trim(), &m.dir)))
            .map_err(|e| format!("invalid [secrets] config: {e}"))?;
    }
    Ok(resolver)
}

/// `deserialize_with` helper for `u128` amounts.
///
/// TOML integers stop at `i64::MAX` and the TOML value decoder has no `u128`
/// support, so amounts are accepted as integers or as decimal strings.
pub fn de_u128<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Int(v) => Ok(u128::from(v)),
        Raw::Str(s) => s
            .trim()
            .parse::<u128>()
            .map_err(|e| serde::de::Error::custom(format!("invalid amount {s:?}: {e}"))),
    }
}

pub fn resolve_env_refs(mut v: toml::Value) -> Result<toml::Value, String> {
    fn walk(v: &mut toml::Value) -> Result<(), String> {
        match v {
            toml::Value::String(s) => {
                if let Some(var) = s.strip_prefix("env:") {
                    let var = var.trim();
                    if var.is_empty() {
                        return Err("invalid env: reference (empty var name)".to_string());
                    }
                    let val = std::env::var(var)
                        .map_err(|_| format!("missing required environment variable: {var}"))?;
                    *s = val;
                }
            }
            toml::Value::Array(arr) => {
                for x in arr {
                    walk(x)?;
                }
            }
            toml::Value::Table(map) => {
                for (_, x) in map.iter_mut() {
                    walk(x)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    walk(&mut v)?;
    Ok(v)
}

pub fn parse_toml<T: DeserializeOwned>(raw: &str, origin: &str) -> Result<T, String> {
    let parsed: toml::Value =
        toml::from_str(raw).map_err(|e| format!("failed to parse config {origin}: {e}"))?;
    let resolved = resolve_env_refs(parsed)?;
    resolved
        .try_into::<T>()
        .map_err(|e| format!("failed to decode config {origin}: {e}"))
}

pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let origin = path.display().to_string();
    let raw =
        fs::read_to_string(path).map_err(|e| format!("failed to read config {origin}: {e}"))?;
    parse_toml(&raw, &origin)
}
