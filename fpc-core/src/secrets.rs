//! Secret resolution.
//!
//! Secrets (signing keys, API keys, L1 private keys) are described in config as a
//! tagged [`SecretSource`] and resolved exactly once at startup into a
//! [`ResolvedSecret`]: the value plus where it came from. Only the provenance is
//! ever logged.
//!
//! External backends plug in through [`SecretProvider`] and are looked up by name
//! in a [`SecretResolver`] registry.
#![forbid(unsafe_code)]

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("missing environment variable {0}")]
    MissingEnv(String),
    #[error("failed to read secret file {path}: {reason}")]
    File { path: String, reason: String },
    #[error("secret from {0} is empty")]
    Empty(String),
    #[error("unknown secret provider: {0}")]
    UnknownProvider(String),
    #[error("secret provider {0} is already registered")]
    DuplicateProvider(String),
    #[error("provider {provider} failed for {reference}: {reason}")]
    Provider {
        provider: String,
        reference: String,
        reason: String,
    },
    #[error("inline secrets are not allowed in this profile")]
    InlineForbidden,
}

/// Where a secret comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SecretSource {
    Env { var: String },
    Inline { value: String },
    File { path: PathBuf },
    Provider { provider: String, reference: String },
}

impl SecretSource {
    pub fn is_inline(&self) -> bool {
        matches!(self, SecretSource::Inline { .. })
    }
}

/// Audit trail for a resolved secret (safe to log).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretProvenance {
    Env(String),
    Inline,
    File(PathBuf),
    Provider { provider: String, reference: String },
}

impl fmt::Display for SecretProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretProvenance::Env(var) => write!(f, "env:{var}"),
            SecretProvenance::Inline => f.write_str("inline"),
            SecretProvenance::File(p) => write!(f, "file:{}", p.display()),
            SecretProvenance::Provider {
                provider,
                reference,
            } => write!(f, "provider:{provider}/{reference}"),
        }
    }
}

#[derive(Clone)]
pub struct ResolvedSecret {
    value: String,
    provenance: SecretProvenance,
}

impl ResolvedSecret {
    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn provenance(&self) -> &SecretProvenance {
        &self.provenance
    }
}

impl fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("value", &"<redacted>")
            .field("provenance", &self.provenance)
            .finish()
    }
}

/// An external secret backend.
pub trait SecretProvider: Send + Sync {
    fn name(&self) -> &str;
    fn fetch(&self, reference: &str) -> Result<String, SecretError>;
}

/// Secrets mounted as one file per reference under a directory
/// (container secret mounts, tmpfs key drops).
#[derive(Debug, Clone)]
pub struct MountedSecretsProvider {
    name: String,
    dir: PathBuf,
}

impl MountedSecretsProvider {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }
}

impl SecretProvider for MountedSecretsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, reference: &str) -> Result<String, SecretError> {
        // References are file names, never paths.
        if reference.is_empty()
            || reference.contains('/')
            || reference.contains('\\')
            || reference == ".."
        {
            return Err(SecretError::Provider {
                provider: self.name.clone(),
                reference: reference.to_string(),
                reason: "reference must be a plain file name".to_string(),
            });
        }
        read_secret_file(&self.dir.join(reference))
    }
}

/// Registry of secret providers plus the built-in env/inline/file resolvers.
pub struct SecretResolver {
    providers: BTreeMap<String, Box<dyn SecretProvider>>,
    allow_inline: bool,
}

impl Default for SecretResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretResolver {
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
            allow_inline: true,
        }
    }

    /// Reject `inline` sources (production profile).
    pub fn forbid_inline(mut self) -> Self {
        self.allow_inline = false;
        self
    }

    pub fn register(&mut self, provider: Box<dyn SecretProvider>) -> Result<(), SecretError> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(SecretError::DuplicateProvider(name));
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, source: &SecretSource) -> Result<ResolvedSecret, SecretError> {
        let (value, provenance) = match source {
            SecretSource::Env { var } => {
                let var = var.trim();
                let v = std::env::var(var).map_err(|_| SecretError::MissingEnv(var.to_string()))?;
                (v, SecretProvenance::Env(var.to_string()))
            }
            SecretSource::Inline { value } => {
                if !self.allow_inline {
                    return Err(SecretError::InlineForbidden);
                }
                (value.clone(), SecretProvenance::Inline)
            }
            SecretSource::File { path } => {
                (read_secret_file(path)?, SecretProvenance::File(path.clone()))
            }
            SecretSource::Provider {
                provider,
                reference,
            } => {
                let p = self
                    .providers
                    .get(provider)
                    .ok_or_else(|| SecretError::UnknownProvider(provider.clone()))?;
                (
                    p.fetch(reference)?,
                    SecretProvenance::Provider {
                        provider: provider.clone(),
                        reference: reference.clone(),
                    },
                )
            }
        };

        let value = value.trim().to_string();
        if value.is_empty() {
            return Err(SecretError::Empty(provenance.to_string()));
        }
        Ok(ResolvedSecret { value, provenance })
    }
}

fn read_secret_file(path: &Path) -> Result<String, SecretError> {
    std::fs::read_to_string(path).map_err(|e| SecretError::File {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct StaticProvider;

    impl SecretProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }
        fn fetch(&self, reference: &str) -> Result<String, SecretError> {
            Ok(format!("value-for-{reference}"))
        }
    }

    #[test]
    fn resolves_env_and_records_provenance() {
        std::env::set_var("FPC_TEST_SECRET_ENV", "  s3cret\n");
        let r = SecretResolver::new()
            .resolve(&SecretSource::Env {
                var: "FPC_TEST_SECRET_ENV".to_string(),
            })
            .unwrap();
        assert_eq!(r.expose(), "s3cret");
        assert_eq!(r.provenance().to_string(), "env:FPC_TEST_SECRET_ENV");
    }

    #[test]
    fn missing_env_is_an_error() {
        let err = SecretResolver::new()
            .resolve(&SecretSource::Env {
                var: "FPC_TEST_SECRET_DEFINITELY_UNSET".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, SecretError::MissingEnv(_)));
    }

    #[test]
    fn resolves_file_and_trims() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "abc123").unwrap();
        let r = SecretResolver::new()
            .resolve(&SecretSource::File {
                path: f.path().to_path_buf(),
            })
            .unwrap();
        assert_eq!(r.expose(), "abc123");
    }

    #[test]
    fn inline_can_be_forbidden() {
        let src = SecretSource::Inline {
            value: "x".to_string(),
        };
        assert!(SecretResolver::new().resolve(&src).is_ok());
        assert!(matches!(
            SecretResolver::new().forbid_inline().resolve(&src),
            Err(SecretError::InlineForbidden)
        ));
    }

    #[test]
    fn provider_registry_dispatches_by_name() {
        let mut r = SecretResolver::new();
        r.register(Box::new(StaticProvider)).unwrap();
        assert!(matches!(
            r.register(Box::new(StaticProvider)),
            Err(SecretError::DuplicateProvider(_))
        ));

        let v = r
            .resolve(&SecretSource::Provider {
                provider: "static".to_string(),
                reference: "quote-key".to_string(),
            })
            .unwrap();
        assert_eq!(v.expose(), "value-for-quote-key");
        assert_eq!(v.provenance().to_string(), "provider:static/quote-key");

        assert!(matches!(
            r.resolve(&SecretSource::Provider {
                provider: "vault".to_string(),
                reference: "k".to_string(),
            }),
            Err(SecretError::UnknownProvider(_))
        ));
    }

    #[test]
    fn mounted_provider_rejects_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("api-key"), "k1\n").unwrap();
        let p = MountedSecretsProvider::new("mounted", dir.path());
        assert_eq!(p.fetch("api-key").unwrap(), "k1\n");
        assert!(p.fetch("../etc/passwd").is_err());
    }

    #[test]
    fn debug_redacts_value() {
        let r = SecretResolver::new()
            .resolve(&SecretSource::Inline {
                value: "topsecret".to_string(),
            })
            .unwrap();
        assert!(!format!("{r:?}").contains("topsecret"));
    }

    #[test]
    fn source_deserializes_from_tagged_table() {
        let s: SecretSource = serde_json::from_str(
            r#"{"source":"file","path":"/run/secrets/quote"}"#,
        )
        .unwrap();
        assert_eq!(
            s,
            SecretSource::File {
                path: PathBuf::from("/run/secrets/quote")
            }
        );
        let p: SecretSource = serde_json::from_str(
            r#"{"source":"provider","provider":"mounted","reference":"k"}"#,
        )
        .unwrap();
        assert!(!p.is_inline());
    }
}
