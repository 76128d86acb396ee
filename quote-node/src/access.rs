#![forbid(unsafe_code)]

//! Quote request authentication.
//!
//! Shared secrets are never compared directly: both sides are reduced to a
//! SHA-256 digest and the digests are compared in constant time.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Disabled,
    ApiKey,
    TrustedHeader,
    ApiKeyOrTrustedHeader,
    ApiKeyAndTrustedHeader,
}

impl AuthMode {
    pub fn uses_api_key(self) -> bool {
        matches!(
            self,
            Self::ApiKey | Self::ApiKeyOrTrustedHeader | Self::ApiKeyAndTrustedHeader
        )
    }

    pub fn uses_trusted_header(self) -> bool {
        matches!(
            self,
            Self::TrustedHeader | Self::ApiKeyOrTrustedHeader | Self::ApiKeyAndTrustedHeader
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::ApiKey => "api_key",
            Self::TrustedHeader => "trusted_header",
            Self::ApiKeyOrTrustedHeader => "api_key_or_trusted_header",
            Self::ApiKeyAndTrustedHeader => "api_key_and_trusted_header",
        }
    }
}

/// Caller identity used as the rate-limit key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Hex SHA-256 digest of the presented API key.
    ApiKey(String),
    RemoteAddr(String),
}

impl Identity {
    pub fn rate_key(&self) -> String {
        match self {
            Identity::ApiKey(d) => format!("key:{d}"),
            Identity::RemoteAddr(a) => format!("addr:{a}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("missing trusted header")]
    MissingTrustedHeader,
    #[error("invalid trusted header")]
    InvalidTrustedHeader,
    #[error("neither a valid API key nor a valid trusted header was presented")]
    NoValidCredential,
}

/// What the transport extracted from an inbound request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    pub api_key: Option<&'a str>,
    pub trusted_header: Option<&'a str>,
    pub remote_addr: &'a str,
}

#[derive(Clone)]
pub struct AccessGate {
    mode: AuthMode,
    api_key_digest: Option<[u8; 32]>,
    trusted_header_name: String,
    trusted_value_digest: Option<[u8; 32]>,
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("mode", &self.mode)
            .field("trusted_header_name", &self.trusted_header_name)
            .finish_non_exhaustive()
    }
}

fn digest(s: &str) -> [u8; 32] {
    Sha256::digest(s.as_bytes()).into()
}

fn digest_matches(expected: &Option<[u8; 32]>, presented: &str) -> bool {
    match expected {
        Some(e) => bool::from(e[..].ct_eq(&digest(presented)[..])),
        None => false,
    }
}

impl AccessGate {
    pub fn new(
        mode: AuthMode,
        api_key: Option<&str>,
        trusted_header_name: &str,
        trusted_header_value: Option<&str>,
    ) -> Result<Self, String> {
        let api_key_digest = match (mode.uses_api_key(), api_key) {
            (true, Some(k)) if !k.is_empty() => Some(digest(k)),
            (true, _) => return Err(format!("auth.mode = {} needs an API key", mode.as_str())),
            (false, _) => None,
        };
        let trusted_value_digest = match (mode.uses_trusted_header(), trusted_header_value) {
            (true, Some(v)) if !v.is_empty() => Some(digest(v)),
            (true, _) => {
                return Err(format!(
                    "auth.mode = {} needs a trusted header value",
                    mode.as_str()
                ))
            }
            (false, _) => None,
        };
        Ok(Self {
            mode,
            api_key_digest,
            trusted_header_name: trusted_header_name.trim().to_ascii_lowercase(),
            trusted_value_digest,
        })
    }

    pub fn disabled() -> Self {
        Self {
            mode: AuthMode::Disabled,
            api_key_digest: None,
            trusted_header_name: String::new(),
            trusted_value_digest: None,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Lowercase header name the trusted upstream sets.
    pub fn trusted_header_name(&self) -> &str {
        &self.trusted_header_name
    }

    fn check_key(&self, creds: &Credentials<'_>) -> Result<Identity, AccessError> {
        let key = creds.api_key.ok_or(AccessError::MissingApiKey)?;
        if !digest_matches(&self.api_key_digest, key) {
            return Err(AccessError::InvalidApiKey);
        }
        Ok(Identity::ApiKey(hex::encode(digest(key))))
    }

    fn check_trusted(&self, creds: &Credentials<'_>) -> Result<(), AccessError> {
        let v = creds
            .trusted_header
            .ok_or(AccessError::MissingTrustedHeader)?;
        if !digest_matches(&self.trusted_value_digest, v) {
            return Err(AccessError::InvalidTrustedHeader);
        }
        Ok(())
    }

    pub fn authenticate(&self, creds: &Credentials<'_>) -> Result<Identity, AccessError> {
        let remote = || Identity::RemoteAddr(creds.remote_addr.to_string());
        match self.mode {
            AuthMode::Disabled => Ok(remote()),
            AuthMode::ApiKey => self.check_key(creds),
            AuthMode::TrustedHeader => self.check_trusted(creds).map(|()| remote()),
            AuthMode::ApiKeyOrTrustedHeader => match self.check_key(creds) {
                Ok(id) => Ok(id),
                Err(_) => self
                    .check_trusted(creds)
                    .map(|()| remote())
                    .map_err(|_| AccessError::NoValidCredential),
            },
            AuthMode::ApiKeyAndTrustedHeader => {
                let id = self.check_key(creds)?;
                self.check_trusted(creds)?;
                Ok(id)
            }
        }
    }
}
