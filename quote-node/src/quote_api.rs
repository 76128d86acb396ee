#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]

//! Quote issuance: access gate, then rate limit, then parameter checks, then
//! rate application and signing. Transport-free so it can be driven directly.

use crate::access::{AccessError, AccessGate, Credentials};
use crate::metrics::{QuoteMetrics, QuoteOutcome};
use crate::rate_limit::{FixedWindowLimiter, TimeSource};
use fpc_core::quote::{QuoteBinder, QuoteError};
use fpc_core::signing::QuoteSigner;
use fpc_core::Address;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(AccessError),
    RateLimited { retry_after_secs: u64 },
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::RateLimited { .. } => 429,
            ApiError::Internal(_) => 500,
        }
    }

    /// Client-facing message. Internal details stay in the logs.
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(m) => m.clone(),
            ApiError::Unauthorized(e) => e.to_string(),
            ApiError::RateLimited { retry_after_secs } => {
                format!("rate limit exceeded, retry after {retry_after_secs}s")
            }
            ApiError::Internal(_) => "internal error".to_string(),
        }
    }

    fn outcome(&self) -> QuoteOutcome {
        match self {
            ApiError::BadRequest(_) => QuoteOutcome::BadRequest,
            ApiError::Unauthorized(_) => QuoteOutcome::Unauthorized,
            ApiError::RateLimited { .. } => QuoteOutcome::RateLimited,
            ApiError::Internal(_) => QuoteOutcome::InternalError,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: ErrorDetail<'a>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail<'a> {
    pub code: &'a str,
    pub message: String,
}

impl ApiError {
    pub fn body(&self) -> ErrorBody<'static> {
        ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.message(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetResponse {
    pub name: String,
    pub address: String,
}

/// Wire form of a signed quote. Integers are decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteResponse {
    pub accepted_asset: String,
    pub fj_amount: String,
    pub aa_payment_amount: String,
    pub valid_until: String,
    pub signature: String,
}

pub struct QuoteApi<S> {
    binder: QuoteBinder<S>,
    asset_name: String,
    gate: AccessGate,
    limiter: FixedWindowLimiter,
    metrics: Arc<QuoteMetrics>,
    time: Arc<dyn TimeSource>,
}

fn parse_fj_amount(raw: Option<&String>) -> Result<u128, ApiError> {
    let raw = raw
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing fj_amount".to_string()))?;
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::BadRequest(
            "fj_amount must be a decimal unsigned integer".to_string(),
        ));
    }
    let v: u128 = raw
        .parse()
        .map_err(|_| ApiError::BadRequest("fj_amount is out of range".to_string()))?;
    if v == 0 {
        return Err(ApiError::BadRequest("fj_amount must be > 0".to_string()));
    }
    Ok(v)
}

fn parse_user(raw: Option<&String>) -> Result<Address, ApiError> {
    let raw = raw
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing user".to_string()))?;
    let user: Address = raw
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid user: {e}")))?;
    if user.is_zero() {
        return Err(ApiError::BadRequest("user must not be the zero address".to_string()));
    }
    Ok(user)
}

impl<S: QuoteSigner> QuoteApi<S> {
    pub fn new(
        binder: QuoteBinder<S>,
        asset_name: impl Into<String>,
        gate: AccessGate,
        limiter: FixedWindowLimiter,
        metrics: Arc<QuoteMetrics>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            binder,
            asset_name: asset_name.into(),
            gate,
            limiter,
            metrics,
            time,
        }
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn metrics(&self) -> &QuoteMetrics {
        &self.metrics
    }

    pub fn asset(&self) -> AssetResponse {
        AssetResponse {
            name: self.asset_name.clone(),
            address: self.binder.accepted_asset().to_hex(),
        }
    }

    /// Issue a quote and record the outcome and latency.
    pub fn quote(
        &self,
        creds: &Credentials<'_>,
        query: &BTreeMap<String, String>,
    ) -> Result<QuoteResponse, ApiError> {
        let started = Instant::now();
        let res = self.quote_inner(creds, query);
        let outcome = match &res {
            Ok(_) => QuoteOutcome::Ok,
            Err(e) => e.outcome(),
        };
        self.metrics.observe(outcome, started.elapsed());
        res
    }

    fn quote_inner(
        &self,
        creds: &Credentials<'_>,
        query: &BTreeMap<String, String>,
    ) -> Result<QuoteResponse, ApiError> {
        let identity = self
            .gate
            .authenticate(creds)
            .map_err(ApiError::Unauthorized)?;

        let decision = self.limiter.check(&identity.rate_key());
        if !decision.allowed {
            debug!(
                event = "quote_rate_limited",
                retry_after_secs = decision.retry_after_secs
            );
            return Err(ApiError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            });
        }

        let user = parse_user(query.get("user"))?;
        let fj_amount = parse_fj_amount(query.get("fj_amount"))?;

        let issued_at = self.time.now_secs();
        let quote = self
            .binder
            .issue(user, fj_amount, issued_at)
            .map_err(|e| match e {
                QuoteError::Overflow(what) => {
                    // Amount too large for the configured rate: a client error.
                    ApiError::BadRequest(format!("fj_amount too large ({what} overflows)"))
                }
                other => {
                    error!(
                        event = "quote_issue_failed",
                        user = %user,
                        fj_amount = %fj_amount,
                        err = %other,
                        "failed to issue quote"
                    );
                    ApiError::Internal(other.to_string())
                }
            })?;

        Ok(QuoteResponse {
            accepted_asset: quote.accepted_asset.to_hex(),
            fj_amount: quote.fj_amount.to_string(),
            aa_payment_amount: quote.aa_payment_amount.to_string(),
            valid_until: quote.valid_until.to_string(),
            signature: quote.signature_hex(),
        })
    }
}
