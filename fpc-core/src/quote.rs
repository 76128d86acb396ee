//! Exchange-rate arithmetic and the quote hash binding.
//!
//! ## Rate composition
//! `final_rate = market_rate * (10000 + fee_bips) / 10000`, carried as an
//! integer numerator/denominator pair. The consuming contract performs a
//! ceiling division, so the payment is always
//! `ceil(fj_amount * rate_num / rate_den)`.
//!
//! ## Preimage (v1)
//! Seven 32-byte big-endian words, in this exact order:
//!
//! ```text
//! [ QUOTE_DOMAIN_SEPARATOR, facility, accepted_asset, fj_amount,
//!   aa_payment_amount, valid_until, user ]
//! ```
//!
//! The order and encoding must match the on-chain verifier bit-for-bit.
#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]

use crate::signing::{QuoteSigner, SigningError};
use crate::{u128_word, Address};

/// Basis-point denominator for the operator margin.
pub const BIPS_DENOMINATOR: u128 = 10_000;

/// Protocol-wide cap on quote validity.
pub const MAX_QUOTE_VALIDITY_SECS: u64 = 3_600;

/// Domain separator word for quote preimages (v1).
///
/// ASCII `fpc-quote-v1`, right-aligned in a 32-byte word.
pub const QUOTE_DOMAIN_SEPARATOR: [u8; 32] = domain_word(b"fpc-quote-v1");

const fn domain_word(tag: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < tag.len() {
        out[32 - tag.len() + i] = tag[i];
        i += 1;
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("rate numerator must be > 0")]
    ZeroRate,
    #[error("rate denominator must be > 0")]
    ZeroDenominator,
    #[error("fj_amount must be > 0")]
    ZeroAmount,
    #[error("user address must not be zero")]
    ZeroUser,
    #[error("{0} address must not be zero")]
    ZeroAddress(&'static str),
    #[error("quote validity must be > 0 seconds")]
    ZeroValidity,
    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),
}

/// Final exchange rate (accepted-asset units per fee-juice unit) as an exact fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalRate {
    pub num: u128,
    pub den: u128,
}

impl FinalRate {
    pub fn new(num: u128, den: u128) -> Result<Self, QuoteError> {
        if num == 0 {
            return Err(QuoteError::ZeroRate);
        }
        if den == 0 {
            return Err(QuoteError::ZeroDenominator);
        }
        Ok(Self { num, den })
    }

    /// Apply the operator margin to a market rate.
    pub fn from_market(
        market_num: u128,
        market_den: u128,
        fee_bips: u32,
    ) -> Result<Self, QuoteError> {
        let margin = BIPS_DENOMINATOR + u128::from(fee_bips);
        let num = market_num
            .checked_mul(margin)
            .ok_or(QuoteError::Overflow("rate numerator"))?;
        let den = market_den
            .checked_mul(BIPS_DENOMINATOR)
            .ok_or(QuoteError::Overflow("rate denominator"))?;
        Self::new(num, den)
    }

    pub fn payment_for(&self, fj_amount: u128) -> Result<u128, QuoteError> {
        payment_amount(fj_amount, self.num, self.den)
    }
}

/// `ceil(fj_amount * rate_num / rate_den)`.
pub fn payment_amount(fj_amount: u128, rate_num: u128, rate_den: u128) -> Result<u128, QuoteError> {
    if rate_den == 0 {
        return Err(QuoteError::ZeroDenominator);
    }
    let product = fj_amount
        .checked_mul(rate_num)
        .ok_or(QuoteError::Overflow("fj_amount * rate_num"))?;
    Ok(product.div_ceil(rate_den))
}

/// The ordered tuple a quote signature commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotePreimage {
    pub facility: Address,
    pub accepted_asset: Address,
    pub fj_amount: u128,
    pub aa_payment_amount: u128,
    pub valid_until: u64,
    pub user: Address,
}

impl QuotePreimage {
    pub fn words(&self) -> [[u8; 32]; 7] {
        [
            QUOTE_DOMAIN_SEPARATOR,
            self.facility.0,
            self.accepted_asset.0,
            u128_word(self.fj_amount),
            u128_word(self.aa_payment_amount),
            u128_word(u128::from(self.valid_until)),
            self.user.0,
        ]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let words = self.words();
        let mut out = Vec::with_capacity(words.len() * 32);
        for w in &words {
            out.extend_from_slice(w);
        }
        out
    }

    pub fn hash(&self) -> [u8; 32] {
        *blake3::hash(&self.to_bytes()).as_bytes()
    }
}

/// A signed, user-bound quote. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedQuote {
    pub accepted_asset: Address,
    pub fj_amount: u128,
    pub aa_payment_amount: u128,
    pub valid_until: u64,
    pub user_address: Address,
    pub signature: Vec<u8>,
}

impl SignedQuote {
    pub fn signature_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.signature))
    }
}

/// Builds quote preimages for one facility/asset pair and signs them.
pub struct QuoteBinder<S> {
    facility: Address,
    accepted_asset: Address,
    rate: FinalRate,
    validity_secs: u64,
    signer: S,
}

impl<S: QuoteSigner> QuoteBinder<S> {
    /// `validity_secs` above [`MAX_QUOTE_VALIDITY_SECS`] is capped.
    pub fn new(
        facility: Address,
        accepted_asset: Address,
        rate: FinalRate,
        validity_secs: u64,
        signer: S,
    ) -> Result<Self, QuoteError> {
        if facility.is_zero() {
            return Err(QuoteError::ZeroAddress("facility"));
        }
        if accepted_asset.is_zero() {
            return Err(QuoteError::ZeroAddress("accepted asset"));
        }
        if validity_secs == 0 {
            return Err(QuoteError::ZeroValidity);
        }
        Ok(Self {
            facility,
            accepted_asset,
            rate,
            validity_secs: validity_secs.min(MAX_QUOTE_VALIDITY_SECS),
            signer,
        })
    }

    pub fn facility(&self) -> Address {
        self.facility
    }

    pub fn accepted_asset(&self) -> Address {
        self.accepted_asset
    }

    pub fn rate(&self) -> FinalRate {
        self.rate
    }

    pub fn validity_secs(&self) -> u64 {
        self.validity_secs
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    pub fn preimage(
        &self,
        user: Address,
        fj_amount: u128,
        issued_at_secs: u64,
    ) -> Result<QuotePreimage, QuoteError> {
        if user.is_zero() {
            return Err(QuoteError::ZeroUser);
        }
        if fj_amount == 0 {
            return Err(QuoteError::ZeroAmount);
        }
        let aa_payment_amount = self.rate.payment_for(fj_amount)?;
        let valid_until = issued_at_secs
            .checked_add(self.validity_secs)
            .ok_or(QuoteError::Overflow("valid_until"))?;
        Ok(QuotePreimage {
            facility: self.facility,
            accepted_asset: self.accepted_asset,
            fj_amount,
            aa_payment_amount,
            valid_until,
            user,
        })
    }

    pub fn issue(
        &self,
        user: Address,
        fj_amount: u128,
        issued_at_secs: u64,
    ) -> Result<SignedQuote, QuoteError> {
        let preimage = self.preimage(user, fj_amount, issued_at_secs)?;
        let signature = self.signer.sign_hash(&preimage.hash())?;
        Ok(SignedQuote {
            accepted_asset: preimage.accepted_asset,
            fj_amount: preimage.fj_amount,
            aa_payment_amount: preimage.aa_payment_amount,
            valid_until: preimage.valid_until,
            user_address: preimage.user,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::Ed25519QuoteSigner;

    fn addr(n: u8) -> Address {
        let mut a = [0u8; 32];
        a[31] = n;
        Address(a)
    }

    fn binder(validity: u64) -> QuoteBinder<Ed25519QuoteSigner> {
        let signer = Ed25519QuoteSigner::from_secret_bytes([7u8; 32]);
        QuoteBinder::new(
            addr(1),
            addr(2),
            FinalRate::from_market(1, 100_000, 200).unwrap(),
            validity,
            signer,
        )
        .unwrap()
    }

    #[test]
    fn domain_separator_is_right_aligned_ascii() {
        assert_eq!(&QUOTE_DOMAIN_SEPARATOR[20..], b"fpc-quote-v1");
        assert!(QUOTE_DOMAIN_SEPARATOR[..20].iter().all(|b| *b == 0));
    }

    #[test]
    fn margin_composes_into_exact_fraction() {
        let r = FinalRate::from_market(1, 100_000, 200).unwrap();
        assert_eq!(r.num, 10_200);
        assert_eq!(r.den, 1_000_000_000);
    }

    #[test]
    fn zero_rate_and_denominator_are_rejected() {
        assert!(matches!(
            FinalRate::from_market(0, 1, 0),
            Err(QuoteError::ZeroRate)
        ));
        assert!(matches!(
            FinalRate::from_market(1, 0, 0),
            Err(QuoteError::ZeroDenominator)
        ));
    }

    #[test]
    fn payment_rounds_up() {
        assert_eq!(payment_amount(10, 1, 3).unwrap(), 4);
        assert_eq!(payment_amount(9, 1, 3).unwrap(), 3);
        assert_eq!(payment_amount(1, 1, 1_000).unwrap(), 1);
    }

    #[test]
    fn payment_overflow_is_an_error() {
        assert!(matches!(
            payment_amount(u128::MAX, 2, 1),
            Err(QuoteError::Overflow(_))
        ));
    }

    #[test]
    fn validity_is_capped() {
        let b = binder(10 * MAX_QUOTE_VALIDITY_SECS);
        assert_eq!(b.validity_secs(), MAX_QUOTE_VALIDITY_SECS);
        let q = b.issue(addr(9), 1_000, 1_700_000_000).unwrap();
        assert_eq!(q.valid_until, 1_700_000_000 + MAX_QUOTE_VALIDITY_SECS);
    }

    #[test]
    fn zero_user_and_zero_amount_are_rejected() {
        let b = binder(300);
        assert!(matches!(
            b.issue(Address::ZERO, 1, 0),
            Err(QuoteError::ZeroUser)
        ));
        assert!(matches!(b.issue(addr(3), 0, 0), Err(QuoteError::ZeroAmount)));
    }

    #[test]
    fn preimage_word_order_is_fixed() {
        let b = binder(300);
        let p = b.preimage(addr(9), 5, 100).unwrap();
        let w = p.words();
        assert_eq!(w[0], QUOTE_DOMAIN_SEPARATOR);
        assert_eq!(w[1], addr(1).0);
        assert_eq!(w[2], addr(2).0);
        assert_eq!(w[3], u128_word(5));
        assert_eq!(w[4], u128_word(p.aa_payment_amount));
        assert_eq!(w[5], u128_word(400));
        assert_eq!(w[6], addr(9).0);
        assert_eq!(p.to_bytes().len(), 7 * 32);
    }
}
