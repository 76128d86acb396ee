//! L1 fee-juice portal adapter (ethers).
//!
//! A deposit is two L1 transactions: an ERC-20 `approve` of the portal, then
//! `depositToAztecPublic`. The message hash and leaf index are taken from the
//! portal's `DepositToAztecPublic` event in the deposit receipt.
#![forbid(unsafe_code)]

use super::{BridgeError, DepositReceipt, DepositRequest, SettlementBridge};
use async_trait::async_trait;
use ethers::contract::parse_log;
use ethers::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

abigen!(
    FeeJuicePortal,
    r#"[
        function depositToAztecPublic(bytes32 to, uint256 amount, bytes32 secretHash) external returns (bytes32, uint256)
        event DepositToAztecPublic(bytes32 indexed to, uint256 amount, bytes32 secretHash, bytes32 key, uint256 index)
    ]"#
);

abigen!(
    FeeJuiceToken,
    r#"[
        function approve(address spender, uint256 amount) external returns (bool)
    ]"#
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub portal_address: String,
    pub token_address: String,
    #[serde(default = "default_confirmations")]
    pub confirmations: usize,
}

fn default_confirmations() -> usize {
    1
}

impl PortalConfig {
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.rpc_url.trim().is_empty() {
            return Err(BridgeError::Config("l1.rpc_url is empty".to_string()));
        }
        if self.chain_id == 0 {
            return Err(BridgeError::Config("l1.chain_id must be > 0".to_string()));
        }
        for (key, v) in [
            ("l1.portal_address", &self.portal_address),
            ("l1.token_address", &self.token_address),
        ] {
            let addr: Address = v
                .parse()
                .map_err(|e| BridgeError::Config(format!("invalid {key}: {e}")))?;
            if addr == Address::zero() {
                return Err(BridgeError::Config(format!("{key} is zero")));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct EthersFeeJuicePortal {
    portal: FeeJuicePortal<SignerClient>,
    token: FeeJuiceToken<SignerClient>,
    confirmations: usize,
}

impl EthersFeeJuicePortal {
    pub fn new(cfg: &PortalConfig, private_key: &str) -> Result<Self, BridgeError> {
        cfg.validate()?;
        let provider = Provider::<Http>::try_from(cfg.rpc_url.as_str())
            .map_err(|e| BridgeError::Config(format!("invalid l1 rpc url: {e}")))?;
        let wallet: LocalWallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| BridgeError::Config(format!("invalid l1 private key: {e}")))?
            .with_chain_id(cfg.chain_id);
        let client = Arc::new(SignerMiddleware::new(provider, wallet));

        let portal_addr: Address = cfg
            .portal_address
            .parse()
            .map_err(|e| BridgeError::Config(format!("invalid l1.portal_address: {e}")))?;
        let token_addr: Address = cfg
            .token_address
            .parse()
            .map_err(|e| BridgeError::Config(format!("invalid l1.token_address: {e}")))?;

        Ok(Self {
            portal: FeeJuicePortal::new(portal_addr, client.clone()),
            token: FeeJuiceToken::new(token_addr, client),
            confirmations: cfg.confirmations.max(1),
        })
    }

    async fn approve(&self, amount: U256) -> Result<TxHash, BridgeError> {
        let call = self.token.approve(self.portal.address(), amount);
        let pending = call
            .send()
            .await
            .map_err(|e| BridgeError::Rejected(format!("approve: {e}")))?;
        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| BridgeError::Network(format!("approve confirmation: {e}")))?
            .ok_or_else(|| BridgeError::Dropped("approve tx dropped from mempool".to_string()))?;
        ensure_success(&receipt, "approve")?;
        Ok(receipt.transaction_hash)
    }
}

fn ensure_success(receipt: &TransactionReceipt, what: &str) -> Result<(), BridgeError> {
    if receipt.status != Some(U64::from(1u64)) {
        return Err(BridgeError::Rejected(format!(
            "{what} reverted in tx {:#x}",
            receipt.transaction_hash
        )));
    }
    Ok(())
}

#[async_trait]
impl SettlementBridge for EthersFeeJuicePortal {
    async fn deposit_to_public(&self, req: &DepositRequest) -> Result<DepositReceipt, BridgeError> {
        let amount = U256::from(req.amount);
        let approve_tx = self.approve(amount).await?;
        info!(event = "l1_approve_confirmed", tx = %format!("{approve_tx:#x}"));

        let call = self
            .portal
            .deposit_to_aztec_public(req.recipient.0, amount, req.claim_secret_hash);
        let pending = call
            .send()
            .await
            .map_err(|e| BridgeError::Rejected(format!("deposit: {e}")))?;
        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| BridgeError::Network(format!("deposit confirmation: {e}")))?
            .ok_or_else(|| BridgeError::Dropped("deposit tx dropped from mempool".to_string()))?;
        ensure_success(&receipt, "deposit")?;

        let portal_addr = self.portal.address();
        let event = receipt
            .logs
            .iter()
            .filter(|log| log.address == portal_addr)
            .find_map(|log| parse_log::<DepositToAztecPublicFilter>(log.clone()).ok())
            .ok_or_else(|| {
                BridgeError::Malformed(format!(
                    "no DepositToAztecPublic event in tx {:#x}",
                    receipt.transaction_hash
                ))
            })?;

        if event.index > U256::from(u64::MAX) {
            return Err(BridgeError::Malformed(format!(
                "message leaf index out of range: {}",
                event.index
            )));
        }

        Ok(DepositReceipt {
            message_hash: event.key,
            message_leaf_index: event.index.as_u64(),
            l1_tx_hash: Some(format!("{:#x}", receipt.transaction_hash)),
        })
    }
}
