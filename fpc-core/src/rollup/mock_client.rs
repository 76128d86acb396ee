//! Deterministic in-memory rollup node for tests and the offline `mock` backend.
#![forbid(unsafe_code)]

use super::{NodeInfo, RollupError, RollupNode};
use crate::{u128_word, Address};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug)]
pub struct MockRollupNode {
    state: Mutex<MockState>,
}

#[derive(Debug)]
struct MockState {
    fee_juice_address: Address,
    primary_supported: bool,
    balance: u128,
    scripted: VecDeque<u128>,
    failing_reads: u32,
    pending_credits: Vec<PendingCredit>,
    messages: HashMap<[u8; 32], MessageState>,
    message_checks_fail: bool,
    balance_reads: u64,
    message_checks: u64,
    last_storage_slot: Option<[u8; 32]>,
}

#[derive(Debug, Clone, Copy)]
struct PendingCredit {
    amount: u128,
    reads_left: u32,
}

#[derive(Debug, Clone, Copy)]
struct MessageState {
    checks_until_ready: u32,
}

impl MockRollupNode {
    pub fn new(fee_juice_address: Address) -> Self {
        Self {
            state: Mutex::new(MockState {
                fee_juice_address,
                primary_supported: true,
                balance: 0,
                scripted: VecDeque::new(),
                failing_reads: 0,
                pending_credits: Vec::new(),
                messages: HashMap::new(),
                message_checks_fail: false,
                balance_reads: 0,
                message_checks: 0,
                last_storage_slot: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A poisoned mock only happens after a test already panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Primary read path reports `Unsupported`; reads go through storage.
    pub fn without_primary_read(self) -> Self {
        self.lock().primary_supported = false;
        self
    }

    pub fn set_balance(&self, balance: u128) {
        self.lock().balance = balance;
    }

    /// Queue balances returned by successive reads; the last one sticks.
    pub fn script_balances(&self, balances: impl IntoIterator<Item = u128>) {
        self.lock().scripted.extend(balances);
    }

    /// Fail the next `n` logical balance reads on both read paths.
    pub fn fail_balance_reads(&self, n: u32) {
        self.lock().failing_reads = n;
    }

    /// Credit `amount` once `after_reads` more balance reads have happened.
    pub fn schedule_credit(&self, amount: u128, after_reads: u32) {
        self.lock().pending_credits.push(PendingCredit {
            amount,
            reads_left: after_reads,
        });
    }

    /// Register a bridge message that becomes ready after `checks` readiness checks.
    pub fn register_message(&self, message_hash: [u8; 32], checks: u32) {
        self.lock().messages.insert(
            message_hash,
            MessageState {
                checks_until_ready: checks,
            },
        );
    }

    pub fn fail_message_checks(&self, fail: bool) {
        self.lock().message_checks_fail = fail;
    }

    pub fn balance_reads(&self) -> u64 {
        self.lock().balance_reads
    }

    pub fn message_checks(&self) -> u64 {
        self.lock().message_checks
    }

    pub fn last_storage_slot(&self) -> Option<[u8; 32]> {
        self.lock().last_storage_slot
    }

    fn next_balance(st: &mut MockState) -> u128 {
        st.balance_reads = st.balance_reads.saturating_add(1);
        if let Some(v) = st.scripted.pop_front() {
            st.balance = v;
        }
        for c in st.pending_credits.iter_mut() {
            c.reads_left = c.reads_left.saturating_sub(1);
        }
        let credits = std::mem::take(&mut st.pending_credits);
        let (due, later): (Vec<PendingCredit>, Vec<PendingCredit>) =
            credits.into_iter().partition(|c| c.reads_left == 0);
        st.pending_credits = later;
        for c in due {
            st.balance = st.balance.saturating_add(c.amount);
        }
        st.balance
    }
}

#[async_trait]
impl RollupNode for MockRollupNode {
    async fn node_info(&self) -> Result<NodeInfo, RollupError> {
        Ok(NodeInfo {
            fee_juice_address: self.lock().fee_juice_address,
            l1_chain_id: 31_337,
            node_version: "mock".to_string(),
        })
    }

    async fn read_public_balance(
        &self,
        _token: &Address,
        _owner: &Address,
    ) -> Result<u128, RollupError> {
        let mut st = self.lock();
        if !st.primary_supported {
            return Err(RollupError::Unsupported("mock primary read disabled".to_string()));
        }
        if st.failing_reads > 0 {
            // The fallback consumes the failure budget.
            return Err(RollupError::Network("mock primary read failure".to_string()));
        }
        Ok(Self::next_balance(&mut st))
    }

    async fn public_storage_at(
        &self,
        _contract: &Address,
        slot: &[u8; 32],
    ) -> Result<[u8; 32], RollupError> {
        let mut st = self.lock();
        st.last_storage_slot = Some(*slot);
        if st.failing_reads > 0 {
            st.failing_reads -= 1;
            return Err(RollupError::Network("mock storage read failure".to_string()));
        }
        Ok(u128_word(Self::next_balance(&mut st)))
    }

    async fn is_l1_to_l2_message_ready(
        &self,
        message_hash: &[u8; 32],
    ) -> Result<bool, RollupError> {
        let mut st = self.lock();
        st.message_checks = st.message_checks.saturating_add(1);
        if st.message_checks_fail {
            return Err(RollupError::Rpc("mock message check failure".to_string()));
        }
        match st.messages.get_mut(message_hash) {
            None => Ok(false),
            Some(m) if m.checks_until_ready == 0 => Ok(true),
            Some(m) => {
                m.checks_until_ready -= 1;
                Ok(false)
            }
        }
    }
}
