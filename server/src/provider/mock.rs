//! Scriptable in-memory provider used by the test suites.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DealError, ProposalAck, ProviderClient, ProviderDealState, SignedProposal};

/// A provider whose status responses follow a fixed script, then settle on
/// a fallback state. Proposals are recorded for inspection.
pub struct MockProviderClient {
    accept_reason: Mutex<Option<DealError>>,
    script: Mutex<VecDeque<ProviderDealState>>,
    fallback: Mutex<ProviderDealState>,
    pub proposals: Mutex<Vec<(String, SignedProposal)>>,
}

impl MockProviderClient {
    pub fn new() -> Self {
        Self {
            accept_reason: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ProviderDealState::Sealed { deal_id: 73001 }),
            proposals: Mutex::new(Vec::new()),
        }
    }

    /// Reject every proposal with the given error.
    pub fn rejecting(error: DealError) -> Self {
        let mock = Self::new();
        *mock.accept_reason.lock().unwrap() = Some(error);
        mock
    }

    /// Play these states in order from `deal_status`, then stay on `fallback`.
    pub fn with_script(self, states: Vec<ProviderDealState>, fallback: ProviderDealState) -> Self {
        *self.script.lock().unwrap() = states.into();
        *self.fallback.lock().unwrap() = fallback;
        self
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.lock().unwrap().len()
    }
}

impl Default for MockProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn propose_deal(
        &self,
        miner: &str,
        proposal: &SignedProposal,
    ) -> Result<ProposalAck, DealError> {
        if let Some(error) = self.accept_reason.lock().unwrap().clone() {
            return Err(error);
        }
        let mut proposals = self.proposals.lock().unwrap();
        proposals.push((miner.to_string(), proposal.clone()));
        Ok(ProposalAck {
            deal_uuid: format!("mock-deal-{}", proposals.len()),
        })
    }

    async fn deal_status(
        &self,
        _miner: &str,
        _deal_uuid: &str,
    ) -> Result<ProviderDealState, DealError> {
        if let Some(state) = self.script.lock().unwrap().pop_front() {
            return Ok(state);
        }
        Ok(self.fallback.lock().unwrap().clone())
    }
}
