//! From a transaction hash to a source-level stack trace.

use std::sync::Arc;
use std::time::Duration;

use ethereum_types::H256;
use tracing::{debug, info, warn};

use crate::client::EthClient;
use crate::error::{ReplayError, TracerError};
use crate::replay::{Replayer, TransactionState};
use crate::stacktrace::{ContractSource, StackFrame, generate_stack_trace, trace_text};
use crate::types::TransactionReceipt;

/// Replays and traces failed transactions.
#[derive(Clone)]
pub struct Tracer {
    replayer: Replayer,
    contracts: Arc<dyn ContractSource>,
    replay: bool,
    force: bool,
}

impl Tracer {
    /// `replay` re-executes the transaction before tracing it; `force` accepts a
    /// replay whose gas differs from the receipt.
    pub fn new(replayer: Replayer, contracts: Arc<dyn ContractSource>, replay: bool, force: bool) -> Self {
        Self {
            replayer,
            contracts,
            replay,
            force,
        }
    }

    pub fn client(&self) -> &EthClient {
        self.replayer.client()
    }

    pub async fn replay(&self, hash: H256) -> Result<TransactionState, ReplayError> {
        self.replayer.process_transaction(hash, self.force).await
    }

    /// Stack frames of `hash`, empty for contract creations and transactions
    /// that did not revert.
    pub async fn frames(&self, hash: H256) -> Result<Vec<StackFrame>, TracerError> {
        if self.replay {
            let state = self.replay(hash).await?;
            debug!(
                tx = ?hash,
                gas_used = state.gas_used,
                accounts = state.touched_accounts.len(),
                "replayed transaction"
            );
        }

        let client = self.client();
        let tx = client
            .transaction(hash)
            .await?
            .ok_or(ReplayError::TransactionNotFound(hash))?;
        let Some(to) = tx.to else {
            debug!(tx = ?hash, "contract creation, nothing to trace");
            return Ok(Vec::new());
        };

        let trace = client.transaction_trace(hash).await?;
        let frames =
            generate_stack_trace(self.contracts.as_ref(), &format!("{to:#x}"), &trace.steps).await?;
        info!(tx = ?hash, frames = frames.len(), "generated stack trace");
        Ok(frames)
    }

    /// Trace text of `hash`, `None` when no frame was recorded.
    pub async fn trace(&self, hash: H256) -> Result<Option<String>, TracerError> {
        let frames = self.frames(hash).await?;
        Ok(trace_text(&frames))
    }
}

/// Poll for the receipt of `hash` until it is mined or `attempts` run out.
pub async fn wait_for_receipt(
    client: &EthClient,
    hash: H256,
    attempts: u32,
    interval: Duration,
) -> Option<TransactionReceipt> {
    for attempt in 0..attempts {
        match client.transaction_receipt(hash).await {
            Ok(Some(receipt)) => return Some(receipt),
            Ok(None) => {}
            Err(e) => debug!(tx = ?hash, attempt, error = %e, "receipt poll failed"),
        }
        tokio::time::sleep(interval).await;
    }
    warn!(tx = ?hash, attempts, "receipt not available");
    None
}
