//! Polling barrier over the outputs of parallel transcode jobs.
//!
//! The engine has no completion callback, so the gate checks storage for
//! every expected key until all of them exist, the deadline passes, or the
//! caller cancels. The wait between rounds doubles up to a bound.

use std::collections::BTreeSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollPolicy;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::storage::StoragePort;

pub struct CompletionGate<'a, S> {
    storage: &'a S,
    policy: PollPolicy,
}

impl<'a, S> CompletionGate<'a, S>
where
    S: StoragePort,
{
    pub fn new(storage: &'a S, policy: PollPolicy) -> Self {
        Self { storage, policy }
    }

    /// Wait until every key in `expected` exists in `bucket`.
    ///
    /// A failed existence check keeps the key pending; only the deadline or
    /// the token ends the wait early.
    pub async fn await_all(
        &self,
        bucket: &str,
        expected: &[String],
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        if expected.is_empty() {
            return Err(PipelineError::NoData);
        }

        let mut pending: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
        let total = pending.len();
        // A timeout beyond the clock's range never expires.
        let deadline = Instant::now().checked_add(self.policy.timeout);
        let mut interval = self.policy.initial_interval;
        let mut round = 0u32;

        info!(bucket, expected = total, timeout = ?self.policy.timeout, "Waiting for parts");

        loop {
            round += 1;
            let mut observed = Vec::new();
            for key in pending.iter().copied() {
                match self.storage.head_object(bucket, key).await {
                    Ok(Some(_)) => observed.push(key),
                    Ok(None) => debug!(bucket, key, round, "Part not there yet"),
                    Err(e) => debug!(bucket, key, round, error = %e, "Part check failed"),
                }
            }
            for key in observed {
                pending.remove(key);
            }

            if pending.is_empty() {
                info!(bucket, expected = total, rounds = round, "All parts present");
                return Ok(());
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                warn!(
                    bucket,
                    missing = pending.len(),
                    expected = total,
                    rounds = round,
                    "Gave up waiting for parts"
                );
                return Err(PipelineError::IncompleteParts {
                    missing: pending.len(),
                    expected: total,
                });
            }

            let wait = match deadline {
                Some(deadline) => interval.min(deadline - now),
                None => interval,
            };
            debug!(pending = pending.len(), wait = ?wait, "Sleeping before next round");
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(bucket, missing = pending.len(), "Wait for parts cancelled");
                    return Err(PipelineError::Cancelled);
                }
                _ = sleep(wait) => {}
            }
            interval = interval.saturating_mul(2).min(self.policy.max_interval);
        }
    }
}
