// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Injector: delayed injection of signed candidates at their timestamp
//! (spec.md §4.1 step 1, §3 invariant 6).

use std::collections::HashSet;

use slog::Logger;

use crate::error::NodeError;
use crate::node_client::NodeClient;
use crate::types::{CommitmentNonce, PendingCandidate};

pub struct DrainOutcome {
    /// Candidates still waiting on their timestamp; carried into the next tick.
    pub retained: Vec<PendingCandidate>,
    /// A nonce record to persist for each commitment-seed candidate that
    /// injected successfully.
    pub new_nonces: Vec<CommitmentNonce>,
}

/// Drains `pending` against `head_level`/`now`, injecting each candidate
/// whose timestamp has arrived and whose level has not already been acted
/// on. Mutates `injected_levels` and `bad_ops` in place, matching the
/// "insert into the marker set before the RPC begins" rule in spec.md §5.
pub async fn drain(
    node: &dyn NodeClient,
    pending: Vec<PendingCandidate>,
    head_level: i32,
    now: i64,
    injected_levels: &mut HashSet<i32>,
    bad_ops: &mut HashSet<String>,
    log: &Logger,
) -> DrainOutcome {
    let mut retained = Vec::new();
    let mut new_nonces = Vec::new();

    for candidate in pending {
        // Invariant 6: discard any candidate whose target_level <= head.level.
        if candidate.target_level <= head_level {
            slog::info!(
                log,
                "dropping stale candidate for level {} (head at {})",
                candidate.target_level,
                head_level
            );
            continue;
        }
        if candidate.target_timestamp > now {
            retained.push(candidate);
            continue;
        }
        if injected_levels.contains(&candidate.target_level) {
            continue;
        }

        injected_levels.insert(candidate.target_level);

        match node
            .inject_block(&candidate.chain_id, &candidate.signed_block_bytes)
            .await
        {
            Ok(hash) => {
                slog::info!(log, "+Injected block {} at level {}", hash, candidate.target_level);
                if let (Some(seed), Some(seed_nonce_hash)) =
                    (candidate.commitment_seed, candidate.seed_nonce_hash.clone())
                {
                    new_nonces.push(CommitmentNonce {
                        level: candidate.target_level,
                        seed,
                        seed_nonce_hash,
                        injected_block_hash: hash,
                        revealed: false,
                    });
                }
            }
            Err(err) => {
                let offenders = err.offending_operation_hashes();
                if !offenders.is_empty() {
                    slog::warn!(log, "injection rejected operations: {:?}", offenders);
                    bad_ops.extend(offenders);
                } else {
                    slog::error!(log, "!Couldn't inject block for level {}: {}", candidate.target_level, err);
                }
            }
        }
    }

    DrainOutcome {
        retained,
        new_nonces,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_client::mock::MockNodeClient;
    use crate::types::HeadSnapshot;
    use slog::{o, Discard};

    fn test_logger() -> Logger {
        Logger::root(Discard, o!())
    }

    fn candidate(target_level: i32, target_timestamp: i64) -> PendingCandidate {
        PendingCandidate {
            target_level,
            target_timestamp,
            chain_id: "chain".into(),
            signed_block_bytes: "deadbeef".into(),
            operations: crate::types::empty_operations_matrix(),
            commitment_seed: None,
            seed_nonce_hash: None,
        }
    }

    #[tokio::test]
    async fn discards_candidates_at_or_below_head() {
        let node = MockNodeClient::new(HeadSnapshot {
            chain_id: "chain".into(),
            protocol_id: "P".into(),
            block_hash: "BL".into(),
            level: 100,
            timestamp: 0,
        });
        let log = test_logger();
        let mut injected_levels = HashSet::new();
        let mut bad_ops = HashSet::new();

        let outcome = drain(
            &node,
            vec![candidate(100, 0), candidate(99, 0)],
            100,
            1000,
            &mut injected_levels,
            &mut bad_ops,
            &log,
        )
        .await;

        assert!(outcome.retained.is_empty());
        assert!(node.injected_blocks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retains_candidates_with_future_timestamp() {
        let node = MockNodeClient::new(HeadSnapshot {
            chain_id: "chain".into(),
            protocol_id: "P".into(),
            block_hash: "BL".into(),
            level: 100,
            timestamp: 0,
        });
        let log = test_logger();
        let mut injected_levels = HashSet::new();
        let mut bad_ops = HashSet::new();

        let outcome = drain(
            &node,
            vec![candidate(101, 5000)],
            100,
            1000,
            &mut injected_levels,
            &mut bad_ops,
            &log,
        )
        .await;

        assert_eq!(outcome.retained.len(), 1);
        assert!(node.injected_blocks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn injects_once_and_never_again_for_same_level() {
        let node = MockNodeClient::new(HeadSnapshot {
            chain_id: "chain".into(),
            protocol_id: "P".into(),
            block_hash: "BL".into(),
            level: 100,
            timestamp: 0,
        });
        let log = test_logger();
        let mut injected_levels = HashSet::new();
        let mut bad_ops = HashSet::new();

        let outcome = drain(
            &node,
            vec![candidate(101, 0)],
            100,
            1000,
            &mut injected_levels,
            &mut bad_ops,
            &log,
        )
        .await;
        assert!(outcome.retained.is_empty());
        assert_eq!(node.injected_blocks.lock().unwrap().len(), 1);
        assert!(injected_levels.contains(&101));

        // A second drain call at the same level is a no-op (uniqueness, spec.md §8.1).
        let outcome2 = drain(
            &node,
            vec![candidate(101, 0)],
            100,
            1000,
            &mut injected_levels,
            &mut bad_ops,
            &log,
        )
        .await;
        assert!(outcome2.retained.is_empty());
        assert_eq!(node.injected_blocks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injection_failure_learns_bad_ops_and_drops_candidate() {
        let node = MockNodeClient::new(HeadSnapshot {
            chain_id: "chain".into(),
            protocol_id: "P".into(),
            block_hash: "BL".into(),
            level: 100,
            timestamp: 0,
        });
        *node.inject_block_error.lock().unwrap() =
            Some(r#"[{"operation": "opHashX"}]"#.to_string());
        let log = test_logger();
        let mut injected_levels = HashSet::new();
        let mut bad_ops = HashSet::new();

        let outcome = drain(
            &node,
            vec![candidate(101, 0)],
            100,
            1000,
            &mut injected_levels,
            &mut bad_ops,
            &log,
        )
        .await;

        assert!(outcome.retained.is_empty());
        assert!(bad_ops.contains("opHashX"));
    }
}
