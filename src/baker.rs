// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Baker: assemble candidate, preapply, stamp-search, sign, enqueue
//! (spec.md §4.4).

use std::collections::HashSet;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;
use slog::Logger;

use crate::classifier;
use crate::clock::ClockAdapter;
use crate::config::{NetworkPreset, BAKER_GATE_RETRY_LIMIT, POW_HEADER, STAMP_THRESHOLD};
use crate::error::NodeError;
use crate::mempool_gate::MempoolGate;
use crate::node_client::NodeClient;
use crate::protocol_data;
use crate::signer::{blake2b_256, chain_id_bytes, KeyProvider, Watermark};
use crate::stamp;
use crate::types::{empty_operations_matrix, HeadSnapshot, OperationsMatrix, PendingCandidate};

const GATE_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct BakeRequest<'a> {
    pub head: &'a HeadSnapshot,
    pub priority: u16,
    pub scheduled_timestamp: i64,
    pub network: &'a NetworkPreset,
    pub bad_ops: &'a HashSet<String>,
}

/// A fresh commitment seed and its derivatives, drawn when `head.level + 1`
/// is a commitment level (spec.md §4.4 step 1).
struct Commitment {
    seed: [u8; 32],
    seed_nonce_hash_b58: String,
    seed_hash_hex: String,
}

fn maybe_draw_commitment(network: &NetworkPreset, target_level: i32) -> Option<Commitment> {
    if !network.is_commitment_level(target_level) {
        return None;
    }
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let seed_hash = blake2b_256(&seed);
    Some(Commitment {
        seed,
        seed_nonce_hash_b58: bs58::encode(seed_hash).with_check().into_string(),
        seed_hash_hex: hex::encode(seed_hash),
    })
}

pub async fn bake(
    node: &dyn NodeClient,
    signer: &dyn KeyProvider,
    clock: &dyn ClockAdapter,
    request: BakeRequest<'_>,
    log: &Logger,
) -> Result<PendingCandidate, NodeError> {
    let head = request.head;
    let target_level = head.level + 1;
    let commitment = maybe_draw_commitment(request.network, target_level);
    let seed_hex = commitment
        .as_ref()
        .map(|c| c.seed_hash_hex.as_str())
        .unwrap_or("");

    let mut gate = MempoolGate::new();
    // Gate-wait exhaustion (spec.md §4.4 step 2) and the insufficient-
    // endorsements preapply restart (step 5) are bounded separately: the
    // former is "the mempool never reports enough endorsements," the
    // latter is "the node keeps raising the bar after we preapply." Each
    // gets its own BAKER_GATE_RETRY_LIMIT budget so one doesn't starve the
    // other.
    let mut gate_retries = 0u32;
    let mut preapply_restarts = 0u32;

    let (operations, preapply_shell_header) = loop {
        let pool = node
            .get_pending_operations(&head.chain_id, &head.block_hash)
            .await?;

        let gate_exhausted = gate_retries >= BAKER_GATE_RETRY_LIMIT;
        if !gate_exhausted && !gate.accept(&pool) {
            gate_retries += 1;
            clock.sleep(GATE_POLL_INTERVAL).await;
            continue;
        }
        if gate_exhausted {
            slog::warn!(
                log,
                "!Couldn't satisfy mempool gate after {} attempts at level {}, proceeding regardless",
                BAKER_GATE_RETRY_LIMIT,
                target_level
            );
        }

        let operations = select_operations(&pool, &head.block_hash, request.bad_ops);
        let template = build_template_header(
            request.priority,
            &head.protocol_id,
            &operations,
            commitment.as_ref().map(|c| c.seed_nonce_hash_b58.as_str()),
        );
        let timestamp = std::cmp::max(clock.now(), request.scheduled_timestamp);

        match node
            .preapply_block(&head.chain_id, &head.block_hash, &template, timestamp)
            .await
        {
            Ok(result) => break (result.operations, result.shell_header),
            Err(err) => {
                if let Some(required) = err.required_endorsements() {
                    if preapply_restarts < BAKER_GATE_RETRY_LIMIT {
                        preapply_restarts += 1;
                        slog::info!(log, "preapply wants {} endorsements, retrying", required);
                        gate.set_required_endorsements(required);
                        clock.sleep(GATE_POLL_INTERVAL).await;
                        continue;
                    }
                    slog::warn!(
                        log,
                        "!Couldn't satisfy required endorsements after {} restarts at level {}, proceeding regardless",
                        BAKER_GATE_RETRY_LIMIT,
                        target_level
                    );
                }
                slog::warn!(log, "preapply failed ({err}), retrying with an empty operations matrix");
                let empty_template = build_template_header(
                    request.priority,
                    &head.protocol_id,
                    &empty_operations_matrix(),
                    commitment.as_ref().map(|c| c.seed_nonce_hash_b58.as_str()),
                );
                let result = node
                    .preapply_block(&head.chain_id, &head.block_hash, &empty_template, timestamp)
                    .await?;
                break (result.operations, result.shell_header);
            }
        }
    };

    // spec.md §4.4 step 7: mutate preapply's own shell-header object (which
    // carries the node-computed predecessor/timestamp/fitness/context/etc.)
    // rather than building a fresh one, so forging happens against a
    // complete header.
    let forged_hex = forge_shell_header(node, head, request.priority, preapply_shell_header).await?;
    let prefix_len = forged_hex
        .len()
        .saturating_sub(protocol_data::PLACEHOLDER_LEN_HEX);
    let forged_prefix = hex::decode(&forged_hex[..prefix_len])?;

    let candidate_bytes = stamp::search(
        &forged_prefix,
        request.priority,
        POW_HEADER,
        seed_hex,
        STAMP_THRESHOLD,
    )
    .await;

    let chain_bytes = chain_id_bytes(&head.chain_id);
    let signed = signer
        .sign(&candidate_bytes, Watermark::Block, &chain_bytes)
        .map_err(|err| NodeError::Rejected {
            status: 0,
            body: err.to_string(),
        })?;

    Ok(PendingCandidate {
        target_level,
        target_timestamp: request.scheduled_timestamp,
        chain_id: head.chain_id.clone(),
        signed_block_bytes: signed.sbytes,
        operations,
        commitment_seed: commitment.as_ref().map(|c| c.seed),
        seed_nonce_hash: commitment.map(|c| c.seed_nonce_hash_b58),
    })
}

/// From the pool's `applied` list, keep operations whose branch matches
/// head and whose hash is not blacklisted; dedup by hash; classify into the
/// 4-way matrix, preserving pool order within each slot (spec.md §4.4 step 3).
fn select_operations(
    pool: &crate::types::MempoolPool,
    head_block_hash: &str,
    bad_ops: &HashSet<String>,
) -> OperationsMatrix {
    let mut matrix = empty_operations_matrix();
    let mut seen = HashSet::new();

    for op in &pool.applied {
        if op.branch != head_block_hash {
            continue;
        }
        if bad_ops.contains(&op.hash) {
            continue;
        }
        if !seen.insert(op.hash.clone()) {
            continue;
        }
        let pass = classifier::classify(op);
        matrix[pass].push(op.raw.clone());
    }

    matrix
}

fn build_template_header(
    priority: u16,
    protocol: &str,
    operations: &OperationsMatrix,
    seed_nonce_hash: Option<&str>,
) -> serde_json::Value {
    let mut protocol_data = json!({
        "protocol": protocol,
        "priority": priority,
        "proof_of_work_nonce": "0000000000000000",
        "signature": "",
    });
    if let Some(hash) = seed_nonce_hash {
        protocol_data["seed_nonce_hash"] = json!(hash);
    }
    json!({
        "protocol_data": protocol_data,
        "operations": operations,
    })
}

/// Overwrites `shell_header.protocol_data` with the zero-pow/zero-signature
/// placeholder encoding and forges the result. `shell_header` is the object
/// preapply (steps 5-6) handed back, carrying the node-computed
/// `predecessor`/`timestamp`/`fitness`/`operations_hash`/`context`/etc. —
/// those fields must survive into the forge call, so this mutates that
/// object in place rather than building a fresh one (spec.md §4.4 step 7).
async fn forge_shell_header(
    node: &dyn NodeClient,
    head: &HeadSnapshot,
    priority: u16,
    mut shell_header: serde_json::Value,
) -> Result<String, NodeError> {
    let placeholder = protocol_data::encode(priority, "", "", "");
    match shell_header.as_object_mut() {
        Some(obj) => {
            obj.insert("protocol_data".to_string(), json!(placeholder));
        }
        None => shell_header = json!({ "protocol_data": placeholder }),
    }
    node.forge_block_header(&head.chain_id, &head.block_hash, &shell_header)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_client::mock::MockNodeClient;
    use crate::signer::mock::MockKeyProvider;
    use slog::{o, Discard};

    fn test_logger() -> Logger {
        Logger::root(Discard, o!())
    }

    fn head(level: i32) -> HeadSnapshot {
        HeadSnapshot {
            chain_id: "test-chain".into(),
            protocol_id: "PtProtocol".into(),
            block_hash: "BLhead".into(),
            level,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn s2_no_commitment_level_produces_no_seed_nonce_hash() {
        let h = head(4099); // next level 4100, 4100 mod 32 = 4
        let node = MockNodeClient::new(h.clone());
        let signer = MockKeyProvider::new("tz1Test");
        let clock = crate::clock::mock::MockClock::new(0);
        let log = test_logger();
        let bad_ops = HashSet::new();
        let network = NetworkPreset::MAINNET;

        let candidate = bake(
            &node,
            &signer,
            &clock,
            BakeRequest {
                head: &h,
                priority: 0,
                scheduled_timestamp: 0,
                network: &network,
                bad_ops: &bad_ops,
            },
            &log,
        )
        .await
        .unwrap();

        assert_eq!(candidate.target_level, 4100);
        assert!(candidate.seed_nonce_hash.is_none());
        assert!(candidate.commitment_seed.is_none());
    }

    #[tokio::test]
    async fn s3_commitment_level_draws_a_seed() {
        let h = head(4127); // next level 4128, 4128 mod 32 = 0
        let node = MockNodeClient::new(h.clone());
        let signer = MockKeyProvider::new("tz1Test");
        let clock = crate::clock::mock::MockClock::new(0);
        let log = test_logger();
        let bad_ops = HashSet::new();
        let network = NetworkPreset::MAINNET;

        let candidate = bake(
            &node,
            &signer,
            &clock,
            BakeRequest {
                head: &h,
                priority: 0,
                scheduled_timestamp: 0,
                network: &network,
                bad_ops: &bad_ops,
            },
            &log,
        )
        .await
        .unwrap();

        assert_eq!(candidate.target_level, 4128);
        assert!(candidate.seed_nonce_hash.is_some());
        assert!(candidate.commitment_seed.is_some());
    }

    #[tokio::test]
    async fn s6_bad_ops_excluded_from_selection() {
        let h = head(100);
        let node = MockNodeClient::new(h.clone());
        {
            let mut mempool = node.mempool.lock().unwrap();
            mempool.applied = vec![
                crate::types::MempoolOperation {
                    hash: "opHashX".into(),
                    branch: h.block_hash.clone(),
                    contents: vec![json!({ "kind": "transaction" })],
                    raw: json!({"hash": "opHashX"}),
                },
                crate::types::MempoolOperation {
                    hash: "opHashY".into(),
                    branch: h.block_hash.clone(),
                    contents: vec![json!({ "kind": "transaction" })],
                    raw: json!({"hash": "opHashY"}),
                },
            ];
        }
        let mut bad_ops = HashSet::new();
        bad_ops.insert("opHashX".to_string());

        let matrix = select_operations(&node.mempool.lock().unwrap(), &h.block_hash, &bad_ops);
        let all: Vec<_> = matrix.iter().flatten().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["hash"], "opHashY");
    }

    /// spec.md §4.4 step 2/5: a preapply restart that raises
    /// required_endorsements past what the mempool ever reports must still
    /// fall through (by the gate's own bounded-rejection rule) to
    /// select_operations/preapply rather than aborting with nothing selected.
    #[tokio::test]
    async fn gate_exhaustion_still_preapplies_instead_of_aborting() {
        let h = head(100);
        let node = MockNodeClient::new(h.clone());
        *node.preapply_block_error.lock().unwrap() = Some(NodeError::Rejected {
            status: 500,
            body: r#"{"required_endorsements": 5}"#.to_string(),
        });
        {
            let mut mempool = node.mempool.lock().unwrap();
            mempool.applied = vec![
                crate::types::MempoolOperation {
                    hash: "end1".into(),
                    branch: h.block_hash.clone(),
                    contents: vec![json!({ "kind": "endorsement" })],
                    raw: json!({"hash": "end1"}),
                },
                crate::types::MempoolOperation {
                    hash: "tx1".into(),
                    branch: h.block_hash.clone(),
                    contents: vec![json!({ "kind": "transaction" })],
                    raw: json!({"hash": "tx1"}),
                },
            ];
        }
        let signer = MockKeyProvider::new("tz1Test");
        let clock = crate::clock::mock::MockClock::new(0);
        let log = test_logger();
        let bad_ops = HashSet::new();
        let network = NetworkPreset::MAINNET;

        // First preapply rejects wanting 5 endorsements; the mempool only
        // ever reports 1, so the gate never re-accepts on its own and
        // gate_retries must exhaust before assembly proceeds.
        let candidate = bake(
            &node,
            &signer,
            &clock,
            BakeRequest {
                head: &h,
                priority: 0,
                scheduled_timestamp: 0,
                network: &network,
                bad_ops: &bad_ops,
            },
            &log,
        )
        .await
        .unwrap();

        let selected: usize = candidate.operations.iter().map(|pass| pass.len()).sum();
        assert_eq!(selected, 2, "exhausted gate must still select and preapply operations");
    }
}
