// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Endorser / Revealer: the shared forge-sign-preapply-inject pipeline used
//! for both endorsements and seed-nonce-revelations (spec.md §4.3).

use serde_json::{json, Value};
use slog::Logger;

use crate::error::NodeError;
use crate::node_client::NodeClient;
use crate::signer::{chain_id_bytes, KeyProvider, Watermark};
use crate::types::HeadSnapshot;

/// `{branch: head.block_hash, contents: [{kind: "endorsement", level}]}`.
pub fn endorsement_content(head: &HeadSnapshot) -> Value {
    json!({
        "branch": head.block_hash,
        "contents": [{ "kind": "endorsement", "level": head.level }],
    })
}

/// `{branch: head.block_hash, contents: [{kind: "seed_nonce_revelation",
/// level, nonce}]}`.
pub fn reveal_content(head: &HeadSnapshot, level: i32, seed_hex: &str) -> Value {
    json!({
        "branch": head.block_hash,
        "contents": [{
            "kind": "seed_nonce_revelation",
            "level": level,
            "nonce": seed_hex,
        }],
    })
}

/// Runs forge -> sign -> attach -> set protocol -> preapply -> inject for a
/// single-content operation, returning the injected operation hash.
///
/// `watermark` is `Watermark::Endorsement` for both endorsements and
/// seed-nonce-revelations, per the shared pipeline description in spec.md
/// §4.3.
pub async fn forge_sign_preapply_inject(
    node: &dyn NodeClient,
    signer: &dyn KeyProvider,
    head: &HeadSnapshot,
    content: Value,
    watermark: Watermark,
    log: &Logger,
) -> Result<String, NodeError> {
    let forged_hex = node
        .forge_operation(&head.chain_id, &head.block_hash, &content)
        .await?;
    let forged_bytes = hex::decode(&forged_hex)?;

    let chain_bytes = chain_id_bytes(&head.chain_id);
    let signed = signer
        .sign(&forged_bytes, watermark, &chain_bytes)
        .map_err(|err| NodeError::Rejected {
            status: 0,
            body: err.to_string(),
        })?;

    let mut operation = content;
    operation["signature"] = Value::String(signed.prefix_sig.clone());
    operation["protocol"] = Value::String(head.protocol_id.clone());

    node.preapply_operations(&head.chain_id, &head.block_hash, &json!([operation]))
        .await?;

    slog::debug!(log, "preapplied operation at level {}", head.level);
    node.inject_operation(&signed.sbytes).await
}
