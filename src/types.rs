// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Shared domain types (spec.md §3). RPC payloads are kept as
//! `serde_json::Value` wherever this crate only forwards fields it does not
//! itself interpret (design note §9: "dynamic JSON at the boundary").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable within one tick; replaced atomically at the start of the next.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct HeadSnapshot {
    pub chain_id: String,
    pub protocol_id: String,
    pub block_hash: String,
    pub level: i32,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EndorsingRight {
    pub level: i32,
    pub delegate: String,
    #[serde(default)]
    pub slots: Vec<u16>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BakingRight {
    pub level: i32,
    pub delegate: String,
    pub priority: u16,
    pub estimated_time: Option<String>,
}

/// One operation as reported by `pending_operations`. `raw` carries the
/// original JSON node object untouched, because forging/preapply need the
/// exact shape the node emitted.
#[derive(Clone, Debug, Deserialize)]
pub struct MempoolOperation {
    pub hash: String,
    pub branch: String,
    #[serde(default)]
    pub contents: Vec<Value>,
    #[serde(flatten)]
    pub raw: Value,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MempoolPool {
    #[serde(default)]
    pub applied: Vec<MempoolOperation>,
    #[serde(default)]
    pub refused: Value,
    #[serde(default)]
    pub branch_refused: Value,
    #[serde(default)]
    pub branch_delayed: Value,
}

/// One of the four validation-pass lanes the node groups block operations
/// into (spec.md §4.7).
pub type OperationsMatrix = [Vec<Value>; 4];

pub fn empty_operations_matrix() -> OperationsMatrix {
    [Vec::new(), Vec::new(), Vec::new(), Vec::new()]
}

/// Result of `preapply/block`: the (possibly adjusted) shell header plus the
/// per-pass applied-operation lists used to normalize the candidate
/// (spec.md §4.4 step 6).
#[derive(Clone, Debug)]
pub struct PreapplyBlockResult {
    pub shell_header: Value,
    pub operations: OperationsMatrix,
}

/// Created by Baker; consumed by Injector exactly once (spec.md §3).
#[derive(Clone, Debug)]
pub struct PendingCandidate {
    pub target_level: i32,
    pub target_timestamp: i64,
    pub chain_id: String,
    pub signed_block_bytes: String,
    pub operations: OperationsMatrix,
    pub commitment_seed: Option<[u8; 32]>,
    pub seed_nonce_hash: Option<String>,
}

/// Created when Baker produces a block at a commitment level; persisted via
/// NonceStore until reveal or abandonment (spec.md §3).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CommitmentNonce {
    pub level: i32,
    #[serde(with = "hex_bytes32")]
    pub seed: [u8; 32],
    pub seed_nonce_hash: String,
    pub injected_block_hash: String,
    pub revealed: bool,
}

mod hex_bytes32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(&s).map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}
