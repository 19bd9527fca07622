// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! OperationClassifier: maps a mempool operation to its validation pass
//! (spec.md §4.7).

use crate::types::MempoolOperation;

/// `endorsement -> 0`; `proposals | ballot -> 1`;
/// `seed_nonce_revelation | double_endorsement_evidence |
/// double_baking_evidence | activate_account -> 2`; anything else -> 3.
/// Multi-content operations always land in pass 3.
pub fn classify(operation: &MempoolOperation) -> usize {
    let [only] = operation.contents.as_slice() else {
        return 3;
    };
    match only.get("kind").and_then(|k| k.as_str()) {
        Some("endorsement") => 0,
        Some("proposals") | Some("ballot") => 1,
        Some("seed_nonce_revelation")
        | Some("double_endorsement_evidence")
        | Some("double_baking_evidence")
        | Some("activate_account") => 2,
        _ => 3,
    }
}
