// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! MempoolGate: debounces block assembly until enough endorsements are
//! visible in the mempool (spec.md §4.5).

use crate::config::MEMPOOL_GATE_MAX_RETRIES;
use crate::types::MempoolPool;

#[derive(Debug)]
pub struct MempoolGate {
    required_endorsements: u32,
    rejections: u32,
}

impl MempoolGate {
    pub fn new() -> Self {
        MempoolGate {
            required_endorsements: 0,
            rejections: 0,
        }
    }

    pub fn required_endorsements(&self) -> u32 {
        self.required_endorsements
    }

    /// Preapply learned it needs more visible endorsements than we thought
    /// (spec.md §4.4 step 5); resets the rejection counter so the new
    /// requirement gets its own full retry budget.
    pub fn set_required_endorsements(&mut self, required: u32) {
        self.required_endorsements = required;
        self.rejections = 0;
    }

    /// `true` if the pool has enough visible endorsements (or forced
    /// acceptance has kicked in after 10 rejections).
    pub fn accept(&mut self, pool: &MempoolPool) -> bool {
        if self.required_endorsements == 0 {
            return true;
        }
        let visible = pool
            .applied
            .iter()
            .filter(|op| op.contents.iter().any(|c| c.get("kind").and_then(|k| k.as_str()) == Some("endorsement")))
            .count() as u32;

        if visible >= self.required_endorsements {
            self.required_endorsements = 0;
            self.rejections = 0;
            return true;
        }

        self.rejections += 1;
        self.rejections >= MEMPOOL_GATE_MAX_RETRIES
    }
}

impl Default for MempoolGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::types::MempoolOperation;

    fn pool_with_endorsements(n: usize) -> MempoolPool {
        let applied = (0..n)
            .map(|i| MempoolOperation {
                hash: format!("op{i}"),
                branch: "b".into(),
                contents: vec![json!({ "kind": "endorsement" })],
                raw: json!({}),
            })
            .collect();
        MempoolPool {
            applied,
            ..Default::default()
        }
    }

    #[test]
    fn unconditional_first_attempt() {
        let mut gate = MempoolGate::new();
        assert!(gate.accept(&pool_with_endorsements(0)));
    }

    #[test]
    fn accepts_once_enough_endorsements_visible() {
        let mut gate = MempoolGate::new();
        gate.set_required_endorsements(3);
        assert!(!gate.accept(&pool_with_endorsements(2)));
        assert!(gate.accept(&pool_with_endorsements(3)));
        assert_eq!(gate.required_endorsements(), 0);
    }

    #[test]
    fn forces_acceptance_exactly_after_ten_rejections() {
        let mut gate = MempoolGate::new();
        gate.set_required_endorsements(100);
        for i in 1..10 {
            assert!(
                !gate.accept(&pool_with_endorsements(0)),
                "rejection {i} should not yet force acceptance"
            );
        }
        assert!(gate.accept(&pool_with_endorsements(0)));
    }
}
