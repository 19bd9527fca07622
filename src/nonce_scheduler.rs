// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! NonceScheduler: tracks per-seed reveal/abandon windows (spec.md §4.2).

use slog::Logger;

use crate::config::NetworkPreset;
use crate::types::CommitmentNonce;

/// Outcome of a single scheduler pass, handed back to the caller so it can
/// drive the reveal RPC (§4.3) without this module depending on NodeClient
/// directly.
pub struct SchedulerOutcome {
    /// Nonces whose reveal window has opened; the caller reveals each and
    /// then drops it.
    pub due_for_reveal: Vec<CommitmentNonce>,
    /// Nonces still queued, unchanged.
    pub still_queued: Vec<CommitmentNonce>,
    /// `true` if any nonce was dropped (revealed or abandoned) this pass,
    /// meaning NonceStore needs rewriting.
    pub changed: bool,
}

/// For each outstanding nonce with level `l`: if `head.level` is past the
/// reveal cycle's end, abandon it (log + drop, no RPC). Else if
/// `head.level` has reached the reveal cycle's start and it is not yet
/// revealed, it is due for reveal. Otherwise it stays queued.
pub fn pass(
    network: &NetworkPreset,
    nonces: Vec<CommitmentNonce>,
    head_level: i32,
    log: &Logger,
) -> SchedulerOutcome {
    let mut due_for_reveal = Vec::new();
    let mut still_queued = Vec::new();
    let mut changed = false;

    for nonce in nonces {
        let cycle = network.reveal_cycle(nonce.level);
        let start = network.cycle_start(cycle);
        let end = network.cycle_end(cycle);

        if head_level > end {
            slog::warn!(
                log,
                "!Abandon nonce for level {} (reveal window [{}, {}] closed at head {})",
                nonce.level,
                start,
                end,
                head_level
            );
            changed = true;
        } else if head_level >= start && !nonce.revealed {
            due_for_reveal.push(nonce);
            changed = true;
        } else {
            still_queued.push(nonce);
        }
    }

    SchedulerOutcome {
        due_for_reveal,
        still_queued,
        changed,
    }
}
