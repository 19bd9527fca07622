// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Network presets and cycle geometry (spec.md §3, §6).

/// Parameters that vary per network: cycle length, commitment interval, and
/// the commitment-level offset (1 on the small test net, 0 elsewhere).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkPreset {
    pub cycle_length: i32,
    pub commitment_interval: i32,
    pub commitment_offset: i32,
}

impl NetworkPreset {
    pub const MAINNET: NetworkPreset = NetworkPreset {
        cycle_length: 4096,
        commitment_interval: 32,
        commitment_offset: 0,
    };

    pub const TESTNET: NetworkPreset = NetworkPreset {
        cycle_length: 2048,
        commitment_interval: 32,
        commitment_offset: 0,
    };

    pub const ZERONET: NetworkPreset = NetworkPreset {
        cycle_length: 128,
        commitment_interval: 32,
        commitment_offset: 1,
    };

    pub fn by_name(name: &str) -> Option<NetworkPreset> {
        match name {
            "mainnet" => Some(Self::MAINNET),
            "testnet" => Some(Self::TESTNET),
            "zeronet" => Some(Self::ZERONET),
            _ => None,
        }
    }

    /// `levelToCycle(l) = floor((l-1) / cycleLength)`
    pub fn level_to_cycle(&self, level: i32) -> i32 {
        (level - 1).div_euclid(self.cycle_length)
    }

    /// `cycleStart(c) = c*cycleLength + 1`
    pub fn cycle_start(&self, cycle: i32) -> i32 {
        cycle * self.cycle_length + 1
    }

    /// `cycleEnd(c) = cycleStart(c) + cycleLength - 1`
    pub fn cycle_end(&self, cycle: i32) -> i32 {
        self.cycle_start(cycle) + self.cycle_length - 1
    }

    /// Level `l` is a commitment level iff `l mod commitmentInterval == commitmentOffset`.
    pub fn is_commitment_level(&self, level: i32) -> bool {
        level.rem_euclid(self.commitment_interval) == self.commitment_offset
    }

    /// The cycle in which a nonce committed at `level` must be revealed.
    pub fn reveal_cycle(&self, commitment_level: i32) -> i32 {
        self.level_to_cycle(commitment_level) + 1
    }
}

/// `powHeader` is the same constant across all three networks (spec.md §6).
pub const POW_HEADER: &str = "00000003";

/// `2^46 - 1`, the proof-of-work stamp threshold for the networks in scope.
pub const STAMP_THRESHOLD: u64 = 70_368_744_177_663;

/// Attempts to hash every `SYNC_BATCH_SIZE` StampSearch iterations before
/// cooperatively yielding back to the scheduler (spec.md §4.6).
pub const SYNC_BATCH_SIZE: u32 = 2_000;

/// Bound on MempoolGate rejections before forced acceptance (spec.md §4.5).
pub const MEMPOOL_GATE_MAX_RETRIES: u32 = 10;

/// Bound on Baker's preapply/mempool-gate restart loop (spec.md §4.4 step 2).
pub const BAKER_GATE_RETRY_LIMIT: u32 = 10;
