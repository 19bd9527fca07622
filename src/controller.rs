// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Controller: periodic tick that fetches head and dispatches the other
//! components in strict order (spec.md §4.1).
//!
//! Ticks run strictly sequentially in this implementation: each call to
//! [`Controller::tick`] completes before the next begins. Spec.md §5 allows
//! (but does not require) endorse/bake work dispatched within a tick to
//! overlap with later ticks; running them inline instead is a strict
//! subset of that behavior and satisfies every invariant in spec.md §8
//! with far less incidental complexity (see DESIGN.md's open-question
//! resolution for "concurrency direction").

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use slog::Logger;

use crate::baker::{self, BakeRequest};
use crate::clock::ClockAdapter;
use crate::config::NetworkPreset;
use crate::endorser;
use crate::node_client::NodeClient;
use crate::nonce::NonceStore;
use crate::nonce_scheduler;
use crate::signer::{KeyProvider, Watermark};
use crate::types::{CommitmentNonce, HeadSnapshot, PendingCandidate};

pub struct Controller {
    node: Arc<dyn NodeClient>,
    signer: Arc<dyn KeyProvider>,
    clock: Arc<dyn ClockAdapter>,
    store: NonceStore,
    network: NetworkPreset,
    chain_id: String,
    log: Logger,

    head: Option<HeadSnapshot>,
    start_level: Option<i32>,
    head_fetch_in_flight: bool,
    pending: Vec<PendingCandidate>,
    nonces: Vec<CommitmentNonce>,
    injected_levels: HashSet<i32>,
    endorsed_levels: HashSet<i32>,
    baked_levels: HashSet<i32>,
    bad_ops: HashSet<String>,
}

impl Controller {
    pub fn new(
        node: Arc<dyn NodeClient>,
        signer: Arc<dyn KeyProvider>,
        clock: Arc<dyn ClockAdapter>,
        base_dir: PathBuf,
        chain_id: String,
        network: NetworkPreset,
        log: Logger,
    ) -> Self {
        let store = NonceStore::new(base_dir, &chain_id);
        let nonces = store.load().unwrap_or_else(|err| {
            slog::warn!(log, "failed to load nonce store, starting empty: {}", err);
            Vec::new()
        });
        Controller {
            node,
            signer,
            clock,
            store,
            network,
            chain_id,
            log,
            head: None,
            start_level: None,
            head_fetch_in_flight: false,
            pending: Vec::new(),
            nonces,
            injected_levels: HashSet::new(),
            endorsed_levels: HashSet::new(),
            baked_levels: HashSet::new(),
            bad_ops: HashSet::new(),
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn head(&self) -> Option<&HeadSnapshot> {
        self.head.as_ref()
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn endorsed_levels(&self) -> &HashSet<i32> {
        &self.endorsed_levels
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn baked_levels(&self) -> &HashSet<i32> {
        &self.baked_levels
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn nonces(&self) -> &[CommitmentNonce] {
        &self.nonces
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn bad_ops(&self) -> &HashSet<String> {
        &self.bad_ops
    }

    pub async fn tick(&mut self) {
        self.drain_injector_step().await;
        self.fetch_head_step().await;

        let Some(head) = self.head.clone() else {
            return;
        };

        self.reveal_nonces_step(&head).await;

        if self.start_level.is_none() {
            self.start_level = Some(head.level + 1);
            slog::info!(
                self.log,
                "stand-down: will not act until head passes level {}",
                head.level
            );
            return;
        }
        let start_level = self.start_level.expect("checked above");
        if head.level < start_level {
            return;
        }

        self.endorse_step(&head).await;
        self.bake_step(&head).await;
    }

    async fn drain_injector_step(&mut self) {
        let Some(head) = self.head.clone() else {
            return;
        };
        let pending = std::mem::take(&mut self.pending);
        let now = self.clock.now();
        let outcome = crate::injector::drain(
            self.node.as_ref(),
            pending,
            head.level,
            now,
            &mut self.injected_levels,
            &mut self.bad_ops,
            &self.log,
        )
        .await;
        self.pending = outcome.retained;
        if !outcome.new_nonces.is_empty() {
            self.nonces.extend(outcome.new_nonces);
            if let Err(err) = self.store.save(&self.nonces) {
                slog::error!(self.log, "nonce store write failed: {}", err);
            }
        }
    }

    async fn fetch_head_step(&mut self) {
        if self.head_fetch_in_flight {
            return;
        }
        self.head_fetch_in_flight = true;
        match self.node.get_head(&self.chain_id).await {
            Ok(head) => self.head = Some(head),
            Err(err) => slog::warn!(self.log, "head fetch failed: {}", err),
        }
        self.head_fetch_in_flight = false;
    }

    async fn reveal_nonces_step(&mut self, head: &HeadSnapshot) {
        let nonces = std::mem::take(&mut self.nonces);
        let outcome = nonce_scheduler::pass(&self.network, nonces, head.level, &self.log);

        for nonce in &outcome.due_for_reveal {
            let content = endorser::reveal_content(head, nonce.level, &hex::encode(nonce.seed));
            // The nonce is dropped from the queue regardless of RPC outcome
            // (spec.md §4.3, §9: "no retry on reveal failure").
            match endorser::forge_sign_preapply_inject(
                self.node.as_ref(),
                self.signer.as_ref(),
                head,
                content,
                Watermark::Endorsement,
                &self.log,
            )
            .await
            {
                Ok(hash) => slog::info!(self.log, "revealed nonce for level {} ({})", nonce.level, hash),
                Err(err) => slog::error!(self.log, "!Couldn't reveal nonce for level {}: {}", nonce.level, err),
            }
        }

        self.nonces = outcome.still_queued;
        if outcome.changed {
            if let Err(err) = self.store.save(&self.nonces) {
                slog::error!(self.log, "nonce store write failed: {}", err);
            }
        }
    }

    async fn endorse_step(&mut self, head: &HeadSnapshot) {
        if self.endorsed_levels.contains(&head.level) {
            return;
        }
        let rights = match self
            .node
            .get_endorsing_rights(
                &self.chain_id,
                &head.block_hash,
                head.level,
                self.signer.public_key_hash(),
            )
            .await
        {
            Ok(rights) => rights,
            Err(err) => {
                slog::warn!(self.log, "endorsing_rights failed: {}", err);
                return;
            }
        };
        if rights.is_empty() {
            return;
        }
        if self.head.as_ref() != Some(head) {
            slog::warn!(self.log, "!Head changed before endorsing level {}", head.level);
            return;
        }

        self.endorsed_levels.insert(head.level);
        let content = endorser::endorsement_content(head);
        match endorser::forge_sign_preapply_inject(
            self.node.as_ref(),
            self.signer.as_ref(),
            head,
            content,
            Watermark::Endorsement,
            &self.log,
        )
        .await
        {
            Ok(hash) => slog::info!(self.log, "endorsed level {} ({})", head.level, hash),
            Err(err) => slog::error!(self.log, "!Couldn't endorse level {}: {}", head.level, err),
        }
    }

    async fn bake_step(&mut self, head: &HeadSnapshot) {
        let target_level = head.level + 1;
        if self.baked_levels.contains(&target_level) {
            return;
        }
        let rights = match self
            .node
            .get_baking_rights(
                &self.chain_id,
                &head.block_hash,
                target_level,
                self.signer.public_key_hash(),
            )
            .await
        {
            Ok(rights) => rights,
            Err(err) => {
                slog::warn!(self.log, "baking_rights failed: {}", err);
                return;
            }
        };
        let Some(top) = rights.iter().min_by_key(|r| r.priority) else {
            return;
        };
        let estimated_time = top
            .estimated_time
            .as_deref()
            .and_then(parse_rfc3339)
            .unwrap_or_else(|| self.clock.now());
        if self.clock.now() < estimated_time {
            return;
        }
        if self.head.as_ref() != Some(head) {
            slog::warn!(self.log, "!Head changed before baking level {}", target_level);
            return;
        }

        self.baked_levels.insert(target_level);
        slog::info!(self.log, "-Trying to bake level {}", target_level);
        let priority = top.priority;
        match baker::bake(
            self.node.as_ref(),
            self.signer.as_ref(),
            self.clock.as_ref(),
            BakeRequest {
                head,
                priority,
                scheduled_timestamp: estimated_time,
                network: &self.network,
                bad_ops: &self.bad_ops,
            },
            &self.log,
        )
        .await
        {
            Ok(candidate) => self.pending.push(candidate),
            Err(err) => slog::error!(self.log, "!Couldn't bake level {}: {}", target_level, err),
        }
    }
}

fn parse_rfc3339(s: &str) -> Option<i64> {
    time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
        .ok()
        .map(|t| t.unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mock::MockClock;
    use crate::clock::SystemClock;
    use crate::node_client::mock::MockNodeClient;
    use crate::signer::mock::MockKeyProvider;
    use crate::types::EndorsingRight;
    use slog::{o, Discard};

    fn test_logger() -> Logger {
        Logger::root(Discard, o!())
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("tezos-baker-core-controller-test-{}-{:p}", tag, &dir as *const _));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn head(level: i32) -> HeadSnapshot {
        HeadSnapshot {
            chain_id: "chain".into(),
            protocol_id: "PtProtocol".into(),
            block_hash: format!("BL{level}"),
            level,
            timestamp: 0,
        }
    }

    fn controller(node: Arc<MockNodeClient>) -> Controller {
        Controller::new(
            node,
            Arc::new(MockKeyProvider::new("tz1Test")),
            Arc::new(MockClock::new(0)),
            scratch_dir("s1"),
            "chain".into(),
            NetworkPreset::MAINNET,
            test_logger(),
        )
    }

    #[tokio::test]
    async fn s1_first_tick_stands_down_without_acting() {
        let h = head(100);
        let node = Arc::new(MockNodeClient::new(h.clone()));
        *node.endorsing_rights.lock().unwrap() = vec![EndorsingRight {
            level: 100,
            delegate: "tz1Test".into(),
            slots: vec![0],
        }];
        let mut c = controller(node);

        c.tick().await;

        assert_eq!(c.start_level, Some(101));
        assert!(c.endorsed_levels().is_empty());
        assert!(c.baked_levels().is_empty());
    }

    #[tokio::test]
    async fn s1_stays_down_until_head_passes_the_stand_down_level() {
        let h = head(100);
        let node = Arc::new(MockNodeClient::new(h.clone()));
        *node.endorsing_rights.lock().unwrap() = vec![EndorsingRight {
            level: 100,
            delegate: "tz1Test".into(),
            slots: vec![0],
        }];
        let mut c = controller(node);

        c.tick().await; // stand-down tick, start_level = 101
        c.tick().await; // head unchanged at 100, still below start_level

        assert!(c.endorsed_levels().is_empty());
    }

    #[tokio::test]
    async fn endorses_once_head_passes_stand_down_level() {
        let h100 = head(100);
        let node = Arc::new(MockNodeClient::new(h100));
        let mut c = controller(Arc::clone(&node));

        c.tick().await; // stand-down, start_level = 101

        let h101 = head(101);
        node.set_head(h101.clone());
        *node.endorsing_rights.lock().unwrap() = vec![EndorsingRight {
            level: 101,
            delegate: "tz1Test".into(),
            slots: vec![0],
        }];

        c.tick().await;

        assert!(c.endorsed_levels().contains(&101));
    }

    #[tokio::test]
    async fn endorsement_is_idempotent_across_ticks() {
        let node = Arc::new(MockNodeClient::new(head(100)));
        let mut c = controller(Arc::clone(&node));
        c.tick().await; // stand down

        node.set_head(head(101));
        *node.endorsing_rights.lock().unwrap() = vec![EndorsingRight {
            level: 101,
            delegate: "tz1Test".into(),
            slots: vec![0],
        }];
        c.tick().await;
        c.tick().await;

        assert_eq!(node.injected_operations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn s5_head_changed_guard_silently_aborts_endorsement() {
        let h1 = head(200);
        let h2 = head(201);
        let node = Arc::new(MockNodeClient::new(h1.clone()));
        *node.endorsing_rights.lock().unwrap() = vec![EndorsingRight {
            level: 200,
            delegate: "tz1Test".into(),
            slots: vec![0],
        }];
        let mut c = controller(Arc::clone(&node));
        c.start_level = Some(0); // skip stand-down for this direct test
        c.head = Some(h2); // the head has already moved on

        c.endorse_step(&h1).await;

        assert!(!c.endorsed_levels().contains(&h1.level));
        assert!(node.injected_operations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn system_clock_is_used_for_production_wiring() {
        // Smoke-checks that SystemClock compiles against ClockAdapter; no
        // assertions on wall-clock value since this is deterministic-test
        // territory only for MockClock.
        let clock = SystemClock;
        assert!(clock.now() > 0);
    }
}
