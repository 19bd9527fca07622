// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! NonceStore: persisted list of outstanding commitment nonces
//! (spec.md §4.8, §6). Writes are whole-list: any mutation rewrites the
//! persisted representation. Reads return an empty list when uninitialized.
//!
//! Persisted as a single JSON file, written atomically (temp file + rename
//! in the same directory) so a crash mid-write cannot leave a truncated
//! file behind — an ambient robustness concern, not a change to the
//! whole-list write semantics spec.md describes.

use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::types::CommitmentNonce;

pub struct NonceStore {
    path: PathBuf,
}

impl NonceStore {
    pub fn new(base_dir: impl AsRef<Path>, chain_id: &str) -> Self {
        NonceStore {
            path: base_dir.as_ref().join(format!("{chain_id}_nonces.json")),
        }
    }

    pub fn load(&self) -> Result<Vec<CommitmentNonce>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, nonces: &[CommitmentNonce]) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(nonces)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, encoded)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
