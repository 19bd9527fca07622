// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Error types at each component boundary. Transient failures are handled
//! by the caller (logged and dropped for the tick); these types only carry
//! enough information to make that decision.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("node rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("could not decode node response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("node returned malformed hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl NodeError {
    /// Best-effort extraction of offending operation hashes from a rejection
    /// body, per the injection-error shape in spec.md §4.1 step 1 / §7.
    pub fn offending_operation_hashes(&self) -> Vec<String> {
        let NodeError::Rejected { body, .. } = self else {
            return Vec::new();
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
            return Vec::new();
        };
        let Some(entries) = value.as_array() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| entry.get("operation")?.as_str())
            .map(str::to_owned)
            .collect()
    }

    /// Best-effort extraction of `required_endorsements` from a "not enough
    /// endorsements for priority" preapply rejection (spec.md §4.4 step 5).
    pub fn required_endorsements(&self) -> Option<u32> {
        let NodeError::Rejected { body, .. } = self else {
            return None;
        };
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        value
            .get("required_endorsements")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing failed: {0}")]
    Crypto(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("nonce store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nonce store decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
