// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! KeyProvider: the narrow signing interface spec.md §6 requires software
//! and hardware keys to both conform to ("the agent never branches on which").
//!
//! The teacher links against an in-house `crypto` crate (Ed25519 + Blake2b +
//! base58check) that is part of the tezedge workspace and not independently
//! fetchable here (see DESIGN.md). `SoftKeyProvider` reaches the same
//! primitives through `ed25519-dalek`, `blake2`, and `bs58`.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use ed25519_dalek::{Signer, SigningKey};

use crate::error::SignerError;

/// One-byte domain-separation tag prefixed (with chain-id bytes) to payloads
/// before signing (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Watermark {
    Block,
    /// Used for both endorsement and seed-nonce-revelation operations, per
    /// the shared forge-sign-preapply-inject pipeline in spec.md §4.3.
    Endorsement,
}

impl Watermark {
    fn tag(self) -> u8 {
        match self {
            Watermark::Block => 0x11,
            Watermark::Endorsement => 0x13,
        }
    }
}

/// `{ sbytes, prefixSig }` from spec.md §6: the full signed byte string and
/// the base58-prefixed signature alone.
#[derive(Clone, Debug)]
pub struct SignedBytes {
    pub sbytes: String,
    pub prefix_sig: String,
}

pub trait KeyProvider: Send + Sync {
    fn public_key_hash(&self) -> &str;

    /// `bytes` is the forged operation/header hex, already decoded; `chain_id`
    /// is the raw (non-base58) chain-id bytes prefixed ahead of the
    /// watermark tag, per spec.md §6.
    fn sign(
        &self,
        bytes: &[u8],
        watermark: Watermark,
        chain_id: &[u8],
    ) -> Result<SignedBytes, SignerError>;
}

pub struct SoftKeyProvider {
    signing_key: SigningKey,
    public_key_hash: String,
}

impl SoftKeyProvider {
    pub fn new(signing_key: SigningKey) -> Self {
        let public_key_hash = tz1_from_public_key(signing_key.verifying_key().as_bytes());
        SoftKeyProvider {
            signing_key,
            public_key_hash,
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(seed))
    }
}

impl KeyProvider for SoftKeyProvider {
    fn public_key_hash(&self) -> &str {
        &self.public_key_hash
    }

    fn sign(
        &self,
        bytes: &[u8],
        watermark: Watermark,
        chain_id: &[u8],
    ) -> Result<SignedBytes, SignerError> {
        let mut watermarked = Vec::with_capacity(1 + chain_id.len() + bytes.len());
        watermarked.push(watermark.tag());
        watermarked.extend_from_slice(chain_id);
        watermarked.extend_from_slice(bytes);

        let digest = blake2b_256(&watermarked);
        let signature = self.signing_key.sign(&digest);

        let sig_bytes = signature.to_bytes();
        let prefix_sig = bs58::encode(sig_bytes).with_check().into_string();
        let sbytes = format!("{}{}", hex::encode(bytes), hex::encode(sig_bytes));
        Ok(SignedBytes {
            sbytes,
            prefix_sig,
        })
    }
}

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2bVar::new(32).expect("32 is a valid blake2b output size");
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher
        .finalize_variable(&mut out)
        .expect("32-byte buffer matches requested output size");
    out
}

/// Not a faithful `tz1...` Tezos address derivation (that also folds in a
/// network prefix table); good enough to give each key a stable,
/// base58check-looking identifier for logging and RPC delegate query params.
fn tz1_from_public_key(public_key: &[u8]) -> String {
    let hash = blake2b_256(public_key);
    format!("tz1{}", bs58::encode(&hash[..20]).into_string())
}

/// Raw bytes prefixed (ahead of the watermark tag) to signed payloads
/// (spec.md §6). Falls back to the input's UTF-8 bytes if it is not valid
/// base58check, so a test-only chain-id string still round-trips.
pub fn chain_id_bytes(chain_id: &str) -> Vec<u8> {
    bs58::decode(chain_id)
        .with_check(None)
        .into_vec()
        .unwrap_or_else(|_| chain_id.as_bytes().to_vec())
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;

    pub struct MockKeyProvider {
        pub pkh: String,
    }

    impl MockKeyProvider {
        pub fn new(pkh: impl Into<String>) -> Self {
            MockKeyProvider { pkh: pkh.into() }
        }
    }

    impl KeyProvider for MockKeyProvider {
        fn public_key_hash(&self) -> &str {
            &self.pkh
        }

        fn sign(
            &self,
            bytes: &[u8],
            watermark: Watermark,
            chain_id: &[u8],
        ) -> Result<SignedBytes, SignerError> {
            let mut watermarked = vec![watermark.tag()];
            watermarked.extend_from_slice(chain_id);
            watermarked.extend_from_slice(bytes);
            let digest = blake2b_256(&watermarked);
            Ok(SignedBytes {
                sbytes: format!("{}{}", hex::encode(bytes), hex::encode(digest)),
                prefix_sig: bs58::encode(digest).with_check().into_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_signing_key_round_trip() {
        let seed = [7u8; 32];
        let provider = SoftKeyProvider::from_seed(&seed);
        let signed_a = provider
            .sign(b"forged-bytes", Watermark::Block, b"\x01\x02\x03\x04")
            .unwrap();
        let signed_b = provider
            .sign(b"forged-bytes", Watermark::Block, b"\x01\x02\x03\x04")
            .unwrap();
        assert_eq!(signed_a.sbytes, signed_b.sbytes);
        assert!(signed_a.sbytes.starts_with(&hex::encode(b"forged-bytes")));
    }

    #[test]
    fn different_watermarks_produce_different_signatures() {
        let provider = SoftKeyProvider::from_seed(&[9u8; 32]);
        let block = provider
            .sign(b"same-bytes", Watermark::Block, b"\x00\x00\x00\x00")
            .unwrap();
        let endorsement = provider
            .sign(b"same-bytes", Watermark::Endorsement, b"\x00\x00\x00\x00")
            .unwrap();
        assert_ne!(block.sbytes, endorsement.sbytes);
    }
}
