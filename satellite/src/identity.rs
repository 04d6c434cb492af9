//! Node identity.
//!
//! Every satellite owns one ed25519 signing key. The node ID is derived from the
//! verifying key with BLAKE3 under a fixed domain so it stays stable for the
//! lifetime of the key.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::SatelliteError;

/// Domain separation tag for deriving node IDs from public keys.
const NODE_ID_DERIVATION_DOMAIN: &str = "satellite node-id v1";

/// 32-byte node identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Derives the node ID for a verifying key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        NodeId(blake3::derive_key(NODE_ID_DERIVATION_DOMAIN, key.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", &hex::encode(self.0)[..16])
    }
}

impl FromStr for NodeId {
    type Err = SatelliteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| SatelliteError::Config(format!("invalid node id: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SatelliteError::Config("node id must be 32 bytes".to_string()))?;
        Ok(NodeId(arr))
    }
}

/// A node ID paired with a dialable address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUrl {
    pub id: NodeId,
    pub address: String,
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// Full identity of a node: signing key plus its cached ID.
pub struct FullIdentity {
    signing_key: SigningKey,
    id: NodeId,
}

impl FullIdentity {
    /// Generates a fresh identity.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_signing_key(SigningKey::generate(rng))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let id = NodeId::from_public_key(&signing_key.verifying_key());
        Self { signing_key, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

/// Identities derived from `seed`, stable across runs. For local test networks.
pub fn deterministic_identities(seed: u64, count: usize) -> Vec<FullIdentity> {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..count).map(|_| FullIdentity::generate(&mut rng)).collect()
}

impl fmt::Debug for FullIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FullIdentity").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_id_is_deterministic_for_key() {
        let mut rng = StdRng::seed_from_u64(7);
        let key = SigningKey::generate(&mut rng);
        let a = FullIdentity::from_signing_key(key.clone());
        let b = FullIdentity::from_signing_key(key);
        assert_eq!(a.id(), b.id());
        assert!(!a.id().is_zero());
    }

    #[test]
    fn test_different_keys_produce_different_ids() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = FullIdentity::generate(&mut rng);
        let b = FullIdentity::generate(&mut rng);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_node_id_roundtrips_through_hex() {
        let identity = FullIdentity::generate(&mut rand::thread_rng());
        let parsed: NodeId = identity.id().to_string().parse().unwrap();
        assert_eq!(parsed, identity.id());
        assert!("abcd".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_signatures_verify() {
        let identity = FullIdentity::generate(&mut rand::thread_rng());
        let sig = identity.sign(b"hello");
        assert!(identity.public_key().verify(b"hello", &sig).is_ok());
    }

    #[test]
    fn test_deterministic_identities_repeat() {
        let first: Vec<NodeId> = deterministic_identities(42, 3).iter().map(|i| i.id()).collect();
        let second: Vec<NodeId> = deterministic_identities(42, 3).iter().map(|i| i.id()).collect();
        assert_eq!(first, second);
        assert_ne!(first[0], first[1]);
    }
}
