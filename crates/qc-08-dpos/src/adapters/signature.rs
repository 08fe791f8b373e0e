//! secp256k1 signatures (k256)
//!
//! Messages are signed as 32-byte prehashes. An address is the last 20
//! bytes of Keccak-256 over the uncompressed public key without its
//! `0x04` prefix.

use crate::domain::{DposError, DposResult};
use crate::ports::{MasternodeSigner, SignatureVerifier};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use shared_types::{sha256, Address, Hash, SignedPayload};

/// Derive the address of a public key.
pub fn address_from_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Signature verifier for secp256k1 keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct K256Verifier;

impl SignatureVerifier for K256Verifier {
    fn verify(&self, hash: &Hash, auth: &SignedPayload) -> Option<Address> {
        let key = VerifyingKey::from_sec1_bytes(&auth.public_key).ok()?;
        let signature = Signature::from_slice(&auth.signature).ok()?;
        key.verify_prehash(hash, &signature).ok()?;
        Some(address_from_key(&key))
    }
}

/// Operator key held by the local node.
#[derive(Clone)]
pub struct K256Signer {
    key: SigningKey,
    address: Address,
}

impl K256Signer {
    pub fn from_secret(secret: &[u8; 32]) -> DposResult<Self> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| DposError::InvalidConfig(format!("invalid operator key: {e}")))?;
        let address = address_from_key(key.verifying_key());
        Ok(Self { key, address })
    }

    /// Deterministic key for tests and local networks.
    pub fn from_seed(seed: &[u8]) -> DposResult<Self> {
        Self::from_secret(&sha256(seed))
    }

    pub fn public_key(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out.copy_from_slice(self.key.verifying_key().to_encoded_point(true).as_bytes());
        out
    }
}

impl std::fmt::Debug for K256Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K256Signer")
            .field("address", &hex::encode(self.address))
            .finish_non_exhaustive()
    }
}

impl MasternodeSigner for K256Signer {
    fn operator_address(&self) -> Address {
        self.address
    }

    fn sign(&self, hash: &Hash) -> DposResult<SignedPayload> {
        let signature: Signature = self
            .key
            .sign_prehash(hash)
            .map_err(|_| DposError::InvalidSignature)?;
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&signature.to_bytes());
        Ok(SignedPayload {
            public_key: self.public_key(),
            signature: bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_recover_address() {
        let signer = K256Signer::from_seed(b"operator-1").unwrap();
        let hash = sha256(b"payload");
        let auth = signer.sign(&hash).unwrap();

        assert_eq!(K256Verifier.verify(&hash, &auth), Some(signer.operator_address()));
        assert_eq!(K256Verifier.verify(&sha256(b"other"), &auth), None);
    }

    #[test]
    fn test_tampered_key_fails() {
        let signer = K256Signer::from_seed(b"operator-1").unwrap();
        let other = K256Signer::from_seed(b"operator-2").unwrap();
        let hash = sha256(b"payload");
        let mut auth = signer.sign(&hash).unwrap();
        auth.public_key = other.public_key();
        assert_eq!(K256Verifier.verify(&hash, &auth), None);
    }

    #[test]
    fn test_zero_secret_rejected() {
        assert!(matches!(
            K256Signer::from_secret(&[0u8; 32]),
            Err(DposError::InvalidConfig(_))
        ));
    }
}
