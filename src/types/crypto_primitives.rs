/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives: public keys, address derivation, and signing.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

use super::data_types::{Address, SignatureBytes};
use super::transaction::TxError;

// re-exports below.
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// A public key as it appears in accounts, validators, and transaction inputs.
///
/// `Nil` represents a key that is not (yet) known: accounts are created by receiving coins, so
/// an account's key stays `Nil` until its first spend reveals it. `Nil` can never verify
/// anything.
///
/// The `Ed25519` variant stores the raw 32 key bytes rather than an
/// [`ed25519_dalek::VerifyingKey`], since the latter does not implement the borsh traits and
/// is not guaranteed to be constructible from arbitrary wire bytes. A `VerifyingKey` is parsed
/// out of the stored bytes on demand; [`validate_basic`](Self::validate_basic) checks that this
/// parse succeeds.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub enum PubKey {
    Nil,
    Ed25519([u8; 32]),
}

impl PubKey {
    /// Check whether this key is the `Nil` placeholder.
    pub fn is_nil(&self) -> bool {
        matches!(self, PubKey::Nil)
    }

    /// Derive the address of this key: the first 20 bytes of the SHA256 of the key bytes.
    ///
    /// # Panics
    ///
    /// Panics if called on `Nil`. Callers must check [`is_nil`](Self::is_nil) (or have
    /// validated the key) first.
    pub fn address(&self) -> Address {
        match self {
            PubKey::Nil => panic!("Tried to derive the address of a nil pub key"),
            PubKey::Ed25519(bytes) => {
                let digest = CryptoHasher::digest(bytes);
                let mut address = [0u8; 20];
                address.copy_from_slice(&digest[..20]);
                Address::new(address)
            }
        }
    }

    /// Verify that `signature` is a signature created by this key over `msg`.
    ///
    /// `Nil` verifies nothing; undecodable key bytes verify nothing.
    pub fn verify(&self, msg: &[u8], signature: &SignatureBytes) -> bool {
        match self {
            PubKey::Nil => false,
            PubKey::Ed25519(bytes) => match VerifyingKey::from_bytes(bytes) {
                Ok(verifying_key) => {
                    let signature = Signature::from_bytes(&signature.bytes());
                    verifying_key.verify(msg, &signature).is_ok()
                }
                Err(_) => false,
            },
        }
    }

    /// Check that this key is a well-formed, non-`Nil` Ed25519 key.
    pub fn validate_basic(&self) -> Result<(), TxError> {
        match self {
            PubKey::Nil => Err(TxError::UnknownPubKey),
            PubKey::Ed25519(bytes) => match VerifyingKey::from_bytes(bytes) {
                Ok(_) => Ok(()),
                Err(_) => Err(TxError::InvalidPubKey),
            },
        }
    }
}

/// A wrapper around [`SigningKey`] that implements a [convenience method](Self::sign) for
/// creating signatures as well as getters for the [public key](Self::public) and
/// [address](Self::address).
#[derive(Clone)]
pub struct Keypair(pub SigningKey);

impl Keypair {
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Convenience method for creating signatures over messages represented as byte slices.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    pub fn public(&self) -> PubKey {
        PubKey::Ed25519(self.0.verifying_key().to_bytes())
    }

    pub fn address(&self) -> Address {
        self.public().address()
    }
}
