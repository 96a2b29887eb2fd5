// src/transaction/keys.rs

use ripemd::Ripemd160;
use secp256k1::ecdsa::RecoverableSignature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

use crate::ledger::LedgerError;

/// Key index the worker derives from its brain key.
pub const BRAIN_KEY_SEQUENCE: u32 = 1;

const MAX_SIGNING_ROUNDS: u32 = 256;

/// Collapses whitespace runs to single spaces and trims the ends.
pub fn normalize_brain_key(brain_key: &str) -> String {
    brain_key.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `<prefix><base58(compressed key ‖ ripemd160(compressed key)[..4])>`
pub fn public_key_string(key: &PublicKey, prefix: &str) -> String {
    let compressed = key.serialize();
    let checksum = Ripemd160::digest(compressed);

    let mut payload = Vec::with_capacity(compressed.len() + 4);
    payload.extend_from_slice(&compressed);
    payload.extend_from_slice(&checksum[..4]);

    format!("{}{}", prefix, bs58::encode(payload).into_string())
}

/// The worker's only credential. Derived once at startup and held in memory.
pub struct SigningKey {
    secp: Secp256k1<All>,
    secret: SecretKey,
    public: PublicKey,
    public_key_string: String,
}

impl SigningKey {
    /// `sha256(sha512(normalized brain key + " " + sequence))`
    pub fn from_brain_key(brain_key: &str, sequence: u32, prefix: &str) -> Result<Self, LedgerError> {
        let normalized = normalize_brain_key(brain_key);
        if normalized.is_empty() {
            return Err(LedgerError::Signing("brain key is empty".to_string()));
        }

        let seed = Sha512::digest(format!("{} {}", normalized, sequence).as_bytes());
        let secret_bytes: [u8; 32] = Sha256::digest(seed).into();
        let secret = SecretKey::from_slice(&secret_bytes)?;

        Ok(Self::from_secret(secret, prefix))
    }

    pub fn from_secret(secret: SecretKey, prefix: &str) -> Self {
        let secp = Secp256k1::new();
        let public = PublicKey::from_secret_key(&secp, &secret);
        let public_key_string = public_key_string(&public, prefix);

        Self { secp, secret, public, public_key_string }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_key_string(&self) -> &str {
        &self.public_key_string
    }

    /// Signs a 32-byte digest, returning the 65-byte compact form the chain expects:
    /// `[27 + 4 + recovery id, r, s]`. Non-canonical signatures are retried with fresh
    /// nonce data.
    pub fn sign_digest(&self, digest: [u8; 32]) -> Result<[u8; 65], LedgerError> {
        let message = Message::from_digest(digest);

        for round in 0..MAX_SIGNING_ROUNDS {
            let mut nonce_data = [0u8; 32];
            nonce_data[..4].copy_from_slice(&round.to_le_bytes());

            let signature = self
                .secp
                .sign_ecdsa_recoverable_with_noncedata(&message, &self.secret, &nonce_data);
            let compact = to_compact(&signature);

            if is_canonical(&compact) {
                return Ok(compact);
            }
        }

        Err(LedgerError::Signing(format!(
            "no canonical signature after {} rounds",
            MAX_SIGNING_ROUNDS
        )))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public_key", &self.public_key_string)
            .finish_non_exhaustive()
    }
}

fn to_compact(signature: &RecoverableSignature) -> [u8; 65] {
    let (recovery_id, rs) = signature.serialize_compact();
    let mut out = [0u8; 65];
    out[0] = 27 + 4 + recovery_id.to_i32() as u8;
    out[1..].copy_from_slice(&rs);
    out
}

// r and s must both be positive and minimally encoded.
fn is_canonical(c: &[u8; 65]) -> bool {
    c[1] & 0x80 == 0
        && !(c[1] == 0 && c[2] & 0x80 == 0)
        && c[33] & 0x80 == 0
        && !(c[33] == 0 && c[34] & 0x80 == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::ecdsa::RecoveryId;

    const BRAIN_KEY: &str = "  correct   horse\tbattery staple ";

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_brain_key(BRAIN_KEY), "correct horse battery staple");
    }

    #[test]
    fn derivation_is_deterministic_and_whitespace_insensitive() {
        let a = SigningKey::from_brain_key(BRAIN_KEY, 1, "BTS").unwrap();
        let b = SigningKey::from_brain_key("correct horse battery staple", 1, "BTS").unwrap();
        let other_sequence = SigningKey::from_brain_key(BRAIN_KEY, 0, "BTS").unwrap();

        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), other_sequence.public_key());
        assert!(a.public_key_string().starts_with("BTS"));
    }

    #[test]
    fn empty_brain_key_is_rejected() {
        assert!(SigningKey::from_brain_key(" \n\t", 1, "BTS").is_err());
    }

    #[test]
    fn public_key_string_carries_ripemd_checksum() {
        let key = SigningKey::from_brain_key(BRAIN_KEY, 1, "TEST").unwrap();
        let encoded = key.public_key_string().strip_prefix("TEST").unwrap();
        let raw = bs58::decode(encoded).into_vec().unwrap();

        assert_eq!(raw.len(), 37);
        assert_eq!(&raw[..33], &key.public_key().serialize()[..]);
        assert_eq!(&raw[33..], &Ripemd160::digest(&raw[..33])[..4]);
    }

    #[test]
    fn signatures_are_canonical_and_recover_the_signer() {
        let key = SigningKey::from_brain_key(BRAIN_KEY, 1, "BTS").unwrap();
        let secp = Secp256k1::new();

        for i in 0u8..16 {
            let digest: [u8; 32] = Sha256::digest([i]).into();
            let compact = key.sign_digest(digest).unwrap();
            assert!(is_canonical(&compact));

            let recovery_id = RecoveryId::from_i32(i32::from(compact[0]) - 31).unwrap();
            let signature = RecoverableSignature::from_compact(&compact[1..], recovery_id).unwrap();
            let recovered = secp
                .recover_ecdsa(&Message::from_digest(digest), &signature)
                .unwrap();
            assert_eq!(&recovered, key.public_key());
        }
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let key = SigningKey::from_brain_key(BRAIN_KEY, 1, "BTS").unwrap();
        let rendered = format!("{:?}", key);
        assert!(rendered.contains(key.public_key_string()));
        assert!(!rendered.contains(&hex::encode(key.secret.secret_bytes())));
    }
}
