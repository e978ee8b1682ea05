use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;

/// Canonical message a voter signs to prove authorship of a vote.
/// Binds the poll identifier and the chosen option.
pub fn vote_message(poll_id: &str, option: &str) -> String {
    format!("Vote on poll {}: {}", poll_id, option)
}

/// Ed25519 wallet key. The wallet address is the hex-encoded public key.
#[derive(Clone)]
pub struct WalletKeypair {
    secret_key: SigningKey,
}

impl WalletKeypair {
    /// Generate a fresh keypair from the OS random source
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut secret_bytes);
        Self {
            secret_key: SigningKey::from_bytes(&secret_bytes),
        }
    }

    /// Load a keypair from a hex-encoded 32 byte seed
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim()).context("Wallet secret key is not valid hex")?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Wallet secret key must be 32 bytes"))?;
        Ok(Self {
            secret_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn address(&self) -> String {
        hex::encode(self.secret_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.secret_key.sign(data).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for WalletKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletKeypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Verify an ed25519 signature made by a hex-address wallet
pub fn verify_signature(address: &str, data: &[u8], signature: &[u8]) -> Result<bool> {
    let public_key_bytes: [u8; 32] = hex::decode(address)
        .context("Wallet address is not valid hex")?
        .try_into()
        .map_err(|_| anyhow::anyhow!("Invalid public key length"))?;
    let public_key = VerifyingKey::from_bytes(&public_key_bytes)
        .map_err(|e| anyhow::anyhow!("Invalid public key: {}", e))?;

    let signature_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| anyhow::anyhow!("Invalid signature length"))?;
    let sig = Signature::from_bytes(&signature_bytes);

    Ok(public_key.verify(data, &sig).is_ok())
}

/// Signatures travel base64-encoded on the wire
pub fn encode_signature(signature: &[u8]) -> String {
    STANDARD.encode(signature)
}

pub fn decode_signature(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .context("Signature is not valid base64")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_message_binds_poll_and_option() {
        assert_eq!(vote_message("p1", "yes"), "Vote on poll p1: yes");
        assert_ne!(vote_message("p1", "yes"), vote_message("p2", "yes"));
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = WalletKeypair::generate();
        let message = vote_message("p1", "no");
        let signature = keypair.sign(message.as_bytes());

        assert!(verify_signature(&keypair.address(), message.as_bytes(), &signature).unwrap());
        assert!(
            !verify_signature(&keypair.address(), b"Vote on poll p1: yes", &signature).unwrap()
        );
    }

    #[test]
    fn test_from_hex_is_deterministic() {
        let seed = "11".repeat(32);
        let a = WalletKeypair::from_hex(&seed).unwrap();
        let b = WalletKeypair::from_hex(&seed).unwrap();
        assert_eq!(a.address(), b.address());
        assert!(WalletKeypair::from_hex("abcd").is_err());
    }

    #[test]
    fn test_signature_encoding() {
        let encoded = encode_signature(&[1, 2, 3]);
        assert_eq!(decode_signature(&encoded).unwrap(), vec![1, 2, 3]);
        assert!(decode_signature("not base64!").is_err());
    }
}
