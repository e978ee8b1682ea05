//! Wallet providers
//!
//! A provider is the external signer a session is opened against. The
//! session manager only ever talks to providers through `WalletProvider`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::crypto::WalletKeypair;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// No active session
    NotConnected,
    /// Provider id unknown or provider not reachable
    ProviderUnavailable(String),
    /// Provider refused to open a session
    ConnectionRejected(String),
    /// Provider refused to sign
    SigningRejected(String),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::NotConnected => write!(f, "Wallet not connected"),
            WalletError::ProviderUnavailable(id) => write!(f, "Wallet provider unavailable: {}", id),
            WalletError::ConnectionRejected(reason) => {
                write!(f, "Wallet connection rejected: {}", reason)
            }
            WalletError::SigningRejected(reason) => write!(f, "Signing rejected: {}", reason),
        }
    }
}

impl std::error::Error for WalletError {}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Open a session, returning the wallet address
    async fn connect(&self) -> Result<String, WalletError>;

    async fn disconnect(&self) -> Result<(), WalletError>;

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, WalletError>;
}

/// Balance and age lookups for a connected wallet. Best-effort: lookups
/// that fail report 0.
#[async_trait]
pub trait AccountInfoSource: Send + Sync {
    async fn balance(&self, address: &str) -> f64;

    async fn age_days(&self, address: &str) -> u32;
}

/// Provider backed by an ed25519 key held in process
pub struct LocalKeypairProvider {
    id: String,
    keypair: WalletKeypair,
    connected: AtomicBool,
}

impl LocalKeypairProvider {
    pub fn new(id: impl Into<String>, keypair: WalletKeypair) -> Self {
        Self {
            id: id.into(),
            keypair,
            connected: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> String {
        self.keypair.address()
    }
}

#[async_trait]
impl WalletProvider for LocalKeypairProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn connect(&self) -> Result<String, WalletError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(self.keypair.address())
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, WalletError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WalletError::NotConnected);
        }
        debug!(provider = %self.id, bytes = message.len(), "Signing message");
        Ok(self.keypair.sign(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verify_signature;

    #[tokio::test]
    async fn test_local_provider_signs_only_when_connected() {
        let provider = LocalKeypairProvider::new("local", WalletKeypair::generate());
        assert_eq!(
            provider.sign_message(b"hello").await,
            Err(WalletError::NotConnected)
        );

        let address = provider.connect().await.unwrap();
        let signature = provider.sign_message(b"hello").await.unwrap();
        assert!(verify_signature(&address, b"hello", &signature).unwrap());

        provider.disconnect().await.unwrap();
        assert!(provider.sign_message(b"hello").await.is_err());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            WalletError::ProviderUnavailable("phantom".into()).to_string(),
            "Wallet provider unavailable: phantom"
        );
    }
}
