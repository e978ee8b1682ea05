//! Wallet Session Manager
//!
//! Owns the connect/disconnect lifecycle of the single wallet session of the
//! process and exposes signing to other components. Sessions are persisted
//! as `{address, walletId}` so a restart can attempt a silent reconnect.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::provider::{AccountInfoSource, WalletError, WalletProvider};
use crate::config::sanitize_for_logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletSession {
    pub address: String,
    pub provider_id: String,
    pub balance: f64,
    pub age_days: u32,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SignedMessage {
    pub address: String,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub address: String,
    #[serde(rename = "walletId")]
    pub wallet_id: String,
}

/// JSON file holding the last connected session
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<Option<PersistedSession>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read session file"),
        };

        let session = serde_json::from_str(&raw).context("Malformed session file")?;
        Ok(Some(session))
    }

    pub async fn save(&self, session: &PersistedSession) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        tokio::fs::write(&self.path, raw)
            .await
            .context("Failed to write session file")
    }

    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }
}

enum SessionState {
    Disconnected,
    Connecting,
    Connected {
        session: WalletSession,
        provider: Arc<dyn WalletProvider>,
    },
}

pub struct WalletSessionManager {
    providers: HashMap<String, Arc<dyn WalletProvider>>,
    account_info: Arc<dyn AccountInfoSource>,
    state: RwLock<SessionState>,
    store: Option<SessionStore>,
    /// Serializes connect/disconnect so lifecycle transitions never interleave
    lifecycle: Mutex<()>,
}

impl WalletSessionManager {
    pub fn new(account_info: Arc<dyn AccountInfoSource>) -> Self {
        Self {
            providers: HashMap::new(),
            account_info,
            state: RwLock::new(SessionState::Disconnected),
            store: None,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.providers.insert(provider.id().to_string(), provider);
        self
    }

    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Open a session with `provider_id`, replacing any existing session
    pub async fn connect(&self, provider_id: &str) -> Result<WalletSession, WalletError> {
        let provider = self
            .providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| WalletError::ProviderUnavailable(provider_id.to_string()))?;

        let _lifecycle = self.lifecycle.lock().await;

        let previous = std::mem::replace(&mut *self.state.write().await, SessionState::Connecting);
        if let SessionState::Connected { provider: old, session } = previous {
            debug!(
                address = %sanitize_for_logging(&session.address),
                "Replacing existing wallet session"
            );
            if let Err(e) = old.disconnect().await {
                warn!("Previous wallet provider failed to disconnect: {}", e);
            }
        }

        let address = match provider.connect().await {
            Ok(address) => address,
            Err(e) => {
                *self.state.write().await = SessionState::Disconnected;
                warn!(provider = %provider_id, "Wallet connection failed: {}", e);
                return Err(match e {
                    WalletError::ProviderUnavailable(_) | WalletError::ConnectionRejected(_) => e,
                    other => WalletError::ConnectionRejected(other.to_string()),
                });
            }
        };

        let (balance, age_days) = tokio::join!(
            self.account_info.balance(&address),
            self.account_info.age_days(&address)
        );

        let session = WalletSession {
            address: address.clone(),
            provider_id: provider_id.to_string(),
            balance,
            age_days,
            state: ConnectionState::Connected,
            connected_at: Utc::now(),
        };

        *self.state.write().await = SessionState::Connected {
            session: session.clone(),
            provider,
        };

        if let Some(store) = &self.store {
            let persisted = PersistedSession {
                address: address.clone(),
                wallet_id: provider_id.to_string(),
            };
            if let Err(e) = store.save(&persisted).await {
                warn!("Could not persist wallet session: {:#}", e);
            }
        }

        info!(
            address = %sanitize_for_logging(&address),
            provider = %provider_id,
            balance = balance,
            age_days = age_days,
            "Wallet connected"
        );
        Ok(session)
    }

    /// Clear the session. Provider errors are logged and ignored.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let previous = std::mem::replace(&mut *self.state.write().await, SessionState::Disconnected);
        if let SessionState::Connected { provider, session } = previous {
            if let Err(e) = provider.disconnect().await {
                warn!("Wallet provider disconnect failed: {}", e);
            }
            info!(address = %sanitize_for_logging(&session.address), "Wallet disconnected");
        }

        if let Some(store) = &self.store
            && let Err(e) = store.clear().await
        {
            warn!("Could not clear persisted wallet session: {:#}", e);
        }
    }

    pub async fn sign(&self, message: &[u8]) -> Result<SignedMessage, WalletError> {
        let (provider, address) = match &*self.state.read().await {
            SessionState::Connected { session, provider } => {
                (provider.clone(), session.address.clone())
            }
            _ => return Err(WalletError::NotConnected),
        };

        let signature = provider.sign_message(message).await?;
        Ok(SignedMessage { address, signature })
    }

    /// Reconnect the persisted session, if any. Never fails: anything that
    /// goes wrong leaves the manager disconnected with the record cleared.
    pub async fn restore(&self) -> Option<WalletSession> {
        let store = self.store.as_ref()?;

        let persisted = match store.load().await {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return None,
            Err(e) => {
                debug!("Discarding unreadable session file: {:#}", e);
                let _ = store.clear().await;
                return None;
            }
        };

        match self.connect(&persisted.wallet_id).await {
            Ok(session) if session.address == persisted.address => {
                info!(provider = %persisted.wallet_id, "Restored wallet session");
                Some(session)
            }
            Ok(_) => {
                debug!("Provider returned a different address, dropping restored session");
                self.disconnect().await;
                None
            }
            Err(e) => {
                debug!("Silent reconnect failed: {}", e);
                let _ = store.clear().await;
                None
            }
        }
    }

    pub async fn session(&self) -> Option<WalletSession> {
        match &*self.state.read().await {
            SessionState::Connected { session, .. } => Some(session.clone()),
            _ => None,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        match &*self.state.read().await {
            SessionState::Disconnected => ConnectionState::Disconnected,
            SessionState::Connecting => ConnectionState::Connecting,
            SessionState::Connected { .. } => ConnectionState::Connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::WalletKeypair;
    use crate::wallet::LocalKeypairProvider;
    use async_trait::async_trait;

    struct FixedAccountInfo;

    #[async_trait]
    impl AccountInfoSource for FixedAccountInfo {
        async fn balance(&self, _address: &str) -> f64 {
            2.5
        }

        async fn age_days(&self, _address: &str) -> u32 {
            40
        }
    }

    struct RejectingProvider;

    #[async_trait]
    impl WalletProvider for RejectingProvider {
        fn id(&self) -> &str {
            "rejecting"
        }

        async fn connect(&self) -> Result<String, WalletError> {
            Err(WalletError::ConnectionRejected("user closed the popup".into()))
        }

        async fn disconnect(&self) -> Result<(), WalletError> {
            Err(WalletError::ProviderUnavailable("rejecting".into()))
        }

        async fn sign_message(&self, _message: &[u8]) -> Result<Vec<u8>, WalletError> {
            Err(WalletError::SigningRejected("no".into()))
        }
    }

    fn manager() -> WalletSessionManager {
        WalletSessionManager::new(Arc::new(FixedAccountInfo))
            .with_provider(Arc::new(LocalKeypairProvider::new("local", WalletKeypair::generate())))
            .with_provider(Arc::new(RejectingProvider))
    }

    fn temp_store(name: &str) -> SessionStore {
        let path = std::env::temp_dir().join(format!(
            "govai-session-{}-{}.json",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        SessionStore::new(path)
    }

    #[tokio::test]
    async fn test_connect_sign_disconnect() {
        let wallet = manager();
        assert_eq!(wallet.sign(b"x").await.unwrap_err(), WalletError::NotConnected);

        let session = wallet.connect("local").await.unwrap();
        assert_eq!(session.balance, 2.5);
        assert_eq!(session.age_days, 40);
        assert_eq!(wallet.state().await, ConnectionState::Connected);

        let signed = wallet.sign(b"x").await.unwrap();
        assert_eq!(signed.address, session.address);

        wallet.disconnect().await;
        assert_eq!(wallet.state().await, ConnectionState::Disconnected);
        assert!(wallet.session().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_failures() {
        let wallet = manager();
        assert_eq!(
            wallet.connect("phantom").await.unwrap_err(),
            WalletError::ProviderUnavailable("phantom".into())
        );
        assert!(matches!(
            wallet.connect("rejecting").await.unwrap_err(),
            WalletError::ConnectionRejected(_)
        ));
        assert_eq!(wallet.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_session_persisted_and_restored() {
        let store = temp_store("restore");
        let keypair = WalletKeypair::generate();

        let first = WalletSessionManager::new(Arc::new(FixedAccountInfo))
            .with_provider(Arc::new(LocalKeypairProvider::new("local", keypair.clone())))
            .with_store(store.clone());
        let session = first.connect("local").await.unwrap();

        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.wallet_id, "local");

        let second = WalletSessionManager::new(Arc::new(FixedAccountInfo))
            .with_provider(Arc::new(LocalKeypairProvider::new("local", keypair)))
            .with_store(store.clone());
        let restored = second.restore().await.unwrap();
        assert_eq!(restored.address, session.address);

        second.disconnect().await;
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_restore_is_silent() {
        let store = temp_store("silent");
        store
            .save(&PersistedSession {
                address: "abc".into(),
                wallet_id: "rejecting".into(),
            })
            .await
            .unwrap();

        let wallet = manager().with_store(store.clone());
        assert!(wallet.restore().await.is_none());
        assert_eq!(wallet.state().await, ConnectionState::Disconnected);
        assert!(store.load().await.unwrap().is_none());
    }

    #[test]
    fn test_persisted_wire_shape() {
        let raw = serde_json::to_value(PersistedSession {
            address: "abc".into(),
            wallet_id: "local".into(),
        })
        .unwrap();
        assert_eq!(raw, serde_json::json!({"address": "abc", "walletId": "local"}));
    }
}
