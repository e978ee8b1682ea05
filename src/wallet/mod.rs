//! Wallet session lifecycle and signing

pub mod provider;
pub mod session;

pub use provider::{AccountInfoSource, LocalKeypairProvider, WalletError, WalletProvider};
pub use session::{
    ConnectionState, PersistedSession, SessionStore, SignedMessage, WalletSession,
    WalletSessionManager,
};
