//! Cryptographic utilities for vote authorship
//!
//! Provides:
//! - Canonical vote message construction
//! - Ed25519 wallet keys and signature verification
//! - Base64 signature transport encoding

pub mod signing;

pub use signing::{
    WalletKeypair, decode_signature, encode_signature, verify_signature, vote_message,
};
