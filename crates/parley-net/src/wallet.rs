//! Development wallet for the loopback network.
//!
//! Produces deterministic keyed-hash "signatures" so the full client
//! construction path (signer adapter → registration) runs without a real
//! browser wallet. Never use it against a real network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use parley_shared::error::IdentityError;
use parley_shared::identity::WalletSigner;
use parley_shared::types::Address;

pub struct DevWallet {
    chain_id: u64,
    key: [u8; 32],
    refuse: AtomicBool,
    signatures: AtomicUsize,
}

impl DevWallet {
    pub fn new(chain_id: u64) -> Self {
        Self::with_seed(chain_id, b"parley-dev-wallet")
    }

    pub fn with_seed(chain_id: u64, seed: &[u8]) -> Self {
        Self {
            chain_id,
            key: *blake3::hash(seed).as_bytes(),
            refuse: AtomicBool::new(false),
            signatures: AtomicUsize::new(0),
        }
    }

    /// Make subsequent signing requests fail, as if the user rejected them.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of signatures produced so far.
    pub fn signature_count(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletSigner for DevWallet {
    async fn sign_message(&self, address: &Address, message: &str) -> Result<String, IdentityError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(IdentityError::Signing("user rejected the request".into()));
        }
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(address.as_str().as_bytes());
        hasher.update(message.as_bytes());
        self.signatures.fetch_add(1, Ordering::SeqCst);
        Ok(format!("0x{}", hex::encode(hasher.finalize().as_bytes())))
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        Address::parse("0x00000000000000000000000000000000000a11ce").unwrap()
    }

    #[tokio::test]
    async fn test_signatures_are_deterministic() {
        let wallet = DevWallet::new(1);
        let a = wallet.sign_message(&addr(), "hello").await.unwrap();
        let b = wallet.sign_message(&addr(), "hello").await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("0x"));
        assert_eq!(wallet.signature_count(), 2);
    }

    #[tokio::test]
    async fn test_refusing_wallet() {
        let wallet = DevWallet::new(1);
        wallet.set_refuse(true);
        assert!(wallet.sign_message(&addr(), "hello").await.is_err());
        assert_eq!(wallet.signature_count(), 0);
    }
}
