use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IdentityError;
use crate::types::{Address, Identifier};

/// Signing capability supplied by the connected wallet.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Sign a personal message, returning the `0x`-prefixed hex signature.
    async fn sign_message(&self, address: &Address, message: &str) -> Result<String, IdentityError>;

    /// Chain the wallet is connected to.
    fn chain_id(&self) -> u64;
}

/// The connected account: its address plus the wallet's signing capability.
/// At most one identity is active at a time.
#[derive(Clone)]
pub struct Identity {
    address: Address,
    wallet: Arc<dyn WalletSigner>,
}

impl Identity {
    pub fn new(address: Address, wallet: Arc<dyn WalletSigner>) -> Self {
        Self { address, wallet }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn wallet(&self) -> &Arc<dyn WalletSigner> {
        &self.wallet
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("chain_id", &self.wallet.chain_id())
            .finish()
    }
}

/// Account kind reported to the transport. Wallets are always registered
/// as smart contract wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerKind {
    /// Smart contract wallet
    Scw,
}

/// Protocol-facing signer derived from an [`Identity`].
///
/// Smart-wallet accounts sign through the wallet; the transport receives raw
/// signature bytes and the chain id the signature is valid on.
#[derive(Clone)]
pub struct MessagingSigner {
    identity: Identity,
    chain_id: u64,
}

impl MessagingSigner {
    pub fn new(identity: Identity, chain_id: u64) -> Self {
        Self { identity, chain_id }
    }

    pub fn kind(&self) -> SignerKind {
        SignerKind::Scw
    }

    pub fn identifier(&self) -> Identifier {
        Identifier::ethereum(self.identity.address())
    }

    pub fn address(&self) -> &Address {
        self.identity.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Ask the wallet to sign `message` and decode the hex signature.
    pub async fn sign(&self, message: &str) -> Result<Vec<u8>, IdentityError> {
        let signature = self
            .identity
            .wallet()
            .sign_message(self.identity.address(), message)
            .await?;
        decode_signature(&signature)
    }
}

impl fmt::Debug for MessagingSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingSigner")
            .field("address", self.identity.address())
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

fn decode_signature(signature: &str) -> Result<Vec<u8>, IdentityError> {
    let stripped = signature.strip_prefix("0x").unwrap_or(signature);
    let bytes =
        hex::decode(stripped).map_err(|e| IdentityError::MalformedSignature(e.to_string()))?;
    if bytes.is_empty() {
        return Err(IdentityError::MalformedSignature("empty signature".into()));
    }
    Ok(bytes)
}
