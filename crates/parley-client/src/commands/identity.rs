use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use parley_shared::identity::{Identity, WalletSigner};
use parley_shared::types::Address;
use parley_sync::InitOutcome;

use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatusDto {
    /// `absent`, `pending`, `ready` or `failed`.
    pub status: String,
    pub address: Option<String>,
    pub short_address: Option<String>,
    pub inbox_id: Option<String>,
    pub env: String,
    pub error: Option<String>,
}

pub fn client_status(state: &AppState) -> ClientStatusDto {
    let phase = state.clients.phase();
    let address = state.clients.identity().map(|i| i.address().clone());
    ClientStatusDto {
        status: phase.name().to_string(),
        short_address: address.as_ref().map(Address::short),
        address: address.map(|a| a.to_string()),
        inbox_id: phase.client().map(|c| c.inbox_id().to_string()),
        env: state.config.env.to_string(),
        error: phase.error().map(str::to_string),
    }
}

async fn initialize(state: &AppState) -> Result<ClientStatusDto, String> {
    match state.clients.initialize().await {
        InitOutcome::Failed => Err(state
            .clients
            .error()
            .unwrap_or_else(|| "Failed to initialize messaging client".to_string())),
        InitOutcome::NoIdentity => Err("No wallet connected".to_string()),
        _ => Ok(client_status(state)),
    }
}

/// Bind a wallet account and build its messaging client.
pub async fn connect_wallet(
    state: &AppState,
    address: String,
    wallet: Arc<dyn WalletSigner>,
) -> Result<ClientStatusDto, String> {
    let address = Address::parse(&address).map_err(|e| e.to_string())?;
    info!(address = %address.short(), "Connecting wallet");
    state
        .clients
        .set_identity(Some(Identity::new(address, wallet)))
        .await;
    initialize(state).await
}

pub async fn disconnect_wallet(state: &AppState) -> ClientStatusDto {
    info!("Disconnecting wallet");
    state.clients.set_identity(None).await;
    client_status(state)
}

/// Retry after a failed initialization.
pub async fn retry_initialize(state: &AppState) -> Result<ClientStatusDto, String> {
    initialize(state).await
}

/// Reachability keyed by the address as given.
pub async fn can_message(
    state: &AppState,
    addresses: Vec<String>,
) -> Result<HashMap<String, bool>, String> {
    let parsed = addresses
        .iter()
        .map(|a| Address::parse(a).map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    let answers = state
        .clients
        .can_message(&parsed)
        .await
        .map_err(|e| e.to_string())?;
    Ok(addresses
        .into_iter()
        .zip(parsed)
        .map(|(raw, address)| {
            let reachable = answers.get(&address).copied().unwrap_or(false);
            (raw, reachable)
        })
        .collect())
}
