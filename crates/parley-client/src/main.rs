//! # parley-demo
//!
//! Runs a full client session against an in-process loopback network:
//! a peer writes first, the local account connects its wallet, loads the
//! conversation list, opens the thread and replies.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;

use parley_client::commands::{conversations, identity, messaging};
use parley_client::config::ClientConfig;
use parley_client::state::AppState;
use parley_net::{spawn_network, DevWallet};
use parley_shared::types::{Address, Identifier};

const LOCAL_ACCOUNT: &str = "0x1111111111111111111111111111111111111111";
const PEER_ACCOUNT: &str = "0x2222222222222222222222222222222222222222";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parley_client::init_logging()?;

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let network = spawn_network(config.network_config());
    let state = AppState::new(config.clone(), Arc::new(network.connector()));

    // The peer has initialized messaging elsewhere.
    let me = Address::parse(LOCAL_ACCOUNT)?;
    let peer = Address::parse(PEER_ACCOUNT)?;
    network.register(&Identifier::ethereum(&me)).await?;
    let peer_inbox = network.register(&Identifier::ethereum(&peer)).await?;

    let dm = network
        .create_dm(&peer_inbox, &Identifier::ethereum(&me))
        .await?;
    network
        .send_text(
            &peer_inbox,
            &dm.id,
            "gm! are you on parley yet?",
            Some(Utc::now() - Duration::minutes(3)),
        )
        .await?;

    let wallet = Arc::new(DevWallet::new(config.chain_id));
    let status = identity::connect_wallet(&state, me.to_string(), wallet)
        .await
        .map_err(anyhow::Error::msg)?;
    info!(status = %status.status, inbox = ?status.inbox_id, "Wallet connected");

    let list = conversations::refresh_conversations(&state)
        .await
        .map_err(anyhow::Error::msg)?;
    for conversation in &list {
        info!(
            peer = %conversation.peer_short,
            last = %conversation.last_message,
            when = ?conversation.last_message_relative,
            "Conversation"
        );
    }

    conversations::select_conversation(&state, Some(dm.id.to_string()))
        .await
        .map_err(anyhow::Error::msg)?;
    messaging::send_message(&state, "gm! just got here".to_string())
        .await
        .map_err(anyhow::Error::msg)?;

    for message in messaging::get_messages(&state) {
        let who = if message.is_sender { "me" } else { "peer" };
        info!(from = who, at = %message.time, "{}", message.content);
    }

    let disconnected = identity::disconnect_wallet(&state).await;
    info!(status = %disconnected.status, "Wallet disconnected");

    state.shutdown().await;
    network.shutdown().await;
    Ok(())
}
