// Loopback messaging network: an in-process backend for the transport contract.

pub mod client;
pub mod network;
pub mod registry;
pub mod wallet;

pub use client::{LoopbackClient, LoopbackConnector, LoopbackConversation};
pub use network::{spawn_network, LoopbackNetwork, NetworkConfig, NetworkStats};
pub use registry::{derive_inbox_id, InboxRegistry};
pub use wallet::DevWallet;
