/// Application name
pub const APP_NAME: &str = "Parley";

/// Version tag sent to the network when constructing a client
pub const APP_VERSION: &str = "parley/1.0.0";

/// Abstract mainnet chain id, reported by the signer adapter
pub const DEFAULT_CHAIN_ID: u64 = 2741;

/// Placeholder peer shown when a conversation's counterparty cannot be resolved
pub const UNKNOWN_PEER: &str = "Unknown";

/// Avatar initials shown when the peer is unknown
pub const UNKNOWN_INITIALS: &str = "??";

/// Capacity of each live subscription channel on the loopback network
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Key derivation context for inbox ids (BLAKE3)
pub const KDF_CONTEXT_INBOX_ID: &str = "parley-inbox-id-v1";

/// Message shown when a peer has never registered on the network
pub const NOT_REACHABLE_HINT: &str =
    "This address is not on the network yet. They need to initialize messaging first.";
