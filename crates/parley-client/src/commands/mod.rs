//! Host command handlers.
//!
//! Each sub-module groups related commands by domain. Commands take the
//! shared [`AppState`](crate::state::AppState) and report failures as
//! human-readable strings.

pub mod conversations;
pub mod identity;
pub mod messaging;
