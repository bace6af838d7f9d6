//! Client side of the signaling relay

mod relay_client;

pub use relay_client::RelayClient;
