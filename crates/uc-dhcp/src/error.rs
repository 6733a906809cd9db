use thiserror::Error;

/// Errors surfaced by the DHCP server lifecycle.
///
/// Packet-level problems never show up here: malformed datagrams are
/// dropped inside the dispatcher and the client is left to retry.
#[derive(Error, Debug)]
pub enum DhcpError {
    /// The server configuration is unusable (empty pool, pool wrapping past
    /// 255.255.255.255, missing interface address).
    #[error("Invalid DHCP configuration: {0}")]
    Config(String),

    /// Socket creation or bind failed. Usually transient while the network
    /// interface is still coming up.
    #[error("DHCP transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl DhcpError {
    /// Whether retrying `init` later can succeed without a config change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, DhcpError>;
