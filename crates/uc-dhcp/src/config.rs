use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{DhcpError, Result};

pub const DEFAULT_SERVER_PORT: u16 = 67;

/// One RFC 3442 classless static route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub prefix_len: u8,
    pub network: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl StaticRoute {
    /// Build a route, masking `network` down to `prefix_len` bits.
    pub fn new(network: Ipv4Addr, prefix_len: u8, gateway: Ipv4Addr) -> Self {
        let route = Self {
            prefix_len,
            network,
            gateway,
        };
        Self {
            network: route.masked_network(),
            ..route
        }
    }

    /// Number of destination octets carried on the wire: ceil(prefix / 8).
    pub fn significant_octets(&self) -> usize {
        usize::from(self.prefix_len).div_ceil(8).min(4)
    }

    pub fn masked_network(&self) -> Ipv4Addr {
        let mask = match self.prefix_len {
            0 => 0,
            p if p >= 32 => u32::MAX,
            p => u32::MAX << (32 - u32::from(p)),
        };
        Ipv4Addr::from(u32::from(self.network) & mask)
    }
}

impl fmt::Display for StaticRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} -> {}", self.network, self.prefix_len, self.gateway)
    }
}

/// Option 121 settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub routes: Vec<StaticRoute>,
}

/// Option 252 settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WpadOption {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
}

/// Server policy. Built once at startup and read-only afterwards.
///
/// `0.0.0.0` in `router` or `dns` means "do not send the option".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address of the serving interface, sent as the server identifier.
    #[serde(default = "default_server_ip")]
    pub server_ip: Ipv4Addr,
    #[serde(default = "default_netmask")]
    pub netmask: Ipv4Addr,
    #[serde(default = "unspecified")]
    pub router: Ipv4Addr,
    #[serde(default = "default_port")]
    pub bind_port: u16,
    #[serde(default = "unspecified")]
    pub dns: Ipv4Addr,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_pool_start")]
    pub pool_start: Ipv4Addr,
    #[serde(default = "default_pool_size")]
    pub pool_size: u8,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u32,
    #[serde(default)]
    pub routes: RouteOptions,
    #[serde(default)]
    pub wpad: WpadOption,
}

fn default_server_ip() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 7, 1)
}

fn default_netmask() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

fn unspecified() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_pool_start() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 7, 2)
}

fn default_pool_size() -> u8 {
    8
}

fn default_lease_secs() -> u32 {
    3600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_ip: default_server_ip(),
            netmask: default_netmask(),
            router: Ipv4Addr::UNSPECIFIED,
            bind_port: DEFAULT_SERVER_PORT,
            dns: Ipv4Addr::UNSPECIFIED,
            domain: String::new(),
            pool_start: default_pool_start(),
            pool_size: default_pool_size(),
            lease_secs: default_lease_secs(),
            routes: RouteOptions::default(),
            wpad: WpadOption::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(DhcpError::Config(
                "lease pool size must be greater than zero".to_string(),
            ));
        }

        if self.pool_end().is_none() {
            return Err(DhcpError::Config(format!(
                "lease pool starting at {} with {} entries overflows the IPv4 address space",
                self.pool_start, self.pool_size
            )));
        }

        if self.server_ip.is_unspecified() {
            return Err(DhcpError::Config(
                "server_ip must be the serving interface address".to_string(),
            ));
        }

        Ok(())
    }

    /// Last address of the lease pool, or `None` if the pool is empty or
    /// would wrap around.
    pub fn pool_end(&self) -> Option<Ipv4Addr> {
        let span = u32::from(self.pool_size).checked_sub(1)?;
        u32::from(self.pool_start).checked_add(span).map(Ipv4Addr::from)
    }
}
