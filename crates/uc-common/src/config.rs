use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use uc_dhcp::config::DEFAULT_SERVER_PORT;
use uc_dhcp::{MacAddr, RouteOptions, ServerConfig, StaticRoute, WpadOption};

use crate::error::{AppError, Result};

pub const MAX_DOMAIN_LEN: usize = 128;
pub const MAX_WPAD_URL_LEN: usize = 255;
pub const MAX_STATIC_ROUTES: usize = 16;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/usbcoercer/config.json";

/// Process-level settings read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Path of the JSON configuration file
    pub config_path: PathBuf,
    /// Overrides `wpad.http_port`
    pub http_port: Option<u16>,
    /// Overrides `dhcp.port`
    pub dhcp_port: Option<u16>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            http_port: None,
            dhcp_port: None,
        }
    }
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("USBC_CONFIG") {
            config.config_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("USBC_HTTP_PORT") {
            match v.parse() {
                Ok(port) => config.http_port = Some(port),
                Err(_) => warn!("Ignoring invalid USBC_HTTP_PORT '{}'", v),
            }
        }
        if let Ok(v) = std::env::var("USBC_DHCP_PORT") {
            match v.parse() {
                Ok(port) => config.dhcp_port = Some(port),
                Err(_) => warn!("Ignoring invalid USBC_DHCP_PORT '{}'", v),
            }
        }

        config
    }
}

/// USB network interface as seen by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    #[serde(default = "default_local_ip")]
    pub local_ip: String,
    #[serde(default = "default_netmask")]
    pub netmask: String,
    /// Router handed to clients. Empty for none.
    #[serde(default)]
    pub gateway: String,
    #[serde(default = "default_mac")]
    pub mac: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpSection {
    #[serde(default = "default_pool_start")]
    pub pool_start: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u8,
    #[serde(default = "default_lease_time")]
    pub lease_time_secs: u32,
    /// Empty for none; may be inferred from the WPAD URL.
    #[serde(default)]
    pub dns: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_dhcp_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WpadConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Advertised in DHCP option 252.
    #[serde(default)]
    pub url: String,
    /// Inline PAC script served at /wpad.dat. Empty disables the handler.
    #[serde(default)]
    pub pac: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

/// Static routes, either as a JSON list or as a single string separated by
/// `;` or newlines. Entries read `<network>/<prefix>,<gateway>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteList {
    List(Vec<String>),
    Text(String),
}

impl Default for RouteList {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl RouteList {
    /// Non-empty trimmed entries in order.
    pub fn entries(&self) -> Vec<&str> {
        let raw: Vec<&str> = match self {
            Self::List(items) => items.iter().map(String::as_str).collect(),
            Self::Text(text) => text.split([';', '\n']).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Full device configuration, loaded from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub interface: InterfaceConfig,
    #[serde(default)]
    pub dhcp: DhcpSection,
    #[serde(default)]
    pub wpad: WpadConfig,
    #[serde(default)]
    pub routes: RouteList,
}

fn default_local_ip() -> String {
    "192.168.7.1".to_string()
}

fn default_netmask() -> String {
    "255.255.255.0".to_string()
}

fn default_mac() -> String {
    "02:00:5e:10:00:01".to_string()
}

fn default_pool_start() -> String {
    "192.168.7.2".to_string()
}

fn default_pool_size() -> u8 {
    8
}

fn default_lease_time() -> u32 {
    3600
}

fn default_dhcp_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_http_port() -> u16 {
    80
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            local_ip: default_local_ip(),
            netmask: default_netmask(),
            gateway: String::new(),
            mac: default_mac(),
        }
    }
}

impl Default for DhcpSection {
    fn default() -> Self {
        Self {
            pool_start: default_pool_start(),
            pool_size: default_pool_size(),
            lease_time_secs: default_lease_time(),
            dns: String::new(),
            domain: String::new(),
            port: default_dhcp_port(),
        }
    }
}

impl Default for WpadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            pac: String::new(),
            http_port: default_http_port(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(port) = env.http_port {
            self.wpad.http_port = port;
        }
        if let Some(port) = env.dhcp_port {
            self.dhcp.port = port;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.interface_mac()?;
        self.dhcp_server_config().map(|_| ())
    }

    /// Device MAC of the USB gadget interface. Only checked for syntax; the
    /// DHCP server never reads it.
    pub fn interface_mac(&self) -> Result<MacAddr> {
        self.interface
            .mac
            .parse()
            .map_err(|e| AppError::Config(format!("interface.mac: {e}")))
    }

    /// Parsed static routes, capped at [`MAX_STATIC_ROUTES`].
    pub fn static_routes(&self) -> Result<Vec<StaticRoute>> {
        let entries = self.routes.entries();
        if entries.len() > MAX_STATIC_ROUTES {
            warn!(
                "Ignoring extra static route entries beyond {}",
                MAX_STATIC_ROUTES
            );
        }
        entries
            .into_iter()
            .take(MAX_STATIC_ROUTES)
            .map(parse_route)
            .collect()
    }

    /// DNS server handed to clients, inferring it from a literal-IPv4 WPAD
    /// URL host when WPAD is on and none is configured.
    pub fn effective_dns(&self) -> Result<Ipv4Addr> {
        let dns = parse_ipv4("dhcp.dns", &self.dhcp.dns, true)?;
        if !self.wpad.enabled || !dns.is_unspecified() {
            return Ok(dns);
        }

        match ipv4_host_of_url(&self.wpad.url) {
            Some(inferred) => {
                warn!(
                    "No DHCP DNS configured; defaulting to WPAD host {} for compatibility",
                    inferred
                );
                Ok(inferred)
            }
            None => {
                warn!(
                    "WPAD enabled but no DHCP DNS configured; \
                     Windows clients may ignore option 252"
                );
                Ok(dns)
            }
        }
    }

    /// Resolve the file representation into the DHCP server policy.
    pub fn dhcp_server_config(&self) -> Result<ServerConfig> {
        if self.dhcp.pool_size == 0 {
            return Err(AppError::Config(
                "DHCP pool size must be greater than zero".to_string(),
            ));
        }

        if self.dhcp.domain.len() > MAX_DOMAIN_LEN {
            return Err(AppError::Config(format!(
                "DHCP domain exceeds maximum length ({MAX_DOMAIN_LEN})"
            )));
        }

        if self.wpad.enabled && self.wpad.url.len() > MAX_WPAD_URL_LEN {
            return Err(AppError::Config(format!(
                "WPAD URL exceeds maximum length ({MAX_WPAD_URL_LEN})"
            )));
        }

        let routes = self.static_routes()?;

        let config = ServerConfig {
            server_ip: parse_ipv4("interface.local_ip", &self.interface.local_ip, false)?,
            netmask: parse_ipv4("interface.netmask", &self.interface.netmask, false)?,
            router: parse_ipv4("interface.gateway", &self.interface.gateway, true)?,
            bind_port: match self.dhcp.port {
                0 => DEFAULT_SERVER_PORT,
                port => port,
            },
            dns: self.effective_dns()?,
            domain: self.dhcp.domain.clone(),
            pool_start: parse_ipv4("dhcp.pool_start", &self.dhcp.pool_start, false)?,
            pool_size: self.dhcp.pool_size,
            lease_secs: self.dhcp.lease_time_secs,
            routes: RouteOptions {
                enabled: !routes.is_empty(),
                routes,
            },
            wpad: WpadOption {
                enabled: self.wpad.enabled,
                url: if self.wpad.enabled {
                    self.wpad.url.clone()
                } else {
                    String::new()
                },
            },
        };

        config
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Log the effective configuration.
    pub fn log_summary(&self, server: &ServerConfig) {
        info!(
            "Interface IP {} / Netmask {}",
            server.server_ip, server.netmask
        );
        if !server.router.is_unspecified() {
            info!("Gateway {}", server.router);
        }
        info!("MAC {}", self.interface.mac.trim());
        info!(
            "DHCP pool start {} ({} leases), lease time {} seconds, port {}",
            server.pool_start, server.pool_size, server.lease_secs, server.bind_port
        );
        if !server.dns.is_unspecified() {
            info!("DHCP DNS {}", server.dns);
        }
        if !server.domain.is_empty() {
            info!("DHCP domain '{}'", server.domain);
        }
        if self.wpad.enabled {
            info!(
                "WPAD URL {} (inline PAC {} bytes, HTTP port {})",
                self.wpad.url,
                self.wpad.pac.len(),
                self.wpad.http_port
            );
        } else {
            info!("WPAD disabled");
        }
        if server.routes.enabled {
            info!("Static routes ({})", server.routes.routes.len());
            for route in &server.routes.routes {
                info!("  {}", route);
            }
        } else {
            info!("Static routes disabled");
        }
    }
}

fn parse_ipv4(field: &str, text: &str, allow_empty: bool) -> Result<Ipv4Addr> {
    let text = text.trim();
    if allow_empty && text.is_empty() {
        return Ok(Ipv4Addr::UNSPECIFIED);
    }
    text.parse()
        .map_err(|_| AppError::Config(format!("{field}: invalid IPv4 address '{text}'")))
}

/// Parse `<network>/<prefix>,<gateway>`, masking the network to its prefix.
pub fn parse_route(entry: &str) -> Result<StaticRoute> {
    let (network_part, gateway_part) = entry.split_once(',').ok_or_else(|| {
        AppError::Config(format!(
            "Route entry must use '<network>/<prefix>,<gateway>': '{entry}'"
        ))
    })?;

    let (addr_part, prefix_part) = network_part
        .split_once('/')
        .ok_or_else(|| AppError::Config(format!("Route entry missing prefix length: '{entry}'")))?;

    let addr: Ipv4Addr = addr_part
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid network address in route '{entry}'")))?;
    let prefix: u8 = prefix_part
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid prefix length in route '{entry}'")))?;
    let net = Ipv4Net::new(addr, prefix)
        .map_err(|_| AppError::Config(format!("Invalid prefix length in route '{entry}'")))?
        .trunc();

    let gateway: Ipv4Addr = gateway_part
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid gateway address in route '{entry}'")))?;

    Ok(StaticRoute::new(net.network(), net.prefix_len(), gateway))
}

/// Host part of `url` if it is a literal IPv4 address.
pub fn ipv4_host_of_url(url: &str) -> Option<Ipv4Addr> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = rest.split(['/', ':']).next()?;
    host.parse().ok()
}
