use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// UDP port the server listens on.
pub const DHCP_SERVER_PORT: u16 = 67;
/// UDP port replies are sent to.
pub const DHCP_CLIENT_PORT: u16 = 68;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pool_size must be at least 1")]
    EmptyPool,
    #[error("pool .{base}+{size} does not fit in the last octet (1..=254)")]
    PoolOutOfRange { base: u8, size: usize },
    #[error("netmask {0} is not contiguous")]
    InvalidNetmask(Ipv4Addr),
    #[error("server address {0} lies inside the lease pool")]
    ServerInPool(Ipv4Addr),
    #[error("lease_time_secs must be between 1 and {max}", max = u32::MAX)]
    InvalidLeaseTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interface to bind to; empty means all interfaces.
    #[serde(default)]
    pub interface: String,
    /// Our own address. Also advertised as router and DNS server.
    #[serde(default = "default_server_address")]
    pub server_address: Ipv4Addr,
    #[serde(default = "default_netmask")]
    pub netmask: Ipv4Addr,
    /// Last octet of the first pool address.
    #[serde(default = "default_pool_base")]
    pub pool_base: u8,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_lease_time")]
    pub lease_time_secs: u64,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_client_port")]
    pub client_port: u16,
}

fn default_true() -> bool {
    true
}

fn default_server_address() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 4, 1)
}

fn default_netmask() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

fn default_pool_base() -> u8 {
    16
}

fn default_pool_size() -> usize {
    8
}

fn default_lease_time() -> u64 {
    86400
}

fn default_listen_port() -> u16 {
    DHCP_SERVER_PORT
}

fn default_client_port() -> u16 {
    DHCP_CLIENT_PORT
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interface: String::new(),
            server_address: default_server_address(),
            netmask: default_netmask(),
            pool_base: default_pool_base(),
            pool_size: default_pool_size(),
            lease_time_secs: default_lease_time(),
            listen_port: default_listen_port(),
            client_port: default_client_port(),
        }
    }
}

impl DhcpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::EmptyPool);
        }

        let last = self.pool_base as usize + self.pool_size - 1;
        if self.pool_base == 0 || last > 254 {
            return Err(ConfigError::PoolOutOfRange {
                base: self.pool_base,
                size: self.pool_size,
            });
        }

        ipnet::ipv4_mask_to_prefix(self.netmask)
            .map_err(|_| ConfigError::InvalidNetmask(self.netmask))?;

        let own = self.server_address.octets()[3] as usize;
        if (self.pool_base as usize..=last).contains(&own) {
            return Err(ConfigError::ServerInPool(self.server_address));
        }

        if self.lease_time_secs == 0 || self.lease_time_secs > u32::MAX as u64 {
            return Err(ConfigError::InvalidLeaseTime);
        }

        Ok(())
    }

    /// First and last address of the pool.
    pub fn pool_range(&self) -> (Ipv4Addr, Ipv4Addr) {
        let [a, b, c, _] = self.server_address.octets();
        let last = self.pool_base.saturating_add(self.pool_size.saturating_sub(1) as u8);
        (Ipv4Addr::new(a, b, c, self.pool_base), Ipv4Addr::new(a, b, c, last))
    }

    pub fn lease_time_ms(&self) -> u64 {
        self.lease_time_secs.saturating_mul(1000)
    }
}
