//! DHCP lease server for the access-point gateway.
//!
//! Answers DHCPDISCOVER with DHCPOFFER and DHCPREQUEST with DHCPACK from a
//! small fixed pool. Everything else is dropped without a reply.

pub mod config;
pub mod options;
pub mod packet;
pub mod lease_table;
pub mod state_machine;
pub mod server;

pub use config::DhcpConfig;
pub use lease_table::LeaseTable;
pub use state_machine::{DhcpResponse, Dropped};

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Everything the server keeps between datagrams.
pub struct DhcpState {
    pub config: config::DhcpConfig,
    pub leases: lease_table::LeaseTable,
    started: Instant,
}

impl DhcpState {
    /// Build the state from a config that passes `DhcpConfig::validate`.
    pub fn try_new(config: config::DhcpConfig) -> Result<Self, config::ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Build the state without validating `config`. Pool addresses are only
    /// meaningful for a config that `validate` accepts; prefer `try_new`.
    pub fn new(config: config::DhcpConfig) -> Self {
        let leases = lease_table::LeaseTable::new(config.pool_base, config.pool_size);
        Self {
            config,
            leases,
            started: Instant::now(),
        }
    }

    /// Milliseconds on the monotonic clock lease expiries are measured against.
    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

pub type SharedDhcpState = Arc<RwLock<DhcpState>>;
