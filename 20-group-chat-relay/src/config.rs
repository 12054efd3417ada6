use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::cli::ServerArgs;

/// Port the mobile client dials.
pub const DEFAULT_PORT: u16 = 5000;

/// How long one recipient may take to accept a frame before it is dropped.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl From<&ServerArgs> for RelayConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            listen: args.listen,
            write_timeout: Duration::from_millis(args.write_timeout_ms),
        }
    }
}
