use std::time::Duration;
use tls_channel::TlsConfig;

/// Settings shared by every session a [`TransportPool`](crate::TransportPool) opens.
#[derive(Clone)]
pub struct PoolConfig {
    pub tls: TlsConfig,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Wall-clock bound on one `perform`, from submission to stream close.
    pub perform_timeout: Duration,
    pub user_agent: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tls: TlsConfig::new(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            perform_timeout: Duration::from_secs(5),
            user_agent: default_user_agent(),
        }
    }
}

pub(crate) fn default_user_agent() -> String {
    format!("ganymede-device/{} (rust; http2)", env!("CARGO_PKG_VERSION"))
}
