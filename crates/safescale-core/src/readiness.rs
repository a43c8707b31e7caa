//! Probes telling when a freshly created host accepts remote management.

use async_trait::async_trait;
use safescale_iaas::{Error, Host, Result};
use std::time::Duration;
use tokio::net::TcpStream;

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// One readiness check. `NotAvailable` means "not yet", any error kind
    /// that is not retryable ends the wait.
    async fn check(&self, host: &Host) -> Result<()>;
}

/// Considers hosts ready as soon as the provider returns them.
pub struct Immediate;

#[async_trait]
impl ReadinessProbe for Immediate {
    async fn check(&self, _host: &Host) -> Result<()> {
        Ok(())
    }
}

/// Opens a TCP connection to the SSH port of the host.
pub struct TcpProbe {
    port: u16,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(port: u16, connect_timeout: Duration) -> Self {
        Self {
            port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn check(&self, host: &Host) -> Result<()> {
        let address = host
            .public_ip()
            .or_else(|| host.private_ip())
            .ok_or_else(|| Error::logic(format!("host '{}' has no IP address", host.name)))?;

        let target = format!("{}:{}", address, self.port);
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&target)).await {
            Ok(Ok(_)) => {
                tracing::debug!("host '{}' accepts connections on {}", host.name, target);
                Ok(())
            }
            Ok(Err(e)) => Err(Error::NotAvailable(format!(
                "cannot connect to {}: {}",
                target, e
            ))),
            Err(_) => Err(Error::NotAvailable(format!(
                "connection to {} timed out",
                target
            ))),
        }
    }
}
