//! Sandbox stack error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("network not found: {0}")]
    NetworkNotFound(String),

    #[error("subnet not found: {0}")]
    SubnetNotFound(String),

    #[error("floating IP not found: {0}")]
    FloatingIpNotFound(String),

    #[error("virtual IP not found: {0}")]
    VipNotFound(String),

    #[error("no image matches '{0}'")]
    ImageNotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("address range {0} is exhausted")]
    AddressExhausted(String),

    #[error("host {id} did not reach state {state} in {after:?}")]
    WaitTimeout {
        id: String,
        state: String,
        after: std::time::Duration,
    },

    #[error("state file version {found} is newer than supported version {supported}")]
    StateVersion { found: u32, supported: u32 },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SandboxError {
    /// HTTP-equivalent status a real provider would answer with.
    pub fn status(&self) -> u16 {
        match self {
            SandboxError::HostNotFound(_)
            | SandboxError::NetworkNotFound(_)
            | SandboxError::SubnetNotFound(_)
            | SandboxError::FloatingIpNotFound(_)
            | SandboxError::VipNotFound(_)
            | SandboxError::ImageNotFound(_) => 404,
            SandboxError::InvalidRequest(_) => 400,
            SandboxError::Conflict(_) => 409,
            SandboxError::WaitTimeout { .. } => 408,
            SandboxError::AddressExhausted(_) => 503,
            _ => 500,
        }
    }
}

impl From<SandboxError> for safescale_iaas::Error {
    fn from(err: SandboxError) -> Self {
        use safescale_iaas::Error;

        match err.status() {
            404 => Error::NotFound(err.to_string()),
            400 => Error::InvalidRequest(err.to_string()),
            408 => {
                let after = match &err {
                    SandboxError::WaitTimeout { after, .. } => *after,
                    _ => std::time::Duration::ZERO,
                };
                Error::timeout(err.to_string(), after, None)
            }
            status => Error::Infra {
                message: err.to_string(),
                status: Some(status),
                source: Some(Box::new(err)),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
