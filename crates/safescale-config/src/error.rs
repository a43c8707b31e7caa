use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration directory not found")]
    ConfigDirNotFound,

    #[error(
        "tenant file not found. Looked in:\n\
        - current directory: safescale.local.yaml, safescale.yaml, .safescale.yaml\n\
        - ./.safescale/ directory\n\
        - ~/.config/safescale/safescale.yaml\n\
        A path can also be given with the SAFESCALE_TENANT_FILE environment variable"
    )]
    TenantFileNotFound,

    #[error("failed to parse tenant file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid tenant configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
