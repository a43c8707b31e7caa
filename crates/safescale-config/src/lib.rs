pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable giving the tenant file path directly
pub const TENANT_FILE_ENV: &str = "SAFESCALE_TENANT_FILE";

/// Environment variable overriding the readiness wait, in minutes
pub const SSH_TIMEOUT_ENV: &str = "SSH_TIMEOUT";

const CANDIDATES: [&str; 3] = ["safescale.local.yaml", "safescale.yaml", ".safescale.yaml"];

/// Returns the SafeScale data directory, creating it if needed.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("safescale");

    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}

/// Looks for the tenant file.
///
/// Search order:
/// 1. `SAFESCALE_TENANT_FILE` environment variable (direct path)
/// 2. current directory: safescale.local.yaml, safescale.yaml, .safescale.yaml
/// 3. `./.safescale/` directory, same order
/// 4. `~/.config/safescale/safescale.yaml` (global tenant)
pub fn find_tenant_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(TENANT_FILE_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(
            "{} points to missing file {}, ignoring",
            TENANT_FILE_ENV,
            path.display()
        );
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let local_dir = current_dir.join(".safescale");
    if local_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("safescale").join("safescale.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::TenantFileNotFound)
}

/// Loads the discovered tenant, or the built-in default tenant when no
/// tenant file exists.
pub fn load() -> Result<TenantConfig> {
    match find_tenant_file() {
        Ok(path) => load_tenant(&path),
        Err(ConfigError::TenantFileNotFound) => {
            tracing::debug!("no tenant file found, using default tenant");
            Ok(TenantConfig::default())
        }
        Err(e) => Err(e),
    }
}

/// Loads a tenant file. Relative paths inside it are resolved against the
/// file's directory.
pub fn load_tenant(path: &Path) -> Result<TenantConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut tenant: TenantConfig =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    if tenant.name.trim().is_empty() {
        return Err(ConfigError::Invalid("tenant name cannot be empty".into()));
    }

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    if let Some(state_file) = tenant.stack.state_file.take() {
        tenant.stack.state_file = Some(base.join(state_file));
    }
    if let Some(root) = tenant.metadata.root.take() {
        tenant.metadata.root = Some(base.join(root));
    }

    tracing::debug!("loaded tenant '{}' from {}", tenant.name, path.display());
    Ok(tenant)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub name: String,
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            stack: StackConfig::default(),
            metadata: MetadataConfig::default(),
            readiness: ReadinessConfig::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl TenantConfig {
    /// Directory holding this tenant's local data.
    pub fn data_dir(&self) -> Result<PathBuf> {
        Ok(get_data_dir()?.join(&self.name))
    }

    /// Root of the metadata folder, defaulting to the tenant data directory.
    pub fn metadata_root(&self) -> Result<PathBuf> {
        match &self.metadata.root {
            Some(root) => Ok(root.clone()),
            None => Ok(self.data_dir()?.join("metadata")),
        }
    }

    /// State file of the stack, defaulting to the tenant data directory.
    pub fn state_file(&self) -> Result<PathBuf> {
        match &self.stack.state_file {
            Some(path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join(format!("{}.json", self.stack.kind))),
        }
    }

    /// Readiness probe to use. The sandbox stack has no reachable hosts, so
    /// it waits for nothing unless told otherwise.
    pub fn probe(&self) -> ProbeKind {
        self.readiness.probe.unwrap_or(match self.stack.kind {
            StackKind::Sandbox => ProbeKind::Immediate,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackKind {
    #[default]
    Sandbox,
}

impl std::fmt::Display for StackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackKind::Sandbox => write!(f, "sandbox"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub kind: StackKind,
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// TCP connect to the SSH port
    Tcp,
    /// Hosts are considered ready as soon as they are created
    Immediate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default)]
    pub probe: Option<ProbeKind>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            probe: None,
            ssh_port: default_ssh_port(),
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

/// Operation timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_host_operation")]
    pub host_operation_secs: u64,
    #[serde(default = "default_host_cleanup")]
    pub host_cleanup_secs: u64,
    #[serde(default = "default_metadata")]
    pub metadata_secs: u64,
    #[serde(default = "default_ssh_connect")]
    pub ssh_connect_secs: u64,
}

fn default_host_operation() -> u64 {
    300
}

fn default_host_cleanup() -> u64 {
    180
}

fn default_metadata() -> u64 {
    60
}

fn default_ssh_connect() -> u64 {
    10
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            host_operation_secs: default_host_operation(),
            host_cleanup_secs: default_host_cleanup(),
            metadata_secs: default_metadata(),
            ssh_connect_secs: default_ssh_connect(),
        }
    }
}

impl Timeouts {
    pub fn host_operation(&self) -> Duration {
        Duration::from_secs(self.host_operation_secs)
    }

    pub fn host_cleanup(&self) -> Duration {
        Duration::from_secs(self.host_cleanup_secs)
    }

    pub fn metadata(&self) -> Duration {
        Duration::from_secs(self.metadata_secs)
    }

    pub fn ssh_connect(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_secs)
    }

    /// How long to wait for a new host to accept SSH connections.
    ///
    /// `SSH_TIMEOUT` (integer minutes) overrides the host operation timeout.
    pub fn readiness(&self) -> Duration {
        match std::env::var(SSH_TIMEOUT_ENV) {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(minutes) => Duration::from_secs(minutes.saturating_mul(60)),
                Err(_) => {
                    tracing::warn!(
                        "ignoring {}='{}': not a number of minutes",
                        SSH_TIMEOUT_ENV,
                        value
                    );
                    self.host_operation()
                }
            },
            Err(_) => self.host_operation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_find_tenant_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("safescale.yaml"), "name: test").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(TENANT_FILE_ENV, find_tenant_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with("safescale.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_tenant_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("safescale.yaml"), "name: shared").unwrap();
        fs::write(temp_dir.path().join("safescale.local.yaml"), "name: mine").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(TENANT_FILE_ENV, find_tenant_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with("safescale.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_tenant_file_in_local_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let local_dir = temp_dir.path().join(".safescale");
        fs::create_dir(&local_dir).unwrap();
        fs::write(local_dir.join("safescale.yaml"), "name: nested").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(TENANT_FILE_ENV, find_tenant_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with(".safescale/safescale.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_tenant_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "name: custom").unwrap();

        let result = temp_env::with_var(TENANT_FILE_ENV, Some(&config_path), find_tenant_file);
        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_load_tenant_resolves_relative_paths() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("safescale.yaml");
        fs::write(
            &path,
            r#"
name: lab
stack:
  kind: sandbox
  state_file: state/sandbox.json
metadata:
  root: meta
readiness:
  probe: tcp
  ssh_port: 2222
timeouts:
  host_operation_secs: 30
"#,
        )
        .unwrap();

        let tenant = load_tenant(&path).unwrap();
        assert_eq!(tenant.name, "lab");
        assert_eq!(
            tenant.state_file().unwrap(),
            temp_dir.path().join("state/sandbox.json")
        );
        assert_eq!(tenant.metadata_root().unwrap(), temp_dir.path().join("meta"));
        assert_eq!(tenant.probe(), ProbeKind::Tcp);
        assert_eq!(tenant.readiness.ssh_port, 2222);
        assert_eq!(tenant.timeouts.host_operation(), Duration::from_secs(30));
        // unspecified timeouts keep their defaults
        assert_eq!(tenant.timeouts.host_cleanup(), Duration::from_secs(180));
    }

    #[test]
    fn test_load_tenant_rejects_bad_yaml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("safescale.yaml");
        fs::write(&path, "name: [unclosed").unwrap();

        let result = load_tenant(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_sandbox_defaults_to_immediate_probe() {
        let tenant = TenantConfig::default();
        assert_eq!(tenant.probe(), ProbeKind::Immediate);
    }

    #[test]
    #[serial]
    fn test_readiness_timeout_override() {
        let timeouts = Timeouts::default();

        temp_env::with_var_unset(SSH_TIMEOUT_ENV, || {
            assert_eq!(timeouts.readiness(), Duration::from_secs(300));
        });
        temp_env::with_var(SSH_TIMEOUT_ENV, Some("3"), || {
            assert_eq!(timeouts.readiness(), Duration::from_secs(180));
        });
        temp_env::with_var(SSH_TIMEOUT_ENV, Some("soon"), || {
            assert_eq!(timeouts.readiness(), Duration::from_secs(300));
        });
        // larger than any deadline, but still a valid wait
        temp_env::with_var(SSH_TIMEOUT_ENV, Some("400000000000000000"), || {
            assert_eq!(timeouts.readiness(), Duration::from_secs(u64::MAX));
        });
    }
}
