//! Sandbox resource records and their persistence.

use crate::error::{Result, SandboxError};
use chrono::{DateTime, Utc};
use safescale_iaas::{HostSize, HostState, NetworkRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// State file format version
pub const STATE_VERSION: u32 = 1;

/// Everything the sandbox knows, keyed by resource ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub hosts: HashMap<String, HostRecord>,
    #[serde(default)]
    pub networks: HashMap<String, NetworkRecord>,
    #[serde(default)]
    pub subnets: HashMap<String, SubnetRecord>,
    #[serde(default)]
    pub floating_ips: HashMap<String, FloatingIpRecord>,
    #[serde(default)]
    pub vips: HashMap<String, VipRecord>,
    /// Last octet handed out in the public range
    #[serde(default)]
    pub public_offset: u32,
}

impl Default for SandboxState {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            hosts: HashMap::new(),
            networks: HashMap::new(),
            subnets: HashMap::new(),
            floating_ips: HashMap::new(),
            vips: HashMap::new(),
            public_offset: 0,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: String,
    pub name: String,
    pub template_id: String,
    pub image_id: String,
    pub size: HostSize,
    pub state: HostState,
    /// Joined networks, the first being the default one
    pub networks: Vec<NetworkRef>,
    /// private address indexed by network ID
    pub addresses: HashMap<String, String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub default_gateway_id: Option<String>,
    #[serde(default)]
    pub is_gateway: bool,
    pub private_key: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: String,
    pub name: String,
    pub cidr: String,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    /// Offset of the last address handed out in the range
    #[serde(default)]
    pub allocated: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetRecord {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIpRecord {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub host_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VipRecord {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub subnet_id: String,
    pub private_ip: String,
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Reads and writes the sandbox state file
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".backup");
        PathBuf::from(name)
    }

    /// Load the state, or an empty one if the file does not exist yet
    pub async fn load(&self) -> Result<SandboxState> {
        if !self.path.exists() {
            tracing::debug!("State file not found, starting from empty sandbox");
            return Ok(SandboxState::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let state: SandboxState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(SandboxError::StateVersion {
                found: state.version,
                supported: STATE_VERSION,
            });
        }

        tracing::debug!(
            "Loaded sandbox state with {} hosts and {} networks",
            state.hosts.len(),
            state.networks.len()
        );
        Ok(state)
    }

    /// Save the state, keeping the previous file as a backup
    pub async fn save(&self, state: &SandboxState) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).await?;
                tracing::debug!("Created state directory: {}", dir.display());
            }
        }

        let backup = self.backup_path();
        if self.path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&self.path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, content).await?;

        tracing::trace!("Saved sandbox state to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let file = StateFile::new(temp_dir.path().join("sandbox.json"));

        let mut state = SandboxState::new();
        state.networks.insert(
            "net-1".into(),
            NetworkRecord {
                id: "net-1".into(),
                name: "front".into(),
                cidr: "192.168.1.0/24".into(),
                dns_servers: vec![],
                allocated: 3,
            },
        );

        file.save(&state).await.unwrap();
        // second save moves the first one to the backup
        file.save(&state).await.unwrap();
        assert!(temp_dir.path().join("sandbox.json.backup").exists());

        let loaded = file.load().await.unwrap();
        assert_eq!(loaded.networks.len(), 1);
        assert_eq!(loaded.networks["net-1"].allocated, 3);
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let file = StateFile::new(temp_dir.path().join("missing.json"));

        let state = file.load().await.unwrap();
        assert!(state.hosts.is_empty());
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sandbox.json");
        let mut state = SandboxState::new();
        state.version = STATE_VERSION + 1;
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let result = StateFile::new(&path).load().await;
        assert!(matches!(result, Err(SandboxError::StateVersion { .. })));
    }
}
