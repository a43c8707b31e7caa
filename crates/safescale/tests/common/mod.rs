#![allow(deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A tenant backed by a sandbox whose state and metadata live in a
/// temporary directory.
pub struct TestTenant {
    pub root: TempDir,
}

impl TestTenant {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join("safescale.yaml"),
            r#"
name: test
stack:
  kind: sandbox
  state_file: sandbox.json
metadata:
  root: metadata
readiness:
  probe: immediate
"#,
        )
        .unwrap();
        Self { root }
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// `safescale` running against this tenant.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("safescale").unwrap();
        cmd.current_dir(self.path())
            .env("SAFESCALE_TENANT_FILE", self.path().join("safescale.yaml"))
            .env_remove("RUST_LOG")
            .env_remove("SSH_TIMEOUT");
        cmd
    }
}
