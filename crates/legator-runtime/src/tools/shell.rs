//! ssh.exec tool — remote command execution over SSH with short-lived
//! certificate credentials.
//!
//! Commands are classified by their first token. The private key and signed
//! certificate are injected from the credential bag, written to a 0600
//! tempdir for the ssh client, and removed after the call.

use crate::error::{RuntimeError, RuntimeResult};
use crate::tools::kubectl::run_command;
use crate::tools::{str_arg, Classification, Tool, ToolCapability, ToolContext};
use async_trait::async_trait;
use legator_types::run::ActionTier;

const READ_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "find", "ps", "df", "du", "free", "uptime", "whoami",
    "id", "uname", "top", "netstat", "ss", "ip", "hostname", "date", "env", "journalctl", "dmesg",
    "lsblk", "mount", "stat", "wc", "which",
];

const SERVICE_COMMANDS: &[&str] = &[
    "systemctl", "service", "docker", "podman", "nginx", "kill", "pkill", "renice", "sysctl",
    "iptables", "ufw",
];

const DESTRUCTIVE_COMMANDS: &[&str] = &[
    "shutdown", "reboot", "halt", "poweroff", "userdel", "groupdel", "umount", "fdisk", "parted",
];

/// Commands that can destroy persisted data.
const DATA_COMMANDS: &[&str] = &["rm", "dd", "mkfs", "shred", "truncate", "wipefs"];

/// Classify a shell command line by its first token.
pub fn classify_command(command: &str) -> (ActionTier, String) {
    let first = command
        .split_whitespace()
        .next()
        .unwrap_or("")
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    if first.is_empty() {
        return (ActionTier::DestructiveMutation, first);
    }
    if DATA_COMMANDS.contains(&first.as_str()) {
        return (ActionTier::DataMutation, first);
    }
    if READ_COMMANDS.contains(&first.as_str()) {
        return (ActionTier::Read, first);
    }
    if SERVICE_COMMANDS.contains(&first.as_str()) {
        return (ActionTier::ServiceMutation, first);
    }
    if DESTRUCTIVE_COMMANDS.contains(&first.as_str()) {
        return (ActionTier::DestructiveMutation, first);
    }
    // Fail closed.
    (ActionTier::DestructiveMutation, first)
}

pub struct SshExecTool;

impl SshExecTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SshExecTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SshExecTool {
    fn name(&self) -> &'static str {
        "ssh.exec"
    }

    fn description(&self) -> &'static str {
        "Execute a command on a remote host over SSH. Credentials are \
         short-lived certificates injected automatically; never supply keys."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "host": {"type": "string", "description": "target host or endpoint name"},
                "command": {"type": "string", "description": "command line to run"},
                "credential": {"type": "string", "description": "credential handle name"}
            },
            "required": ["host", "command"]
        })
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability {
            domain: "ssh",
            tiers: &[
                ActionTier::Read,
                ActionTier::ServiceMutation,
                ActionTier::DestructiveMutation,
                ActionTier::DataMutation,
            ],
            requires_credentials: true,
        }
    }

    fn classify(&self, args: &serde_json::Value) -> Classification {
        let command = str_arg(args, "command");
        let host = str_arg(args, "host");
        let (tier, first) = classify_command(command);
        Classification::allowed(tier, format!("ssh.{first}")).with_target(host.to_string())
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> RuntimeResult<String> {
        let host = str_arg(args, "host");
        let command = str_arg(args, "command");
        if host.is_empty() || command.is_empty() {
            return Err(RuntimeError::tool("ssh.exec", "host and command are required"));
        }

        let handle = str_arg(args, "credential");
        let creds = ctx
            .credentials
            .ssh_credentials(handle)
            .ok_or_else(|| RuntimeError::Credential {
                handle: handle.to_string(),
                message: "no ssh credentials issued for this run".to_string(),
            })?;

        // Identity material exists on disk only for the duration of the call.
        let dir = tempfile::Builder::new()
            .prefix("legator-ssh-")
            .tempdir()
            .map_err(|e| RuntimeError::tool("ssh.exec", format!("tempdir: {e}")))?;
        let key_path = dir.path().join("id_ed25519");
        let cert_path = dir.path().join("id_ed25519-cert.pub");
        write_private(&key_path, creds.private_key_pem.as_str())
            .map_err(|e| RuntimeError::tool("ssh.exec", format!("write key: {e}")))?;
        std::fs::write(&cert_path, &creds.certificate)
            .map_err(|e| RuntimeError::tool("ssh.exec", format!("write cert: {e}")))?;

        let key_str = key_path.display().to_string();
        let cert_opt = format!("CertificateFile={}", cert_path.display());
        let dest = format!("{}@{}", creds.user, host);
        let ssh_args = [
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-o",
            "ConnectTimeout=5",
            "-i",
            key_str.as_str(),
            "-o",
            cert_opt.as_str(),
            dest.as_str(),
            command,
        ];
        run_command(ctx, "ssh", &ssh_args).await
    }
}

#[cfg(unix)]
fn write_private(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)
}
