//! Devnet supervisor (component G, spec.md §4.5): an ephemeral local
//! chain node, one per devnet object, driven through the `docker` CLI
//! via `Command::new("docker")` — no docker-engine client crate is
//! part of this dependency stack.

use crate::agent::AgentOpts;
use crate::chain::DevnetNode;
use crate::error::{bail, warn, AnyResult, Warning};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::process::Command;

/// Port exposure scheme, chosen per chain variant (spec.md §6 mapping
/// table, left abstract here since that table lives outside this
/// crate's scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMode {
    /// HTTP/LCD.
    Lcp,
    GrpcWeb,
}

impl PortMode {
    fn url(&self, host: &str, port: u16) -> String {
        match self {
            PortMode::Lcp => format!("http://{host}:{port}"),
            PortMode::GrpcWeb => format!("grpc-web://{host}:{port}"),
        }
    }
}

/// `devnet.json` (spec.md §4.5 State directory).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DevnetState {
    pub chain_id: String,
    pub container_id: Option<String>,
    pub port: u16,
    pub host: Option<String>,
}

/// Supervises one local chain node under `state/<chainId>/`.
pub struct Devnet {
    pub chain_id: String,
    pub state_dir: PathBuf,
    pub port_mode: PortMode,
    pub image: String,
    pub ephemeral: bool,
    state: Mutex<Option<DevnetState>>,
}

impl Devnet {
    pub fn new(chain_id: impl Into<String>, state_root: impl Into<PathBuf>, port_mode: PortMode, image: impl Into<String>) -> Self {
        let chain_id = chain_id.into();
        let state_dir = state_root.into().join(&chain_id);
        Self { chain_id, state_dir, port_mode, image: image.into(), ephemeral: false, state: Mutex::new(None) }
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join("devnet.json")
    }

    /// Reconstitutes state from `devnet.json` if present. A stored
    /// `chainId` that disagrees with this supervisor's is a warning,
    /// not an error (spec.md §4.5).
    pub fn load(&self) -> AnyResult<Option<DevnetState>> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let loaded: DevnetState = serde_json::from_str(&contents)?;
        if loaded.chain_id != self.chain_id {
            warn(Warning::DevnetStateChainIdMismatch { expected: self.chain_id.clone(), found: loaded.chain_id.clone() });
        }
        *self.state.lock().unwrap() = Some(loaded.clone());
        Ok(Some(loaded))
    }

    fn persist(&self, state: &DevnetState) -> AnyResult<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(self.state_path(), json)?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.lock().unwrap().as_ref().and_then(|s| s.container_id.as_ref()).is_some()
    }

    /// Creates and starts the node container on a chosen port (fresh
    /// if none was previously recorded), pre-funds genesis accounts
    /// implicitly via `genesis_account`, and writes `devnet.json`
    /// (spec.md §4.5 Lifecycle).
    pub async fn spawn(&self) -> AnyResult<DevnetState> {
        let port = self.load()?.map(|s| s.port).unwrap_or_else(choose_port);
        let name = format!("fadroma-devnet-{}", self.chain_id);

        let output = Command::new("docker")
            .args(["run", "-d", "--name", &name, "-p", &format!("{port}:{port}")])
            .arg(&self.image)
            .output()
            .await?;
        if !output.status.success() {
            bail!("docker run failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let state = DevnetState { chain_id: self.chain_id.clone(), container_id: Some(container_id), port, host: None };
        self.persist(&state)?;
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(state)
    }

    /// Spawn-if-not-running (spec.md §4.5).
    pub async fn respawn(&self) -> AnyResult<DevnetState> {
        self.load()?;
        if self.is_running() {
            return Ok(self.state.lock().unwrap().clone().expect("checked by is_running"));
        }
        self.spawn().await
    }

    /// Stops the node container, leaving `devnet.json` and the state
    /// directory intact (spec.md §4.5 `kill`).
    pub async fn kill(&self) -> AnyResult<()> {
        let container_id = {
            let state = self.state.lock().unwrap();
            state.as_ref().and_then(|s| s.container_id.clone())
        };
        if let Some(container_id) = container_id {
            let status = Command::new("docker").args(["stop", &container_id]).status().await?;
            if !status.success() {
                bail!("docker stop failed for container {container_id}");
            }
        }
        if let Some(state) = self.state.lock().unwrap().as_mut() {
            state.container_id = None;
        }
        Ok(())
    }

    /// `kill` + erase the state directory (spec.md §4.5 `terminate`).
    pub async fn terminate(&self) -> AnyResult<()> {
        self.kill().await?;
        if self.state_dir.exists() {
            std::fs::remove_dir_all(&self.state_dir)?;
        }
        *self.state.lock().unwrap() = None;
        Ok(())
    }

    /// Deterministic per-`(chainId, name)` genesis identity: no real
    /// wallet/BIP-39 crate is in this pipeline's dependency stack, so
    /// the "mnemonic" is a stable sha256-derived placeholder — good
    /// enough for reruns to produce the same identity, which is the
    /// only property spec.md §4.5 requires.
    pub fn get_genesis_account(&self, name: &str) -> AnyResult<AgentOpts> {
        let mut hasher = Sha256::new();
        hasher.update(self.chain_id.as_bytes());
        hasher.update(b":");
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        let seed = hex(&digest);

        Ok(AgentOpts {
            address: Some(format!("mocknet1{}", &seed[..38])),
            name: Some(name.to_string()),
            mnemonic: Some(seed),
            fees: None,
        })
    }
}

impl DevnetNode for Devnet {
    fn url(&self) -> String {
        let state = self.state.lock().unwrap();
        let (port, host) = state.as_ref().map(|s| (s.port, s.host.clone())).unwrap_or((0, None));
        self.port_mode.url(host.as_deref().unwrap_or("localhost"), port)
    }

    fn chain_id(&self) -> String {
        self.chain_id.clone()
    }

    fn genesis_account(&self, name: &str) -> AnyResult<AgentOpts> {
        self.get_genesis_account(name)
    }
}

impl Drop for Devnet {
    fn drop(&mut self) {
        if self.ephemeral {
            let container_id = self.state.lock().unwrap().as_ref().and_then(|s| s.container_id.clone());
            if let Some(container_id) = container_id {
                let _ = std::process::Command::new("docker").args(["stop", &container_id]).status();
            }
            let _ = std::fs::remove_dir_all(&self.state_dir);
        }
    }
}

fn choose_port() -> u16 {
    1024 + (std::process::id() % (65535 - 1024)) as u16
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
