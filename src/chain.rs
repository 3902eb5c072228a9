//! Chain abstraction (component E, spec.md §4.3): a connection to one
//! backend, exposing read-only operations uniform across Mainnet,
//! Testnet, Devnet, and Mocknet.

use crate::agent::{Agent, AgentOpts};
use crate::error::{warn, AnyResult, Error, Warning};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mainnet,
    Testnet,
    Devnet,
    Mocknet,
}

/// A reference to the devnet node backing a `Mode::Devnet` chain. The
/// core only needs genesis-account lookup and identity fields out of
/// it; the full supervisor lives in `crate::devnet`.
pub trait DevnetNode: Send + Sync {
    fn url(&self) -> String;
    fn chain_id(&self) -> String;
    fn genesis_account(&self, name: &str) -> AnyResult<AgentOpts>;
}

/// Backend-specific read operations a `Chain` delegates to. One impl
/// per chain family (Secret Network variants, Mocknet); see
/// `crate::mocknet` for the in-process implementation.
#[async_trait::async_trait]
pub trait ChainBackend: Send + Sync {
    async fn height(&self) -> AnyResult<u64>;
    async fn get_balance(&self, denom: &str, address: &str) -> AnyResult<u128>;
    async fn query(&self, contract: &str, msg: &[u8]) -> AnyResult<Vec<u8>>;
    async fn get_code_id(&self, address: &str) -> AnyResult<u64>;
    async fn get_label(&self, address: &str) -> AnyResult<String>;
    async fn get_hash_by_address(&self, address: &str) -> AnyResult<String>;
    async fn get_hash_by_code_id(&self, code_id: u64) -> AnyResult<String>;
}

/// A connection to one chain backend (spec.md §4.3).
pub struct Chain {
    pub id: String,
    pub url: String,
    pub mode: Mode,
    pub node: Option<Arc<dyn DevnetNode>>,
    pub backend: Arc<dyn crate::agent::Backend>,
}

impl Chain {
    pub fn new(id: impl Into<String>, url: impl Into<String>, mode: Mode, backend: Arc<dyn crate::agent::Backend>) -> Self {
        Self { id: id.into(), url: url.into(), mode, node: None, backend }
    }

    /// Attach a devnet node. Per spec.md §4.3: a node given with a
    /// non-Devnet mode is ignored (warning surfaced); on Devnet, a
    /// disagreeing `node.url`/`node.chainId` overrides the values passed
    /// here (the node wins).
    pub fn with_node(mut self, node: Arc<dyn DevnetNode>) -> Self {
        if self.mode != Mode::Devnet {
            warn(Warning::NodeIgnoredForMode);
            return self;
        }
        let node_url = node.url();
        if node_url != self.url {
            warn(Warning::DevnetNodeOverride { field: "url" });
            self.url = node_url;
        }
        let node_chain_id = node.chain_id();
        if node_chain_id != self.id {
            warn(Warning::DevnetNodeOverride { field: "chainId" });
            self.id = node_chain_id;
        }
        self.node = Some(node);
        self
    }

    pub fn is_devnet(&self) -> bool {
        self.mode == Mode::Devnet
    }

    pub fn is_mocknet(&self) -> bool {
        self.mode == Mode::Mocknet
    }

    /// `devMode = isDevnet || isMocknet` (spec.md §4.3).
    pub fn dev_mode(&self) -> bool {
        self.is_devnet() || self.is_mocknet()
    }

    pub async fn height(&self) -> AnyResult<u64> {
        self.backend.height().await
    }

    /// Polls at ~100ms intervals with no hard upper bound until the
    /// block height strictly increases (spec.md §4.3, §5 Timeouts —
    /// caller supplies cancellation, e.g. by wrapping in `tokio::time::timeout`).
    pub async fn next_block(&self) -> AnyResult<u64> {
        let start = self.height().await?;
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let current = self.height().await?;
            if current > start {
                return Ok(current);
            }
        }
    }

    pub async fn get_balance(&self, denom: &str, address: &str) -> AnyResult<u128> {
        self.backend.get_balance(denom, address).await
    }

    pub async fn query(&self, contract: &str, msg: &[u8]) -> AnyResult<Vec<u8>> {
        self.backend.query(contract, msg).await
    }

    pub async fn get_code_id(&self, address: &str) -> AnyResult<u64> {
        self.backend.get_code_id(address).await
    }

    pub async fn get_label(&self, address: &str) -> AnyResult<String> {
        self.backend.get_label(address).await
    }

    pub async fn get_hash(&self, address: Option<&str>, code_id: Option<u64>) -> AnyResult<String> {
        match (address, code_id) {
            (Some(addr), _) => self.backend.get_hash_by_address(addr).await,
            (None, Some(id)) => self.backend.get_hash_by_code_id(id).await,
            (None, None) => Err(Error::LinkNoAddress.into()),
        }
    }

    /// Fetches the hash on-chain and compares it to `expected`, warning
    /// (not failing) on mismatch, always returning the fetched hash
    /// (spec.md §4.3).
    pub async fn check_hash(&self, address: &str, expected: Option<&str>) -> AnyResult<String> {
        let fetched = self.backend.get_hash_by_address(address).await?;
        match expected {
            Some(expected) if expected != fetched => {
                warn(Warning::CodeHashMismatch {
                    address: address.to_string(),
                    expected: expected.to_string(),
                    fetched: fetched.clone(),
                });
            }
            None => warn(Warning::NoCodeHashSupplied),
            _ => {}
        }
        Ok(fetched)
    }

    /// Returns an `Agent` for this chain. On devnet, a `name` with no
    /// `mnemonic` resolves through the node's genesis-account API
    /// (spec.md §4.3).
    pub fn get_agent(self: &Arc<Self>, mut opts: AgentOpts) -> AnyResult<Agent> {
        if opts.mnemonic.is_none() {
            if let Some(name) = &opts.name {
                if !self.is_devnet() {
                    return Err(Error::NameOutsideDevnet(name.clone()).into());
                }
                let node = self.node.as_ref().ok_or(Error::NameOutsideDevnet(name.clone()))?;
                let genesis = node.genesis_account(name)?;
                opts.mnemonic = genesis.mnemonic;
                opts.address = genesis.address.or(opts.address);
            }
        }
        Ok(Agent::new(self.clone(), opts))
    }
}

/// A named collection of configured `Chain`s, resolving `FADROMA_CHAIN`-style
/// selection by id (spec.md §6 "`FADROMA_CHAIN` (registry key selecting a
/// Chain)"). Config loading itself is out of this crate's scope; this just
/// holds whatever the caller registers and resolves a selection against it.
#[derive(Default)]
pub struct ChainRegistry {
    chains: HashMap<String, Arc<Chain>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `chain` under its own `id`. An empty id cannot be
    /// resolved by `select`, so it is rejected up front.
    pub fn register(&mut self, chain: Arc<Chain>) -> AnyResult<()> {
        if chain.id.is_empty() {
            return Err(Error::NoChainId.into());
        }
        self.chains.insert(chain.id.clone(), chain);
        Ok(())
    }

    /// Resolves `selected` (typically `FADROMA_CHAIN`) against the
    /// registry: `None` with nothing selected is an error rather than an
    /// arbitrary default, and a name with no matching entry is reported
    /// with the id that was asked for (spec.md §6 error kinds).
    pub fn select(&self, selected: Option<&str>) -> AnyResult<Arc<Chain>> {
        let id = selected.ok_or(Error::NoChainSelected)?;
        self.chains
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownChainSelected(id.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeBackend(AtomicU64);

    #[async_trait::async_trait]
    impl ChainBackend for FakeBackend {
        async fn height(&self) -> AnyResult<u64> {
            Ok(self.0.load(Ordering::SeqCst))
        }
        async fn get_balance(&self, _denom: &str, _address: &str) -> AnyResult<u128> {
            Ok(0)
        }
        async fn query(&self, _contract: &str, _msg: &[u8]) -> AnyResult<Vec<u8>> {
            Ok(vec![])
        }
        async fn get_code_id(&self, _address: &str) -> AnyResult<u64> {
            Ok(1)
        }
        async fn get_label(&self, _address: &str) -> AnyResult<String> {
            Ok("label".into())
        }
        async fn get_hash_by_address(&self, _address: &str) -> AnyResult<String> {
            Ok("hash".into())
        }
        async fn get_hash_by_code_id(&self, _code_id: u64) -> AnyResult<String> {
            Ok("hash".into())
        }
    }

    #[async_trait::async_trait]
    impl crate::agent::AgentBackend for FakeBackend {
        async fn send(&self, _from: &AgentOpts, _to: &str, _coins: &[crate::agent::Coin]) -> AnyResult<()> {
            Ok(())
        }
        async fn upload(&self, _from: &AgentOpts, _wasm: &[u8]) -> AnyResult<crate::agent::ChainUploadResult> {
            unimplemented!("not exercised in these tests")
        }
        async fn instantiate(
            &self,
            _from: &AgentOpts,
            _code_id: u64,
            _code_hash: &str,
            _label: &str,
            _init_msg: &[u8],
        ) -> AnyResult<(String, Option<String>)> {
            unimplemented!("not exercised in these tests")
        }
        async fn execute(
            &self,
            _from: &AgentOpts,
            _contract: &crate::identity::ContractLink,
            _msg: &[u8],
            _funds: &[crate::agent::Coin],
        ) -> AnyResult<crate::agent::ExecuteResult> {
            unimplemented!("not exercised in these tests")
        }
    }

    #[test]
    fn dev_mode_true_for_devnet_and_mocknet() {
        let backend = Arc::new(FakeBackend(AtomicU64::new(0)));
        let devnet = Chain::new("dev-1", "http://localhost", Mode::Devnet, backend.clone());
        assert!(devnet.dev_mode());
        let mocknet = Chain::new("mock-1", "mocknet://", Mode::Mocknet, backend.clone());
        assert!(mocknet.dev_mode());
        let mainnet = Chain::new("secret-4", "https://rpc", Mode::Mainnet, backend);
        assert!(!mainnet.dev_mode());
    }

    #[tokio::test]
    async fn next_block_resolves_once_height_increases() {
        let backend = Arc::new(FakeBackend(AtomicU64::new(10)));
        let chain = Chain::new("dev-1", "http://localhost", Mode::Devnet, backend.clone());
        let handle = tokio::spawn({
            let backend = backend.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                backend.0.store(11, Ordering::SeqCst);
            }
        });
        let height = chain.next_block().await.unwrap();
        assert_eq!(height, 11);
        handle.await.unwrap();
    }

    #[test]
    fn registry_resolves_selection_by_id() {
        let backend = Arc::new(FakeBackend(AtomicU64::new(0)));
        let testnet = Arc::new(Chain::new("testnet-1", "http://localhost", Mode::Testnet, backend.clone()));
        let mainnet = Arc::new(Chain::new("secret-4", "https://rpc", Mode::Mainnet, backend));

        let mut registry = ChainRegistry::new();
        registry.register(testnet.clone()).unwrap();
        registry.register(mainnet).unwrap();

        let selected = registry.select(Some("testnet-1")).unwrap();
        assert_eq!(selected.id, "testnet-1");
    }

    #[test]
    fn registry_errors_on_no_selection_and_unknown_id() {
        let registry = ChainRegistry::new();
        let err = registry.select(None).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoChainSelected)));

        let err = registry.select(Some("nope")).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::UnknownChainSelected(id)) if id == "nope"));
    }

    #[test]
    fn registry_rejects_chain_with_empty_id() {
        let backend = Arc::new(FakeBackend(AtomicU64::new(0)));
        let anonymous = Arc::new(Chain::new("", "http://localhost", Mode::Testnet, backend));
        let mut registry = ChainRegistry::new();
        let err = registry.register(anonymous).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoChainId)));
    }
}
