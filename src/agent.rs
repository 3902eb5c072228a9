//! Agent (component E, spec.md §4.3): an authenticated identity on a
//! `Chain`. Read operations delegate straight to the chain; write
//! operations are backend-specific and abstract over `AgentBackend`.

use crate::chain::{Chain, ChainBackend};
use crate::error::AnyResult;
use crate::identity::ContractLink;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOpts {
    pub address: Option<String>,
    pub name: Option<String>,
    pub mnemonic: Option<String>,
    pub fees: Option<Coin>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub amount: u128,
    pub denom: String,
}

/// Result of a contract call (`execute`) against the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteResult {
    pub tx_hash: Option<String>,
    pub data: Option<Vec<u8>>,
}

/// The raw result of pushing bytes to the chain, before
/// `crate::contract::Contract::upload` folds it into a full
/// `crate::upload::UploadedTemplate` alongside the build's
/// `ContractTemplate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainUploadResult {
    pub code_id: u64,
    pub code_hash: String,
    pub upload_by: Option<String>,
    pub upload_tx: Option<String>,
}

/// Write operations a concrete chain backend must implement to back an
/// `Agent` (spec.md §4.3). Combined with `ChainBackend` into the single
/// `Backend` trait object `Chain` holds, since in practice one backend
/// (e.g. `crate::mocknet`) satisfies both halves.
#[async_trait::async_trait]
pub trait AgentBackend: Send + Sync {
    async fn send(&self, from: &AgentOpts, to: &str, coins: &[Coin]) -> AnyResult<()>;
    async fn upload(&self, from: &AgentOpts, wasm: &[u8]) -> AnyResult<ChainUploadResult>;
    async fn instantiate(
        &self,
        from: &AgentOpts,
        code_id: u64,
        code_hash: &str,
        label: &str,
        init_msg: &[u8],
    ) -> AnyResult<(String, Option<String>)>;
    async fn execute(&self, from: &AgentOpts, contract: &ContractLink, msg: &[u8], funds: &[Coin]) -> AnyResult<ExecuteResult>;
}

/// The full capability set a concrete backend must provide — read ops
/// (`ChainBackend`) plus write ops (`AgentBackend`).
pub trait Backend: ChainBackend + AgentBackend {}
impl<T: ChainBackend + AgentBackend> Backend for T {}

/// An authenticated identity on a `Chain` (spec.md §4.3).
pub struct Agent {
    pub chain: Arc<Chain>,
    pub opts: AgentOpts,
}

impl Agent {
    pub fn new(chain: Arc<Chain>, opts: AgentOpts) -> Self {
        Self { chain, opts }
    }

    pub fn address(&self) -> Option<&str> {
        self.opts.address.as_deref()
    }

    // --- read operations: delegate straight to the chain ---

    pub async fn height(&self) -> AnyResult<u64> {
        self.chain.height().await
    }

    pub async fn next_block(&self) -> AnyResult<u64> {
        self.chain.next_block().await
    }

    pub async fn get_balance(&self, denom: &str, address: &str) -> AnyResult<u128> {
        self.chain.get_balance(denom, address).await
    }

    pub async fn query(&self, contract: &str, msg: &[u8]) -> AnyResult<Vec<u8>> {
        self.chain.query(contract, msg).await
    }

    pub async fn get_code_id(&self, address: &str) -> AnyResult<u64> {
        self.chain.get_code_id(address).await
    }

    pub async fn get_label(&self, address: &str) -> AnyResult<String> {
        self.chain.get_label(address).await
    }

    pub async fn get_hash_by_address(&self, address: &str) -> AnyResult<String> {
        self.chain.get_hash(Some(address), None).await
    }

    pub async fn get_hash_by_code_id(&self, code_id: u64) -> AnyResult<String> {
        self.chain.get_hash(None, Some(code_id)).await
    }

    pub async fn check_hash(&self, address: &str, expected: Option<&str>) -> AnyResult<String> {
        self.chain.check_hash(address, expected).await
    }

    // --- write operations: abstract per backend ---

    pub async fn send(&self, to: &str, coins: &[Coin]) -> AnyResult<()> {
        self.chain.backend.send(&self.opts, to, coins).await
    }

    pub async fn send_many(&self, transfers: &[(String, Vec<Coin>)]) -> AnyResult<()> {
        for (to, coins) in transfers {
            self.send(to, coins).await?;
        }
        Ok(())
    }

    pub async fn upload(&self, wasm: &[u8]) -> AnyResult<ChainUploadResult> {
        self.chain.backend.upload(&self.opts, wasm).await
    }

    /// Fan-out over `upload`, preserving order (spec.md §4.3
    /// `uploadMany` default implementation).
    pub async fn upload_many(&self, blobs: &[Vec<u8>]) -> Vec<AnyResult<ChainUploadResult>> {
        let mut out = Vec::with_capacity(blobs.len());
        for blob in blobs {
            out.push(self.upload(blob).await);
        }
        out
    }

    /// Returns the new contract's link alongside the backend's
    /// transaction hash, if it reported one.
    pub async fn instantiate(&self, code_id: u64, code_hash: &str, label: &str, init_msg: &[u8]) -> AnyResult<(ContractLink, Option<String>)> {
        let (address, init_tx) = self.chain.backend.instantiate(&self.opts, code_id, code_hash, label, init_msg).await?;
        Ok((ContractLink::new(address, code_hash), init_tx))
    }

    /// Fan-out over `instantiate`, preserving order, propagating
    /// `codeHash` from the template onto each result (spec.md §4.3
    /// `instantiateMany` default implementation).
    pub async fn instantiate_many(
        &self,
        code_id: u64,
        code_hash: &str,
        labels_and_msgs: &[(String, Vec<u8>)],
    ) -> Vec<AnyResult<(ContractLink, Option<String>)>> {
        let mut out = Vec::with_capacity(labels_and_msgs.len());
        for (label, msg) in labels_and_msgs {
            out.push(self.instantiate(code_id, code_hash, label, msg).await);
        }
        out
    }

    pub async fn execute(&self, contract: &ContractLink, msg: &[u8], funds: &[Coin]) -> AnyResult<ExecuteResult> {
        self.chain.backend.execute(&self.opts, contract, msg, funds).await
    }
}
