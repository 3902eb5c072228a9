//! Bundle (spec.md §4.3): an Agent-shaped collector that defers
//! broadcast, grouping messages into one atomic transaction.

use crate::agent::{Agent, ChainUploadResult, Coin, ExecuteResult};
use crate::error::{AnyResult, Error};
use crate::identity::ContractLink;
use std::sync::Mutex;

/// One entry in the bundle's ordered message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundledMessage {
    Instantiate { code_id: u64, code_hash: String, label: String, init_msg: Vec<u8> },
    Execute { contract: ContractLink, msg: Vec<u8>, funds: Vec<Coin> },
}

/// What `submit`/`save` need from the wrapped agent: the ability to
/// broadcast an ordered batch of messages as one atomic transaction, or
/// persist it unsigned for multisig review.
#[async_trait::async_trait]
pub trait BundleBroadcaster: Send + Sync {
    async fn submit(&self, messages: &[BundledMessage], memo: Option<&str>) -> AnyResult<String>;
    async fn save(&self, messages: &[BundledMessage], name: &str) -> AnyResult<()>;
}

/// A deferred batch of messages submitted as one atomic transaction
/// (spec.md §4.3). Wraps an `Agent`; name is `"<agent>@BUNDLE"`.
pub struct Bundle<'a> {
    pub agent: &'a Agent,
    broadcaster: &'a dyn BundleBroadcaster,
    messages: Mutex<Vec<BundledMessage>>,
    depth: Mutex<u32>,
}

impl<'a> Bundle<'a> {
    pub fn new(agent: &'a Agent, broadcaster: &'a dyn BundleBroadcaster) -> Self {
        // Starts at 1, not 0: the bundle itself is the outermost scope, so
        // the first `run()` — with no preceding `bundle()` call — must be
        // the one that submits.
        Self { agent, broadcaster, messages: Mutex::new(Vec::new()), depth: Mutex::new(1) }
    }

    pub fn name(&self) -> String {
        format!("{}@BUNDLE", self.agent.address().unwrap_or("agent"))
    }

    pub fn address(&self) -> Option<&str> {
        self.agent.address()
    }

    /// `instantiate` appends a typed message record and synthesizes a
    /// provisional `ContractInstance` with `address=None` (spec.md §4.3).
    pub fn instantiate(&self, code_id: u64, code_hash: &str, label: &str, init_msg: &[u8]) -> ContractLink {
        self.messages.lock().unwrap().push(BundledMessage::Instantiate {
            code_id,
            code_hash: code_hash.to_string(),
            label: label.to_string(),
            init_msg: init_msg.to_vec(),
        });
        ContractLink::new("", code_hash)
    }

    /// `execute` appends a typed message record.
    pub fn execute(&self, contract: &ContractLink, msg: &[u8], funds: &[Coin]) {
        self.messages.lock().unwrap().push(BundledMessage::Execute {
            contract: contract.clone(),
            msg: msg.to_vec(),
            funds: funds.to_vec(),
        });
    }

    /// Reads of chain state are forbidden mid-bundle because the batch
    /// is atomic (spec.md §4.3).
    pub async fn query(&self, _contract: &str, _msg: &[u8]) -> AnyResult<Vec<u8>> {
        Err(Error::NotInBundle("query").into())
    }

    pub async fn upload(&self, _wasm: &[u8]) -> AnyResult<ChainUploadResult> {
        Err(Error::NotInBundle("upload").into())
    }

    pub async fn upload_many(&self, _blobs: &[Vec<u8>]) -> AnyResult<Vec<ChainUploadResult>> {
        Err(Error::NotInBundle("uploadMany").into())
    }

    pub async fn get_balance(&self, _denom: &str, _address: &str) -> AnyResult<u128> {
        Err(Error::NotInBundle("getBalance").into())
    }

    pub async fn height(&self) -> AnyResult<u64> {
        Err(Error::NotInBundle("height").into())
    }

    pub async fn next_block(&self) -> AnyResult<u64> {
        Err(Error::NotInBundle("nextBlock").into())
    }

    pub async fn send(&self, _to: &str, _coins: &[Coin]) -> AnyResult<()> {
        Err(Error::NotInBundle("send").into())
    }

    pub async fn send_many(&self, _transfers: &[(String, Vec<Coin>)]) -> AnyResult<()> {
        Err(Error::NotInBundle("sendMany").into())
    }

    /// Time-invariant read ops are permitted even mid-bundle (spec.md §4.3).
    pub async fn get_code_id(&self, address: &str) -> AnyResult<u64> {
        self.agent.get_code_id(address).await
    }

    pub async fn get_label(&self, address: &str) -> AnyResult<String> {
        self.agent.get_label(address).await
    }

    pub async fn get_hash(&self, address: &str) -> AnyResult<String> {
        self.agent.get_hash_by_address(address).await
    }

    pub async fn check_hash(&self, address: &str, expected: Option<&str>) -> AnyResult<String> {
        self.agent.check_hash(address, expected).await
    }

    /// Nesting flattens: `bundle()` inside a bundle increments a depth
    /// counter and returns `self`; only the outermost `run()` actually
    /// submits (spec.md §4.3).
    pub fn bundle(&self) -> &Self {
        *self.depth.lock().unwrap() += 1;
        self
    }

    /// Decrements depth; returns `Ok(None)` until depth reaches 0, at
    /// which point it submits (or saves, if `save_as` is given) and
    /// returns the result.
    pub async fn run(&self, memo: Option<&str>, save_as: Option<&str>) -> AnyResult<Option<String>> {
        let remaining = {
            let mut depth = self.depth.lock().unwrap();
            if *depth > 0 {
                *depth -= 1;
            }
            *depth
        };
        if remaining > 0 {
            return Ok(None);
        }
        if let Some(name) = save_as {
            self.save(name).await?;
            return Ok(None);
        }
        self.submit(memo).await.map(Some)
    }

    /// Invokes `cb` with `self`, then runs it (spec.md §4.3 `wrap`).
    pub async fn wrap<F: FnOnce(&Self)>(&self, cb: F, memo: Option<&str>, save_as: Option<&str>) -> AnyResult<Option<String>> {
        cb(self);
        self.run(memo, save_as).await
    }

    async fn submit(&self, memo: Option<&str>) -> AnyResult<String> {
        let messages = self.messages.lock().unwrap().clone();
        if messages.is_empty() {
            return Err(Error::EmptyBundle.into());
        }
        self.broadcaster.submit(&messages, memo).await
    }

    async fn save(&self, name: &str) -> AnyResult<()> {
        let messages = self.messages.lock().unwrap().clone();
        if messages.is_empty() {
            return Err(Error::EmptyBundle.into());
        }
        self.broadcaster.save(&messages, name).await
    }

    #[cfg(test)]
    fn messages_snapshot(&self) -> Vec<BundledMessage> {
        self.messages.lock().unwrap().clone()
    }
}
