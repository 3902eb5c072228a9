//! Build/upload/instantiate idempotence at the public crate API
//! (spec.md §8 Testable Properties #1, #2): a second `instantiate()`
//! call must not touch the builder or backend again, and concurrent
//! callers must collapse onto a single in-flight instantiate.

use async_trait::async_trait;
use fadroma_core::build::{Builder, ContractTemplate};
use fadroma_core::source::ContractSource;
use fadroma_core::{
    agent::{AgentBackend, AgentOpts, ChainUploadResult, Coin, ExecuteResult},
    chain::{Chain, ChainBackend, Mode},
    identity::ContractLink,
    upload::FSUploader,
    AnyResult, Contract,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct CountingBackend {
    uploads: AtomicU64,
    instantiations: AtomicU64,
    next_code_id: AtomicU64,
    next_addr: AtomicU64,
}

impl Default for CountingBackend {
    fn default() -> Self {
        Self {
            uploads: AtomicU64::new(0),
            instantiations: AtomicU64::new(0),
            next_code_id: AtomicU64::new(1),
            next_addr: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ChainBackend for CountingBackend {
    async fn height(&self) -> AnyResult<u64> {
        Ok(0)
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

#[async_trait]
impl AgentBackend for CountingBackend {
    async fn send(&self, _from: &AgentOpts, _to: &str, _coins: &[Coin]) -> AnyResult<()> {
        Ok(())
    }
    async fn upload(&self, _from: &AgentOpts, _wasm: &[u8]) -> AnyResult<ChainUploadResult> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let code_id = self.next_code_id.fetch_add(1, Ordering::SeqCst);
        Ok(ChainUploadResult { code_id, code_hash: "hash".into(), upload_by: None, upload_tx: None })
    }
    async fn instantiate(
        &self,
        _from: &AgentOpts,
        _code_id: u64,
        _code_hash: &str,
        _label: &str,
        _init_msg: &[u8],
    ) -> AnyResult<(String, Option<String>)> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        let n = self.next_addr.fetch_add(1, Ordering::SeqCst);
        Ok((format!("addr{n}"), None))
    }
    async fn execute(&self, _from: &AgentOpts, _contract: &ContractLink, _msg: &[u8], _funds: &[Coin]) -> AnyResult<ExecuteResult> {
        unimplemented!("not exercised in this test")
    }
}

struct CountingBuilder {
    calls: AtomicU64,
}

#[async_trait]
impl Builder for CountingBuilder {
    async fn build(&self, source: &ContractSource) -> AnyResult<ContractTemplate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ContractTemplate { source: source.clone(), artifact: "/tmp/lifecycle.wasm".into(), code_hash: "hash".into() })
    }
}

#[tokio::test]
async fn second_instantiate_is_a_pure_cache_hit() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(CountingBackend::default());
    let chain = Arc::new(Chain::new("testnet-1", "http://localhost", Mode::Testnet, backend.clone()));
    let agent = Arc::new(chain.get_agent(AgentOpts::default()).unwrap());
    let builder = Arc::new(CountingBuilder { calls: AtomicU64::new(0) });
    let uploader = Arc::new(FSUploader::new(dir.path().join("uploads")));

    let contract = Arc::new(
        Contract::new("token")
            .with_name("my-token")
            .with_init_msg(br#"{}"#.to_vec())
            .with_builder(builder.clone() as Arc<dyn Builder>)
            .with_uploader(uploader)
            .with_agent(agent),
    );

    contract.instantiate().await.unwrap();
    contract.instantiate().await.unwrap();

    assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(backend.instantiations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_instantiate_calls_collapse() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(CountingBackend::default());
    let chain = Arc::new(Chain::new("testnet-1", "http://localhost", Mode::Testnet, backend.clone()));
    let agent = Arc::new(chain.get_agent(AgentOpts::default()).unwrap());
    let builder = Arc::new(CountingBuilder { calls: AtomicU64::new(0) });
    let uploader = Arc::new(FSUploader::new(dir.path().join("uploads")));

    let contract = Arc::new(
        Contract::new("token")
            .with_name("my-token")
            .with_init_msg(br#"{}"#.to_vec())
            .with_builder(builder.clone() as Arc<dyn Builder>)
            .with_uploader(uploader)
            .with_agent(agent),
    );

    let a = contract.clone();
    let b = contract.clone();
    let c = contract.clone();
    let (r1, r2, r3) = tokio::join!(a.instantiate(), b.instantiate(), c.instantiate());
    assert_eq!(r1.unwrap(), r2.unwrap());
    assert_eq!(r2.unwrap(), r3.unwrap());
    assert_eq!(backend.instantiations.load(Ordering::SeqCst), 1);
}
