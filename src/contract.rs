//! Contract lifecycle state machine (component D, spec.md §4.1):
//! Declared → Built → Uploaded → Instantiated, each transition a
//! memoized idempotent task so concurrent callers collapse onto one
//! in-flight operation and retries after a failed stage resume from
//! the last terminal state rather than repeating it.

use crate::agent::Agent;
use crate::build::{Builder, ContractTemplate};
use crate::error::{AnyError, AnyResult, Error, Stage};
use crate::identity::{ContractLink, Label};
use crate::source::ContractSource;
use crate::upload::{FSUploader, UploadedTemplate};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Terminal stage: an on-chain instance plus the label it was given
/// (spec.md §3 `ContractInstance`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInstance {
    pub link: ContractLink,
    pub label: String,
    pub init_by: Option<String>,
    pub init_tx: Option<String>,
}

/// One contract's progress through Declared → Built → Uploaded →
/// Instantiated. Fields accumulate monotonically; nothing is ever
/// cleared once set (spec.md §3 lifecycle note).
pub struct Contract {
    pub name: Option<String>,
    pub source: ContractSource,
    pub label_prefix: Option<String>,
    pub label_suffix: Option<String>,
    pub init_msg: Option<Vec<u8>>,

    /// Bypasses build+upload: instantiate existing on-chain code
    /// directly, given its id and hash (spec.md §4.1 "a Contract whose
    /// address is set is considered deployed").
    pub init_code_id: Option<u64>,
    pub init_code_hash: Option<String>,

    pub builder: Option<Arc<dyn Builder>>,
    pub uploader: Option<Arc<FSUploader>>,
    pub agent: Option<Arc<Agent>>,

    built: OnceCell<ContractTemplate>,
    uploaded: OnceCell<UploadedTemplate>,
    instance: OnceCell<ContractInstance>,
}

impl Contract {
    pub fn new(crate_name: impl Into<String>) -> Self {
        Self {
            name: None,
            source: ContractSource::new(crate_name),
            label_prefix: None,
            label_suffix: None,
            init_msg: None,
            init_code_id: None,
            init_code_hash: None,
            builder: None,
            uploader: None,
            agent: None,
            built: OnceCell::new(),
            uploaded: OnceCell::new(),
            instance: OnceCell::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_label(mut self, prefix: Option<String>, suffix: Option<String>) -> Self {
        self.label_prefix = prefix;
        self.label_suffix = suffix;
        self
    }

    pub fn with_init_msg(mut self, init_msg: impl Into<Vec<u8>>) -> Self {
        self.init_msg = Some(init_msg.into());
        self
    }

    pub fn with_builder(mut self, builder: Arc<dyn Builder>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<FSUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_agent(mut self, agent: Arc<Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Skip build+upload: treat `code_id`/`code_hash` as already on chain.
    pub fn with_existing_code(mut self, code_id: u64, code_hash: impl Into<String>) -> Self {
        self.init_code_id = Some(code_id);
        self.init_code_hash = Some(code_hash.into());
        self
    }

    pub fn is_built(&self) -> bool {
        self.built.initialized()
    }

    pub fn is_uploaded(&self) -> bool {
        self.uploaded.initialized()
    }

    /// "A Contract whose address is set is considered deployed and
    /// skips build+upload on subsequent runs" (spec.md §4.1).
    pub fn is_deployed(&self) -> bool {
        self.instance.initialized()
    }

    pub fn template(&self) -> Option<&ContractTemplate> {
        self.built.get()
    }

    pub fn uploaded_template(&self) -> Option<&UploadedTemplate> {
        self.uploaded.get()
    }

    pub fn instance(&self) -> Option<&ContractInstance> {
        self.instance.get()
    }

    /// Declared → Built. Memoized: concurrent callers collapse onto one
    /// build, a failed attempt leaves the cell empty so the next call
    /// retries (spec.md §4.1 "collapse into a single in-flight operation").
    pub async fn build(&self) -> AnyResult<&ContractTemplate> {
        if self.source.crate_name.is_empty() {
            return Err(Error::NoCrate.into());
        }
        let builder = self.builder.as_ref().ok_or(Error::NoBuilder)?;
        self.built.get_or_try_init(|| builder.build(&self.source)).await
    }

    /// Built → Uploaded. Builds first if necessary unless `init_code_id`
    /// bypasses the pipeline entirely.
    pub async fn upload(&self) -> AnyResult<&UploadedTemplate> {
        let uploader = self.uploader.as_ref().ok_or(Error::NoUploader)?;
        let agent = self.agent.as_ref().ok_or(Error::NoAgent(Stage::Upload))?;
        let template = self.build().await?.clone();
        self.uploaded
            .get_or_try_init(|| uploader.upload(template, agent))
            .await
    }

    /// Resolves `(codeId, codeHash)` either from an explicit
    /// `with_existing_code` override or by driving build+upload.
    async fn resolve_code(&self) -> AnyResult<(u64, String)> {
        if let Some(code_id) = self.init_code_id {
            let hash = self.init_code_hash.clone().ok_or(Error::NoInitCodeId)?;
            return Ok((code_id, hash));
        }
        if self.source.crate_name.is_empty() {
            return Err(Error::NoInitCodeId.into());
        }
        let uploaded = self.upload().await?;
        Ok((uploaded.code_id, uploaded.template.code_hash.clone()))
    }

    /// Reconstructs a Contract's terminal state from a persisted
    /// receipt (spec.md §4.1 "a deployment can be loaded from its
    /// receipt directory, reconstituting every instance's terminal
    /// state"). Stages for which the receipt has no data are simply
    /// left un-memoized, so a later `build`/`upload`/`instantiate`
    /// call resumes the pipeline normally.
    pub fn from_receipt(receipt: &crate::receipts::ContractReceipt) -> Self {
        let crate_name = receipt.crate_name.clone().unwrap_or_default();
        let mut contract = Contract::new(crate_name);
        contract.name = receipt.name.clone();
        contract.label_prefix = receipt.prefix.clone();
        contract.label_suffix = receipt.suffix.clone();
        contract.source.revision = receipt.revision.clone();
        contract.source.workspace = receipt.workspace.clone().map(std::path::PathBuf::from);
        contract.source.dirty = receipt.dirty.unwrap_or(false);
        contract.source.features = receipt.features.clone().unwrap_or_default();
        contract.source.repository = receipt.repository.clone();

        if let (Some(artifact), Some(code_hash)) = (receipt.artifact.clone(), receipt.code_hash.clone()) {
            let template = ContractTemplate {
                source: contract.source.clone(),
                artifact: std::path::PathBuf::from(artifact),
                code_hash,
            };
            let _ = contract.built.set(template);
        }

        if let (Some(template), Some(chain_id), Some(code_id)) =
            (contract.built.get().cloned(), receipt.chain_id.clone(), receipt.code_id)
        {
            let uploaded = UploadedTemplate {
                template,
                chain_id,
                code_id,
                upload_by: receipt.upload_by.clone(),
                upload_tx: receipt.upload_tx.clone(),
            };
            let _ = contract.uploaded.set(uploaded);
        }

        if let (Some(address), Some(label), Some(code_hash)) =
            (receipt.address.clone(), receipt.label.clone(), receipt.code_hash.clone())
        {
            contract.init_code_id = receipt.code_id;
            contract.init_code_hash = Some(code_hash.clone());
            let instance = ContractInstance {
                link: ContractLink::new(address, code_hash),
                label,
                init_by: receipt.init_by.clone(),
                init_tx: receipt.init_tx.clone(),
            };
            let _ = contract.instance.set(instance);
        }

        contract
    }

    /// Serializes the Contract's current field state for persistence
    /// (spec.md §6 receipt field set). Call only after a stage
    /// completes; partial stage completion must not write a receipt.
    pub fn to_receipt(&self) -> crate::receipts::ContractReceipt {
        let template = self.template();
        let uploaded = self.uploaded_template();
        let instance = self.instance();
        crate::receipts::ContractReceipt {
            repository: self.source.repository.clone(),
            revision: self.source.revision.clone(),
            dirty: Some(self.source.dirty),
            workspace: self.source.workspace.as_ref().map(|p| p.display().to_string()),
            crate_name: Some(self.source.crate_name.clone()),
            features: Some(self.source.features.clone()),
            builder_id: None,
            artifact: template.map(|t| t.artifact.display().to_string()),
            code_hash: template
                .map(|t| t.code_hash.clone())
                .or_else(|| uploaded.map(|u| u.template.code_hash.clone()))
                .or_else(|| instance.map(|i| i.link.code_hash.clone())),
            chain_id: uploaded.map(|u| u.chain_id.clone()),
            uploader_id: None,
            upload_by: uploaded.and_then(|u| u.upload_by.clone()),
            upload_tx: uploaded.and_then(|u| u.upload_tx.clone()),
            code_id: uploaded.map(|u| u.code_id),
            init_by: instance.and_then(|i| i.init_by.clone()),
            init_msg: self
                .init_msg
                .as_ref()
                .and_then(|msg| serde_json::from_slice(msg).ok()),
            init_tx: instance.and_then(|i| i.init_tx.clone()),
            address: instance.map(|i| i.link.address.clone()),
            label: instance.map(|i| i.label.clone()),
            prefix: self.label_prefix.clone(),
            name: self.name.clone(),
            suffix: self.label_suffix.clone(),
        }
    }

    /// Uploaded → Instantiated. Short-circuits entirely on an already
    /// deployed Contract, without touching build or upload again.
    pub async fn instantiate(&self) -> AnyResult<&ContractInstance> {
        if let Some(existing) = self.instance.get() {
            return Ok(existing);
        }

        let agent = self.agent.as_ref().ok_or(Error::NoAgent(Stage::Instantiate))?;
        let name = self.name.clone().ok_or(Error::NoInitLabel)?;
        let init_msg = self.init_msg.clone().ok_or(Error::NoInitMessage)?;
        let label = Label::new(self.label_prefix.clone(), name, self.label_suffix.clone()).compose()?;
        let (code_id, code_hash) = self.resolve_code().await?;

        self.instance
            .get_or_try_init(|| async {
                let (link, init_tx) = agent.instantiate(code_id, &code_hash, &label, &init_msg).await?;
                Ok::<_, AnyError>(ContractInstance {
                    link,
                    label,
                    init_by: agent.address().map(String::from),
                    init_tx,
                })
            })
            .await
    }
}

/// One entry of a `many()` bulk instantiation (spec.md §4.1).
#[derive(Debug, Clone)]
pub struct ManyEntry {
    pub name: String,
    pub init_msg: Vec<u8>,
}

/// Bulk-instantiate `entries` off a shared `template`: the template is
/// built+uploaded exactly once, then each entry gets its own Contract
/// sharing that code id and running independently — one entry's
/// failure does not cancel its peers, and order is preserved
/// (spec.md §4.1 `many`).
pub async fn many(template: &Contract, entries: Vec<ManyEntry>) -> Vec<(String, AnyResult<ContractInstance>)> {
    let uploaded = match template.upload().await {
        Ok(uploaded) => uploaded.clone(),
        Err(err) => {
            let message = err.to_string();
            return entries
                .into_iter()
                .map(|entry| (entry.name, Err(crate::error::anyhow!("{message}"))))
                .collect();
        }
    };

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry.name.clone();
        let mut instance = Contract::new(template.source.crate_name.clone())
            .with_name(entry.name)
            .with_init_msg(entry.init_msg)
            .with_label(template.label_prefix.clone(), template.label_suffix.clone())
            .with_existing_code(uploaded.code_id, uploaded.template.code_hash.clone());
        instance.agent = template.agent.clone();

        let result = instance.instantiate().await.map(Clone::clone);
        out.push((name, result));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBackend, AgentOpts, ChainUploadResult, Coin, ExecuteResult};
    use crate::chain::{Chain, ChainBackend, Mode};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeChainBackend {
        next_code_id: AtomicU64,
        next_addr: AtomicU64,
        upload_calls: AtomicU64,
        instantiate_calls: AtomicU64,
    }

    impl Default for FakeChainBackend {
        fn default() -> Self {
            Self {
                next_code_id: AtomicU64::new(1),
                next_addr: AtomicU64::new(1),
                upload_calls: AtomicU64::new(0),
                instantiate_calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChainBackend for FakeChainBackend {
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

    #[async_trait::async_trait]
    impl AgentBackend for FakeChainBackend {
        async fn send(&self, _from: &AgentOpts, _to: &str, _coins: &[Coin]) -> AnyResult<()> {
            Ok(())
        }
        async fn upload(&self, _from: &AgentOpts, _wasm: &[u8]) -> AnyResult<ChainUploadResult> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            let code_id = self.next_code_id.fetch_add(1, Ordering::SeqCst);
            Ok(ChainUploadResult { code_id, code_hash: String::new(), upload_by: None, upload_tx: Some("UPLOAD_TX".into()) })
        }
        async fn instantiate(
            &self,
            _from: &AgentOpts,
            _code_id: u64,
            _code_hash: &str,
            _label: &str,
            _init_msg: &[u8],
        ) -> AnyResult<(String, Option<String>)> {
            self.instantiate_calls.fetch_add(1, Ordering::SeqCst);
            let n = self.next_addr.fetch_add(1, Ordering::SeqCst);
            Ok((format!("addr{n}"), Some(format!("INIT_TX{n}"))))
        }
        async fn execute(&self, _from: &AgentOpts, _contract: &ContractLink, _msg: &[u8], _funds: &[Coin]) -> AnyResult<ExecuteResult> {
            unimplemented!()
        }
    }

    struct RawBuildOnce {
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl Builder for RawBuildOnce {
        async fn build(&self, source: &ContractSource) -> AnyResult<ContractTemplate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ContractTemplate {
                source: source.clone(),
                artifact: std::path::PathBuf::from("/tmp/fake.wasm"),
                code_hash: "deadbeef".into(),
            })
        }
    }

    fn setup(dir: &std::path::Path) -> (Arc<Contract>, Arc<FakeChainBackend>, Arc<RawBuildOnce>) {
        let backend = Arc::new(FakeChainBackend::default());
        let chain = Arc::new(Chain::new("testnet-1", "http://localhost", Mode::Testnet, backend.clone()));
        let agent = Arc::new(chain.get_agent(AgentOpts::default()).unwrap());
        let builder = Arc::new(RawBuildOnce { calls: AtomicU64::new(0) });
        let uploader = Arc::new(FSUploader::new(dir.join("uploads")));

        let contract = Contract::new("token")
            .with_name("my-token")
            .with_init_msg(br#"{"decimals":6}"#.to_vec())
            .with_builder(builder.clone() as Arc<dyn Builder>)
            .with_uploader(uploader)
            .with_agent(agent);

        (Arc::new(contract), backend, builder)
    }

    #[tokio::test]
    async fn missing_fields_surface_at_earliest_stage() {
        let contract = Contract::new("");
        let err = contract.build().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoCrate)));

        let contract = Contract::new("token");
        let err = contract.upload().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoUploader)));
    }

    #[tokio::test]
    async fn instantiate_drives_build_and_upload_then_caches() {
        let dir = tempfile::tempdir().unwrap();
        let (contract, backend, builder) = setup(dir.path());

        assert!(!contract.is_deployed());
        let first = contract.instantiate().await.unwrap().clone();
        assert!(contract.is_built());
        assert!(contract.is_uploaded());
        assert!(contract.is_deployed());
        assert_eq!(backend.upload_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.instantiate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);

        // Repeated instantiate short-circuits without touching chain again.
        let second = contract.instantiate().await.unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(backend.upload_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.instantiate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_instantiate_collapses_to_one_call() {
        let dir = tempfile::tempdir().unwrap();
        let (contract, backend, _builder) = setup(dir.path());

        let a = contract.clone();
        let b = contract.clone();
        let (r1, r2) = tokio::join!(a.instantiate(), b.instantiate());
        assert_eq!(r1.unwrap(), r2.unwrap());
        assert_eq!(backend.instantiate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn many_builds_and_uploads_template_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeChainBackend::default());
        let chain = Arc::new(Chain::new("testnet-1", "http://localhost", Mode::Testnet, backend.clone()));
        let agent = Arc::new(chain.get_agent(AgentOpts::default()).unwrap());
        let builder = Arc::new(RawBuildOnce { calls: AtomicU64::new(0) });
        let uploader = Arc::new(FSUploader::new(dir.path().join("uploads")));

        let template = Contract::new("token")
            .with_builder(builder.clone() as Arc<dyn Builder>)
            .with_uploader(uploader)
            .with_agent(agent);

        let entries = vec![
            ManyEntry { name: "alice".into(), init_msg: br#"{"owner":"alice"}"#.to_vec() },
            ManyEntry { name: "bob".into(), init_msg: br#"{"owner":"bob"}"#.to_vec() },
        ];

        let results = many(&template, entries).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "alice");
        assert_eq!(results[1].0, "bob");
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_ok());
        assert_ne!(results[0].1.as_ref().unwrap().link.address, results[1].1.as_ref().unwrap().link.address);

        assert_eq!(builder.calls.load(Ordering::SeqCst), 1, "template built only once");
        assert_eq!(backend.upload_calls.load(Ordering::SeqCst), 1, "template uploaded only once");
        assert_eq!(backend.instantiate_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn existing_code_bypasses_build_and_upload() {
        let backend = Arc::new(FakeChainBackend::default());
        let chain = Arc::new(Chain::new("testnet-1", "http://localhost", Mode::Testnet, backend.clone()));
        let agent = Arc::new(chain.get_agent(AgentOpts::default()).unwrap());

        let contract = Contract::new("")
            .with_name("imported")
            .with_init_msg(b"{}".to_vec())
            .with_existing_code(7, "precomputedhash");
        let mut contract = contract;
        contract.agent = Some(agent);

        let instance = contract.instantiate().await.unwrap();
        assert_eq!(instance.link.code_hash, "precomputedhash");
        assert_eq!(backend.upload_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.instantiate_calls.load(Ordering::SeqCst), 1);
    }
}
