//! Deployment registry (component D, spec.md §4.1): a named group of
//! Contracts sharing defaults, backed by a receipt directory, plus the
//! durable "active deployment" pointer (spec.md §9 Open Question).

use crate::agent::Agent;
use crate::build::Builder;
use crate::contract::Contract;
use crate::error::{AnyResult, Error};
use crate::receipts::{contract_receipt_path, write_atomic};
use crate::upload::FSUploader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Defaults a freshly-registered Contract inherits from its Deployment
/// (spec.md §4.1 `Deployment.contract`).
#[derive(Clone, Default)]
pub struct DeploymentDefaults {
    pub builder: Option<Arc<dyn Builder>>,
    pub uploader: Option<Arc<FSUploader>>,
    pub agent: Option<Arc<Agent>>,
    pub workspace: Option<PathBuf>,
    pub revision: Option<String>,
}

/// Options for registering a new Contract under a Deployment.
#[derive(Debug, Clone, Default)]
pub struct ContractOpts {
    pub crate_name: String,
    pub revision: Option<String>,
    pub workspace: Option<PathBuf>,
    pub label_prefix: Option<String>,
    pub label_suffix: Option<String>,
    pub init_msg: Option<Vec<u8>>,
}

/// A named group of Contracts sharing an agent/builder/uploader and a
/// receipt directory (spec.md §4.1, §6).
pub struct Deployment {
    pub name: String,
    pub receipts_dir: PathBuf,
    pub defaults: DeploymentDefaults,
    contracts: Mutex<HashMap<String, Arc<Contract>>>,
}

impl Deployment {
    pub fn new(name: impl Into<String>, receipts_dir: impl Into<PathBuf>, defaults: DeploymentDefaults) -> Self {
        Self { name: name.into(), receipts_dir: receipts_dir.into(), defaults, contracts: Mutex::new(HashMap::new()) }
    }

    /// Returns the existing Contract registered as `name`, or creates
    /// and registers one inheriting the deployment's defaults
    /// (spec.md §4.1 `Deployment.contract(name|opts)`).
    pub fn contract(&self, name: &str, opts: ContractOpts) -> AnyResult<Arc<Contract>> {
        if name.is_empty() {
            return Err(Error::NoName.into());
        }
        let mut contracts = self.contracts.lock().unwrap();
        if let Some(existing) = contracts.get(name) {
            return Ok(existing.clone());
        }

        let mut contract = Contract::new(opts.crate_name).with_name(name);
        contract.source.revision = opts.revision.or_else(|| self.defaults.revision.clone());
        contract.source.workspace = opts.workspace.or_else(|| self.defaults.workspace.clone());
        contract.label_prefix = opts.label_prefix.or_else(|| Some(self.name.clone()));
        contract.label_suffix = opts.label_suffix;
        contract.init_msg = opts.init_msg;
        contract.builder = self.defaults.builder.clone();
        contract.uploader = self.defaults.uploader.clone();
        contract.agent = self.defaults.agent.clone();

        let contract = Arc::new(contract);
        contracts.insert(name.to_string(), contract.clone());
        Ok(contract)
    }

    /// Drives `name`'s Contract through `instantiate()` and, only on
    /// success, persists its receipt — partial stage completion must
    /// never write a receipt (spec.md §4.1 Failure model).
    pub async fn instantiate(&self, name: &str) -> AnyResult<Arc<Contract>> {
        let contract = {
            let contracts = self.contracts.lock().unwrap();
            contracts.get(name).cloned().ok_or_else(|| Error::NoName)?
        };
        contract.instantiate().await?;
        self.persist(name, &contract)?;
        Ok(contract)
    }

    fn persist(&self, name: &str, contract: &Contract) -> AnyResult<()> {
        let path = contract_receipt_path(&self.receipts_dir, &self.name, name);
        write_atomic(&path, &contract.to_receipt())
    }

    /// Reconstitutes every instance's terminal state from this
    /// deployment's receipt directory (spec.md §4.1). Where redeploy
    /// left multiple receipts under the same `name` with different
    /// `suffix`es, the alphanumerically-last suffix is taken as the
    /// live one (spec.md §9 Open Question: "alphanumeric sort, last is
    /// real").
    pub fn load(&self) -> AnyResult<usize> {
        let dir = self.receipts_dir.join(&self.name);
        if !dir.exists() {
            return Ok(0);
        }

        let mut by_name: HashMap<String, Vec<crate::receipts::ContractReceipt>> = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = std::fs::read_to_string(&path)?;
            let receipt: crate::receipts::ContractReceipt = serde_json::from_str(&contents)?;
            if let Some(name) = receipt.name.clone() {
                by_name.entry(name).or_default().push(receipt);
            }
        }

        let mut contracts = self.contracts.lock().unwrap();
        let loaded = by_name.len();
        for (name, mut receipts) in by_name {
            receipts.sort_by(|a, b| {
                let a = a.suffix.clone().unwrap_or_default();
                let b = b.suffix.clone().unwrap_or_default();
                a.cmp(&b)
            });
            let receipt = receipts.into_iter().last().expect("group is non-empty");
            let mut contract = Contract::from_receipt(&receipt);
            contract.builder = self.defaults.builder.clone();
            contract.uploader = self.defaults.uploader.clone();
            contract.agent = self.defaults.agent.clone();
            contracts.insert(name, Arc::new(contract));
        }
        Ok(loaded)
    }

    /// `true` iff `predicate` holds for every key it names against
    /// `contract`'s known string-valued fields — vacuously true for an
    /// empty predicate (spec.md §9 Open Question: `matches()` defined
    /// as "all provided keys equal").
    pub fn matches(contract: &Contract, predicate: &HashMap<String, String>) -> bool {
        predicate.iter().all(|(key, value)| match key.as_str() {
            "name" => contract.name.as_deref() == Some(value.as_str()),
            "crate" => contract.source.crate_name == *value,
            "codeHash" => contract.uploaded_template().map(|u| &u.template.code_hash) == Some(value),
            "address" => contract.instance().map(|i| &i.link.address) == Some(value),
            "label" => contract.instance().map(|i| &i.label) == Some(value),
            _ => false,
        })
    }

    /// All registered contracts whose fields satisfy `predicate`.
    pub fn find(&self, predicate: &HashMap<String, String>) -> Vec<Arc<Contract>> {
        self.contracts
            .lock()
            .unwrap()
            .values()
            .filter(|c| Self::matches(c, predicate))
            .cloned()
            .collect()
    }
}

/// Durable "active deployment" pointer (spec.md §9 Open Question):
/// last-writer-wins, backed by a single file under `state_dir`.
pub struct ActiveDeploymentPointer {
    pub path: PathBuf,
}

impl ActiveDeploymentPointer {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self { path: state_dir.as_ref().join("active-deployment") }
    }

    pub fn select(&self, name: &str) -> AnyResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, name)?;
        Ok(())
    }

    pub fn active(&self) -> AnyResult<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&self.path)?.trim().to_string()))
    }

    pub fn list(deployments_dir: impl AsRef<Path>) -> AnyResult<Vec<String>> {
        let dir = deployments_dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract_with(name: &str, crate_name: &str) -> Contract {
        Contract::new(crate_name).with_name(name)
    }

    #[test]
    fn contract_registers_once_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let deployment = Deployment::new("testnet", dir.path(), DeploymentDefaults::default());
        let opts = ContractOpts { crate_name: "token".into(), ..Default::default() };
        let first = deployment.contract("my-token", opts.clone()).unwrap();
        let second = deployment.contract("my-token", opts).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn contract_with_empty_name_errors() {
        let dir = tempfile::tempdir().unwrap();
        let deployment = Deployment::new("testnet", dir.path(), DeploymentDefaults::default());
        let err = deployment.contract("", ContractOpts::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoName)));
    }

    #[test]
    fn matches_is_vacuously_true_for_empty_predicate() {
        let contract = contract_with("my-token", "token");
        assert!(Deployment::matches(&contract, &HashMap::new()));
    }

    #[test]
    fn matches_requires_all_provided_keys_to_agree() {
        let contract = contract_with("my-token", "token");
        let mut predicate = HashMap::new();
        predicate.insert("name".to_string(), "my-token".to_string());
        predicate.insert("crate".to_string(), "token".to_string());
        assert!(Deployment::matches(&contract, &predicate));

        predicate.insert("crate".to_string(), "other".to_string());
        assert!(!Deployment::matches(&contract, &predicate));
    }

    #[test]
    fn active_pointer_is_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let pointer = ActiveDeploymentPointer::new(dir.path());
        assert_eq!(pointer.active().unwrap(), None);
        pointer.select("testnet-1").unwrap();
        assert_eq!(pointer.active().unwrap(), Some("testnet-1".to_string()));
        pointer.select("testnet-2").unwrap();
        assert_eq!(pointer.active().unwrap(), Some("testnet-2".to_string()));
    }

    #[test]
    fn load_picks_alphanumerically_last_suffix_as_live() {
        let dir = tempfile::tempdir().unwrap();
        let deployment_dir = dir.path().join("testnet");
        std::fs::create_dir_all(&deployment_dir).unwrap();

        let base = crate::receipts::ContractReceipt {
            crate_name: Some("token".into()),
            name: Some("my-token".into()),
            address: Some("addr-old".into()),
            label: Some("my-token+1".into()),
            code_hash: Some("hash1".into()),
            suffix: Some("1".into()),
            ..Default::default()
        };
        let redeployed = crate::receipts::ContractReceipt {
            address: Some("addr-new".into()),
            label: Some("my-token+2".into()),
            suffix: Some("2".into()),
            ..base.clone()
        };
        write_atomic(&deployment_dir.join("my-token+1.json"), &base).unwrap();
        write_atomic(&deployment_dir.join("my-token+2.json"), &redeployed).unwrap();

        let deployment = Deployment::new("testnet", dir.path(), DeploymentDefaults::default());
        let loaded = deployment.load().unwrap();
        assert_eq!(loaded, 1);

        let contract = deployment.contract("my-token", ContractOpts { crate_name: "token".into(), ..Default::default() }).unwrap();
        assert_eq!(contract.instance().unwrap().link.address, "addr-new");
    }
}
