//! Deterministic CosmWasm deployment pipeline: build, upload, and
//! instantiate contracts idempotently against Mainnet, Testnet,
//! Devnet, or an in-process Mocknet, with every completed stage
//! gating re-runs through an on-disk receipt.
//!
//! See `DESIGN.md` in the repository root for the module-by-module
//! grounding ledger and the Open Question decisions recorded here.

pub mod agent;
pub mod build;
pub mod bundle;
pub mod chain;
pub mod config;
pub mod contract;
pub mod deployment;
pub mod devnet;
pub mod error;
pub mod identity;
pub mod mocknet;
pub mod receipts;
pub mod source;
pub mod upload;

pub use agent::{Agent, AgentOpts, Coin};
pub use build::{BuildEnv, Builder, ContainerBuilder, ContractTemplate, RawBuilder};
pub use bundle::{Bundle, BundleBroadcaster, BundledMessage};
pub use chain::{Chain, ChainBackend, ChainRegistry, DevnetNode, Mode};
pub use config::FadromaConfig;
pub use contract::{many, Contract, ContractInstance, ManyEntry};
pub use deployment::{ActiveDeploymentPointer, Deployment, DeploymentDefaults};
pub use devnet::{Devnet, DevnetState, PortMode};
pub use error::{AnyContext, AnyError, AnyResult, Error, Stage, Warning};
pub use identity::{code_hash, ContractLink, Label};
pub use mocknet::MocknetChain;
pub use receipts::ContractReceipt;
pub use source::ContractSource;
pub use upload::{FSUploader, UploadedTemplate};
