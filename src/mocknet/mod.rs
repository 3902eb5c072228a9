//! Mocknet: an in-process CosmWasm execution host simulating chain
//! semantics (component F, spec.md §4.4). `MocknetChain` implements
//! `crate::chain::ChainBackend` + `crate::agent::AgentBackend` so it
//! slots into `Chain`/`Agent` exactly like a real RPC-backed chain.

pub mod codec;
pub mod host;

use crate::agent::{AgentBackend, AgentOpts, ChainUploadResult, Coin, ExecuteResult};
use crate::chain::ChainBackend;
use crate::error::{anyhow, bail, AnyResult};
use crate::identity::{code_hash, ContractLink};
use cosmwasm_std::{Addr, BlockInfo, ContractInfo, Env, MessageInfo, Timestamp};
use cosmwasm_vm::{call_execute_raw, call_instantiate_raw, call_query_raw, Backend, Instance, InstanceOptions, Size};
use host::{MocknetApi, MocknetQuerier, MocknetStorage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Generous enough for any realistic contract call, since mocknet's gas
/// metering is a no-op (spec.md §4.4).
const DEFAULT_GAS_LIMIT: u64 = 500_000_000_000_000;

fn default_memory_limit() -> Option<Size> {
    Some(Size::mebi(16))
}

struct CodeEntry {
    wasm: Vec<u8>,
    code_hash: String,
}

struct InstanceEntry {
    code_id: u64,
    label: String,
    storage: HashMap<Vec<u8>, Vec<u8>>,
}

/// All mutable mocknet state: uploaded code keyed by monotonic
/// `codeId` starting at 1, and live instances keyed by address
/// (spec.md §4.4 "Module loading").
struct MocknetState {
    chain_id: String,
    bech32_prefix: String,
    codes: Vec<CodeEntry>,
    instances: HashMap<String, InstanceEntry>,
    next_instance: u64,
}

/// Shared handle a `MocknetQuerier` holds to route `query_chain` back
/// into the owning Mocknet (spec.md §4.4 "routes back through
/// Mocknet's query path").
#[derive(Clone)]
pub struct SharedState(Arc<Mutex<MocknetState>>);

impl SharedState {
    /// Runs `WasmQuery::Smart` against the named instance, spinning up
    /// a fresh read-only call (storage changes are discarded).
    pub fn query_instance(&self, address: &str, msg: &[u8]) -> AnyResult<Vec<u8>> {
        let (wasm, prefix, chain_id, storage) = {
            let state = self.0.lock().unwrap();
            let instance = state
                .instances
                .get(address)
                .ok_or_else(|| anyhow!("no such mocknet contract {address}"))?;
            let code = &state.codes[(instance.code_id - 1) as usize];
            (code.wasm.clone(), state.bech32_prefix.clone(), state.chain_id.clone(), instance.storage.clone())
        };
        let backend = Backend {
            api: MocknetApi::new(&prefix),
            storage: MocknetStorage { data: storage },
            querier: MocknetQuerier::new(self.clone()),
        };
        let mut instance = Instance::from_code(&wasm, backend, InstanceOptions { gas_limit: DEFAULT_GAS_LIMIT, print_debug: false }, default_memory_limit())?;
        let env = build_env(&chain_id, address);
        let env_bytes = serde_json::to_vec(&env)?;
        let raw = call_query_raw(&mut instance, &env_bytes, msg)?;
        extract_query_payload(&raw)
    }

    /// `WasmQuery::Raw`: a direct, un-interpreted KV read on the named
    /// instance's storage.
    pub fn read_raw(&self, address: &str, key: &[u8]) -> AnyResult<Vec<u8>> {
        let state = self.0.lock().unwrap();
        let instance = state
            .instances
            .get(address)
            .ok_or_else(|| anyhow!("no such mocknet contract {address}"))?;
        Ok(instance.storage.get(key).cloned().unwrap_or_default())
    }
}

/// A `Chain`+`Agent` backend pair whose `mode=Mocknet` (spec.md §4.4).
pub struct MocknetChain {
    state: SharedState,
}

impl MocknetChain {
    pub fn new(chain_id: impl Into<String>, bech32_prefix: impl Into<String>) -> Self {
        let state = MocknetState {
            chain_id: chain_id.into(),
            bech32_prefix: bech32_prefix.into(),
            codes: Vec::new(),
            instances: HashMap::new(),
            next_instance: 0,
        };
        Self { state: SharedState(Arc::new(Mutex::new(state))) }
    }

    /// `upload(bytes)`: stores the blob, assigns a monotonic `codeId`
    /// starting at 1, computes `codeHash=sha256(bytes)` (spec.md §4.4).
    pub fn upload_wasm(&self, wasm: &[u8], upload_by: Option<String>) -> ChainUploadResult {
        let hash = code_hash(wasm);
        let mut state = self.state.0.lock().unwrap();
        state.codes.push(CodeEntry { wasm: wasm.to_vec(), code_hash: hash.clone() });
        ChainUploadResult { code_id: state.codes.len() as u64, code_hash: hash, upload_by, upload_tx: None }
    }

    /// `init(env, msg)`: allocates a deterministic address from
    /// `codeId` + instance counter, spins up a fresh module instance,
    /// invokes the guest's `init`/`instantiate` export, and records the
    /// instance (spec.md §4.4 "Module loading", "Calling convention").
    /// Returns the new address alongside the guest's reported `log` and
    /// `messages` (spec.md §4.4 E2E scenario #1).
    pub fn init(&self, code_id: u64, code_hash: &str, label: &str, sender: &str, init_msg: &[u8]) -> AnyResult<(String, CallOutcome)> {
        let (wasm, prefix, chain_id, count) = {
            let mut state = self.state.0.lock().unwrap();
            let code = state
                .codes
                .get((code_id - 1) as usize)
                .ok_or_else(|| anyhow!("no such code id {code_id}"))?;
            if code.code_hash != code_hash {
                bail!("codeHash mismatch for code id {code_id}: expected {}, got {code_hash}", code.code_hash);
            }
            let wasm = code.wasm.clone();
            let count = state.next_instance;
            state.next_instance += 1;
            (wasm, state.bech32_prefix.clone(), state.chain_id.clone(), count)
        };

        let api = MocknetApi::new(&prefix);
        let address = api.next_contract_address(count)?;

        let backend = Backend {
            api,
            storage: MocknetStorage { data: HashMap::new() },
            querier: MocknetQuerier::new(self.state.clone()),
        };
        let mut instance = Instance::from_code(&wasm, backend, InstanceOptions { gas_limit: DEFAULT_GAS_LIMIT, print_debug: false }, default_memory_limit())?;

        let env = build_env(&chain_id, &address);
        let info = build_info(sender);
        let env_bytes = serde_json::to_vec(&env)?;
        let info_bytes = serde_json::to_vec(&info)?;
        let raw = call_instantiate_raw(&mut instance, &env_bytes, &info_bytes, init_msg)?;
        let outcome = parse_call_outcome(&raw)?;

        let recycled = instance.recycle().ok_or_else(|| anyhow!("failed to recycle mocknet instance"))?;
        let mut state = self.state.0.lock().unwrap();
        state
            .instances
            .insert(address.clone(), InstanceEntry { code_id, label: label.to_string(), storage: recycled.storage.data });
        Ok((address, outcome))
    }

    /// `handle(env, msg)`: same shape as `init`, against an already
    /// instantiated contract; returns the guest's `data`/`log`/`messages`
    /// (spec.md §4.4).
    pub fn handle(&self, address: &str, sender: &str, msg: &[u8]) -> AnyResult<CallOutcome> {
        let (wasm, prefix, chain_id, code_id, storage) = {
            let state = self.state.0.lock().unwrap();
            let instance = state.instances.get(address).ok_or_else(|| anyhow!("no such mocknet contract {address}"))?;
            let code = &state.codes[(instance.code_id - 1) as usize];
            (code.wasm.clone(), state.bech32_prefix.clone(), state.chain_id.clone(), instance.code_id, instance.storage.clone())
        };

        let backend = Backend {
            api: MocknetApi::new(&prefix),
            storage: MocknetStorage { data: storage },
            querier: MocknetQuerier::new(self.state.clone()),
        };
        let mut instance = Instance::from_code(&wasm, backend, InstanceOptions { gas_limit: DEFAULT_GAS_LIMIT, print_debug: false }, default_memory_limit())?;

        let env = build_env(&chain_id, address);
        let info = build_info(sender);
        let env_bytes = serde_json::to_vec(&env)?;
        let info_bytes = serde_json::to_vec(&info)?;
        let raw = call_execute_raw(&mut instance, &env_bytes, &info_bytes, msg)?;
        let outcome = parse_call_outcome(&raw)?;

        let recycled = instance.recycle().ok_or_else(|| anyhow!("failed to recycle mocknet instance"))?;
        let mut state = self.state.0.lock().unwrap();
        let label = state.instances.get(address).map(|i| i.label.clone()).unwrap_or_default();
        state.instances.insert(address.to_string(), InstanceEntry { code_id, label, storage: recycled.storage.data });
        Ok(outcome)
    }

    /// `query(msg)`: no env-carried sender, Ok payload is base64 bytes
    /// (spec.md §4.4).
    pub fn query(&self, address: &str, msg: &[u8]) -> AnyResult<Vec<u8>> {
        self.state.query_instance(address, msg)
    }

    pub fn get_hash(&self, code_id: u64) -> Option<String> {
        let state = self.state.0.lock().unwrap();
        state.codes.get((code_id - 1) as usize).map(|c| c.code_hash.clone())
    }

    pub fn get_code_id_by_address(&self, address: &str) -> Option<u64> {
        let state = self.state.0.lock().unwrap();
        state.instances.get(address).map(|i| i.code_id)
    }

    pub fn get_label_by_address(&self, address: &str) -> Option<String> {
        let state = self.state.0.lock().unwrap();
        state.instances.get(address).map(|i| i.label.clone())
    }
}

fn build_env(chain_id: &str, address: &str) -> Env {
    Env {
        block: BlockInfo { height: 0, time: Timestamp::from_seconds(0), chain_id: chain_id.to_string() },
        transaction: None,
        contract: ContractInfo { address: Addr::unchecked(address) },
    }
}

fn build_info(sender: &str) -> MessageInfo {
    MessageInfo { sender: Addr::unchecked(sender), funds: vec![] }
}

/// The guest's JSON result envelope (GLOSSARY "CosmWasm calling
/// convention": `{Ok|Err}`); `cosmwasm-vm`'s raw call functions return
/// this undecoded, so the host parses it directly (spec.md §4.4). Tag
/// names must match `cosmwasm_std::ContractResult`'s own wire format
/// (`"ok"`/`"err"`, see `mocknet::host`'s use of it for queries) — a
/// guest's genuine error response does not deserialize otherwise.
#[derive(serde::Deserialize)]
#[serde(rename_all = "snake_case")]
enum CallEnvelope {
    Ok(serde_json::Value),
    Err(serde_json::Value),
}

/// One instantiate/execute result: the optional `data` payload plus
/// whatever `log`/`messages` the guest reported (spec.md §4.4 E2E
/// scenario #1).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOutcome {
    pub data: Option<Vec<u8>>,
    pub log: Vec<serde_json::Value>,
    pub messages: Vec<serde_json::Value>,
}

/// Pulls a human-readable message out of an error payload. Real
/// `cosmwasm_std` errors are already-formatted strings; the
/// StdError-style shape (`{"generic_err":{"msg":"..."}}` and its
/// siblings) nests the message one level down.
fn envelope_error_message(value: &serde_json::Value) -> String {
    if let Some(msg) = value.as_str() {
        return msg.to_string();
    }
    if let Some(obj) = value.as_object() {
        for variant in obj.values() {
            if let Some(msg) = variant.get("msg").and_then(|m| m.as_str()) {
                return msg.to_string();
            }
        }
    }
    value.to_string()
}

fn parse_call_outcome(raw: &[u8]) -> AnyResult<CallOutcome> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    match serde_json::from_slice::<CallEnvelope>(raw)? {
        CallEnvelope::Ok(value) => {
            let data = match value.get("data").and_then(|d| d.as_str()) {
                Some(encoded) if !encoded.is_empty() => Some(STANDARD.decode(encoded)?),
                _ => None,
            };
            let log = value.get("log").and_then(|l| l.as_array()).cloned().unwrap_or_default();
            let messages = value.get("messages").and_then(|m| m.as_array()).cloned().unwrap_or_default();
            Ok(CallOutcome { data, log, messages })
        }
        CallEnvelope::Err(err) => bail!("mocknet call failed: {}", envelope_error_message(&err)),
    }
}

/// Unwraps the query envelope and base64-decodes the `Ok` payload, so
/// callers receive plain JSON bytes rather than having to decode
/// base64 themselves (spec.md §4.4 "Ok payload is base64").
fn extract_query_payload(raw: &[u8]) -> AnyResult<Vec<u8>> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    match serde_json::from_slice::<CallEnvelope>(raw)? {
        CallEnvelope::Ok(value) => {
            let encoded = value.as_str().ok_or_else(|| anyhow!("mocknet query Ok payload was not a base64 string"))?;
            Ok(STANDARD.decode(encoded)?)
        }
        CallEnvelope::Err(err) => bail!("mocknet query failed: {}", envelope_error_message(&err)),
    }
}

#[async_trait::async_trait]
impl ChainBackend for MocknetChain {
    async fn height(&self) -> AnyResult<u64> {
        Ok(0)
    }

    async fn get_balance(&self, _denom: &str, _address: &str) -> AnyResult<u128> {
        Ok(0)
    }

    async fn query(&self, contract: &str, msg: &[u8]) -> AnyResult<Vec<u8>> {
        self.query(contract, msg)
    }

    async fn get_code_id(&self, address: &str) -> AnyResult<u64> {
        self.get_code_id_by_address(address).ok_or_else(|| anyhow!("no such mocknet contract {address}"))
    }

    async fn get_label(&self, address: &str) -> AnyResult<String> {
        self.get_label_by_address(address).ok_or_else(|| anyhow!("no such mocknet contract {address}"))
    }

    async fn get_hash_by_address(&self, address: &str) -> AnyResult<String> {
        let code_id = self.get_code_id_by_address(address).ok_or_else(|| anyhow!("no such mocknet contract {address}"))?;
        self.get_hash(code_id).ok_or_else(|| anyhow!("no such code id {code_id}"))
    }

    async fn get_hash_by_code_id(&self, code_id: u64) -> AnyResult<String> {
        self.get_hash(code_id).ok_or_else(|| anyhow!("no such code id {code_id}"))
    }
}

#[async_trait::async_trait]
impl AgentBackend for MocknetChain {
    async fn send(&self, _from: &AgentOpts, _to: &str, _coins: &[Coin]) -> AnyResult<()> {
        Ok(())
    }

    async fn upload(&self, from: &AgentOpts, wasm: &[u8]) -> AnyResult<ChainUploadResult> {
        Ok(self.upload_wasm(wasm, from.address.clone()))
    }

    async fn instantiate(
        &self,
        from: &AgentOpts,
        code_id: u64,
        code_hash: &str,
        label: &str,
        init_msg: &[u8],
    ) -> AnyResult<(String, Option<String>)> {
        let sender = from.address.clone().unwrap_or_else(|| "mocknet1sender".to_string());
        let (address, _outcome) = self.init(code_id, code_hash, label, &sender, init_msg)?;
        Ok((address, None))
    }

    async fn execute(&self, from: &AgentOpts, contract: &ContractLink, msg: &[u8], _funds: &[Coin]) -> AnyResult<ExecuteResult> {
        let sender = from.address.clone().unwrap_or_else(|| "mocknet1sender".to_string());
        let outcome = self.handle(&contract.address, &sender, msg)?;
        Ok(ExecuteResult { tx_hash: None, data: outcome.data })
    }
}
