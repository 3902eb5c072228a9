//! Guest ABI host pieces `cosmwasm-vm` needs to run a module:
//! `BackendApi`, `Storage`, `Querier` (spec.md §4.4 "Environment
//! imports").
//!
//! `cosmwasm-vm`'s `"iterator"` feature is off for this crate (see
//! DESIGN.md), so `Storage` only needs `get`/`set`/`remove` — mocknet
//! never has to implement range scans.

use super::SharedState;
use crate::error::AnyResult;
use bech32::{FromBase32, ToBase32, Variant};
use cosmwasm_vm::{BackendApi, BackendError, BackendResult, GasInfo, Querier, Storage};
use std::collections::HashMap;

/// Real Secret/CosmWasm addresses canonicalize to 20 or 32 raw bytes
/// depending on the key scheme; mocknet accepts either.
const SHORT_CANON_LEN: usize = 20;
const LONG_CANON_LEN: usize = 32;

/// Bech32 canonicalize/humanize over the mocknet's configured prefix
/// (spec.md §4.4).
#[derive(Clone)]
pub struct MocknetApi {
    prefix: String,
}

impl MocknetApi {
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_string() }
    }

    /// A deterministic synthetic address derived from the running
    /// instance counter (spec.md §4.4 "Module loading": "address
    /// derived from codeId + instance counter").
    pub fn next_contract_address(&self, instance_counter: u64) -> AnyResult<String> {
        let mut canonical = [0u8; LONG_CANON_LEN];
        canonical[..8].copy_from_slice(&instance_counter.to_be_bytes());
        let (human, _gas) = self.addr_humanize(&canonical);
        human.map_err(|e| crate::error::anyhow!("failed to derive mocknet address: {e}"))
    }

    fn addr_validate(&self, input: &str) -> BackendResult<()> {
        let mut gas_total = GasInfo::with_externally_used(0);

        let (canonical, gas) = self.addr_canonicalize(input);
        gas_total += gas;
        let canonical = match canonical {
            Ok(c) => c,
            Err(e) => return (Err(e), gas_total),
        };

        let (humanized, gas) = self.addr_humanize(&canonical);
        gas_total += gas;
        match humanized {
            Ok(h) if h == input => (Ok(()), gas_total),
            Ok(_) => (Err(BackendError::user_err("address not normalized, did you mean the canonical form?")), gas_total),
            Err(e) => (Err(e), gas_total),
        }
    }

    fn addr_canonicalize(&self, human: &str) -> BackendResult<Vec<u8>> {
        let gas = GasInfo::with_externally_used(human.len() as u64);
        if human.trim().is_empty() {
            return (Err(BackendError::user_err("empty address string is not allowed")), gas);
        }
        let (hrp, data, _variant) = match bech32::decode(human) {
            Ok(v) => v,
            Err(e) => return (Err(BackendError::user_err(e.to_string())), gas),
        };
        if hrp != self.prefix {
            return (Err(BackendError::user_err(format!("address has prefix {hrp}, expected {}", self.prefix))), gas);
        }
        match Vec::<u8>::from_base32(&data) {
            Ok(bytes) => (Ok(bytes), gas),
            Err(e) => (Err(BackendError::user_err(e.to_string())), gas),
        }
    }

    fn addr_humanize(&self, canonical: &[u8]) -> BackendResult<String> {
        let gas = GasInfo::with_externally_used(canonical.len() as u64);
        if canonical.len() != SHORT_CANON_LEN && canonical.len() != LONG_CANON_LEN {
            return (Err(BackendError::user_err("canonical address has the wrong length")), gas);
        }
        match bech32::encode(&self.prefix, canonical.to_base32(), Variant::Bech32) {
            Ok(human) => (Ok(human), gas),
            Err(e) => (Err(BackendError::user_err(e.to_string())), gas),
        }
    }
}

impl BackendApi for MocknetApi {
    fn canonical_address(&self, human: &str) -> BackendResult<Vec<u8>> {
        self.addr_canonicalize(human)
    }

    fn human_address(&self, canonical: &[u8]) -> BackendResult<String> {
        self.addr_humanize(canonical)
    }
}

/// One WASM instance's KV storage (spec.md §4.4 "Storage isolation"):
/// reconstructed from the instance's persisted map on every call and
/// written back afterwards by `MocknetChain::init`/`handle`.
pub struct MocknetStorage {
    pub data: HashMap<Vec<u8>, Vec<u8>>,
}

impl Storage for MocknetStorage {
    fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        let gas = GasInfo::with_externally_used(key.len() as u64);
        (Ok(self.data.get(key).cloned()), gas)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        let gas = GasInfo::with_externally_used((key.len() + value.len()) as u64);
        self.data.insert(key.to_vec(), value.to_vec());
        (Ok(()), gas)
    }

    fn remove(&mut self, key: &[u8]) -> BackendResult<()> {
        let gas = GasInfo::with_externally_used(key.len() as u64);
        self.data.remove(key);
        (Ok(()), gas)
    }
}

/// Inter-contract query dispatch (spec.md §4.4 `query_chain`): decodes
/// a `QueryRequest::Wasm`, forwards it through `SharedState`, and
/// re-wraps the response the way the guest's `deps.querier` expects.
pub struct MocknetQuerier {
    state: SharedState,
}

impl MocknetQuerier {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    fn dispatch(
        &self,
        request: &[u8],
    ) -> Result<cosmwasm_std::SystemResult<cosmwasm_std::ContractResult<cosmwasm_std::Binary>>, BackendError> {
        let parsed: cosmwasm_std::QueryRequest<cosmwasm_std::Empty> =
            serde_json::from_slice(request).map_err(|e| BackendError::user_err(e.to_string()))?;

        let response: Vec<u8> = match parsed {
            cosmwasm_std::QueryRequest::Wasm(cosmwasm_std::WasmQuery::Smart { contract_addr, msg }) => self
                .state
                .query_instance(&contract_addr, msg.as_slice())
                .map_err(|e| BackendError::user_err(e.to_string()))?,
            cosmwasm_std::QueryRequest::Wasm(cosmwasm_std::WasmQuery::Raw { contract_addr, key }) => {
                self.state.read_raw(&contract_addr, key.as_slice()).map_err(|e| BackendError::user_err(e.to_string()))?
            }
            _ => return Err(BackendError::user_err("mocknet only routes Wasm Smart/Raw queries")),
        };

        let envelope = cosmwasm_std::ContractResult::<cosmwasm_std::Binary>::Ok(response.into());
        Ok(cosmwasm_std::SystemResult::Ok(envelope))
    }
}

impl Querier for MocknetQuerier {
    fn query_raw(
        &self,
        request: &[u8],
        _gas_limit: u64,
    ) -> BackendResult<cosmwasm_std::SystemResult<cosmwasm_std::ContractResult<cosmwasm_std::Binary>>> {
        let gas = GasInfo::with_externally_used(request.len() as u64);
        (self.dispatch(request), gas)
    }
}
