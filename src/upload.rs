//! Uploader (component C, spec.md §4.1/§6): artifact → code-id on a
//! chain, cached by `(chainId, codeHash)` through the upload-receipt
//! store so a second upload of the same bytes to the same chain is
//! free (spec.md §8 "Upload idempotence").

use crate::agent::Agent;
use crate::build::ContractTemplate;
use crate::chain::Mode;
use crate::error::{warn, AnyResult, Warning};
use crate::receipts::{read_if_exists, upload_receipt_path, write_atomic, UploadReceipt};
use std::path::PathBuf;

/// Upload result: extends `ContractTemplate` with the chain-assigned
/// code id (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedTemplate {
    pub template: ContractTemplate,
    pub chain_id: String,
    pub code_id: u64,
    pub upload_by: Option<String>,
    pub upload_tx: Option<String>,
}

/// Filesystem-backed uploader: checks `<uploads>/<chainId>/<codeHash>.json`
/// before invoking the chain, and writes it back atomically after a
/// successful upload (spec.md §4.1 upload(), §5 atomic replace).
pub struct FSUploader {
    pub uploads_dir: PathBuf,
}

impl FSUploader {
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self { uploads_dir: uploads_dir.into() }
    }

    /// Upload `template` through `agent`, short-circuiting on an existing
    /// receipt for `(chainId, codeHash)`. An existing matching receipt is
    /// authoritative (spec.md §3 `UploadedTemplate` invariant).
    pub async fn upload(&self, template: ContractTemplate, agent: &Agent) -> AnyResult<UploadedTemplate> {
        let chain_id = agent.chain.id.clone();
        let path = upload_receipt_path(&self.uploads_dir, &chain_id, &template.code_hash);

        if template.source.dirty && agent.chain.mode == Mode::Mainnet {
            warn(Warning::DirtyUploadToMainnet { crate_name: template.source.crate_name.clone() });
        }

        if let Some(receipt) = read_if_exists::<UploadReceipt>(&path)? {
            return Ok(UploadedTemplate {
                template,
                chain_id,
                code_id: receipt.code_id,
                upload_by: receipt.upload_by,
                upload_tx: receipt.upload_tx,
            });
        }

        let wasm = std::fs::read(&template.artifact)?;
        let result = agent.upload(&wasm).await?;

        write_atomic(
            &path,
            &UploadReceipt {
                chain_id: chain_id.clone(),
                code_id: result.code_id,
                code_hash: template.code_hash.clone(),
                upload_tx: result.upload_tx.clone(),
                upload_by: result.upload_by.clone(),
                artifact: template.artifact.to_str().map(String::from),
            },
        )?;

        Ok(UploadedTemplate {
            template,
            chain_id,
            code_id: result.code_id,
            upload_by: result.upload_by,
            upload_tx: result.upload_tx,
        })
    }
}
