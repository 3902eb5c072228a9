//! Error kinds for the deployment pipeline.
//!
//! Closed, programmer-facing failures (missing configuration, bundle
//! discipline violations) are [`Error`] variants. Everything else —
//! build tool failures, RPC failures, chain errors — is propagated as
//! [`AnyError`], using an `anyhow`-based `AnyResult`/`bail!` convention.

pub use anyhow::{anyhow, bail, Context as AnyContext, Error as AnyError, Result as AnyResult};
use thiserror::Error;

/// Lifecycle stage a [`crate::error::Error`] or backend failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Upload,
    Instantiate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Build => "build",
            Stage::Upload => "upload",
            Stage::Instantiate => "instantiate",
        };
        write!(f, "{s}")
    }
}

/// Named, programmer-facing error kinds. Configuration errors surface at
/// the earliest stage-advance that would require the missing field;
/// bundle-discipline errors are programming errors and fail loudly.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no chain id configured")]
    NoChainId,

    #[error("no chain selected (set FADROMA_CHAIN)")]
    NoChainSelected,

    #[error("unknown chain selected: {0}")]
    UnknownChainSelected(String),

    #[error("contract has no crate name set, cannot build")]
    NoCrate,

    #[error("contract has no agent set, cannot {0}")]
    NoAgent(Stage),

    #[error("contract has no builder set, cannot build")]
    NoBuilder,

    #[error("contract has no uploader set, cannot upload")]
    NoUploader,

    #[error("contract has no name, cannot register in deployment")]
    NoName,

    #[error("contract has no init label, cannot instantiate")]
    NoInitLabel,

    #[error("contract has no init message, cannot instantiate")]
    NoInitMessage,

    #[error("contract has no code id, cannot instantiate")]
    NoInitCodeId,

    #[error("contract link has no address")]
    LinkNoAddress,

    #[error("genesis account {0:?} requested outside devnet")]
    NameOutsideDevnet(String),

    #[error("operation {0} is not allowed inside a bundle")]
    NotInBundle(&'static str),

    #[error("cannot submit an empty bundle")]
    EmptyBundle,

    #[error("bundle has no agent to submit through")]
    NoBundleAgent,

    #[error("invalid label {0:?}: {1}")]
    InvalidLabel(String, &'static str),
}

/// Non-fatal consistency warnings, logged rather than propagated. These
/// mirror spec.md §7's "Consistency warnings" bucket; callers may still
/// route them through `log::warn!` at the call site, this type exists so
/// tests can assert on the specific condition raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    CodeHashMismatch {
        address: String,
        expected: String,
        fetched: String,
    },
    DevnetNodeOverride {
        field: &'static str,
    },
    DirtyUploadToMainnet {
        crate_name: String,
    },
    NoCodeHashSupplied,
    NodeIgnoredForMode,
    DevnetStateChainIdMismatch {
        expected: String,
        found: String,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::CodeHashMismatch { address, expected, fetched } => write!(
                f,
                "code hash mismatch for {address}: expected {expected}, chain reports {fetched}"
            ),
            Warning::DevnetNodeOverride { field } => {
                write!(f, "devnet node disagreed on {field}, node value wins")
            }
            Warning::DirtyUploadToMainnet { crate_name } => {
                write!(f, "uploading dirty build of {crate_name} to mainnet")
            }
            Warning::NoCodeHashSupplied => write!(f, "no code hash supplied"),
            Warning::NodeIgnoredForMode => {
                write!(f, "node given for non-devnet chain mode, ignoring")
            }
            Warning::DevnetStateChainIdMismatch { expected, found } => {
                write!(f, "devnet.json chain id {found} does not match expected {expected}")
            }
        }
    }
}

/// Logs a [`Warning`] at `warn` level through the `log` facade, the
/// "external console collaborator" spec.md §7 delegates presentation to.
pub fn warn(w: Warning) {
    log::warn!("{w}");
}
