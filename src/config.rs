//! Environment-variable configuration surface (spec.md §6, SPEC_FULL.md
//! §2.2). Not a CLI: an external command layer is expected to call
//! `FadromaConfig::from_env()` once at process start and thread the
//! result into `Builder`/`Devnet`/`Chain` constructors.

use std::collections::HashMap;
use std::env;

/// Reads a boolean-ish environment variable: present and non-empty,
/// not `"0"` or `"false"` (case-insensitive), counts as set.
fn flag(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false"),
        Err(_) => false,
    }
}

fn opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Snapshot of `FADROMA_*` environment variables read once at process
/// start (spec.md §6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FadromaConfig {
    /// `FADROMA_CHAIN` — which configured chain to select by default.
    pub chain: Option<String>,
    /// `FADROMA_BUILD_RAW` — use `RawBuilder` (host toolchain) instead
    /// of `ContainerBuilder`.
    pub build_raw: bool,
    /// `FADROMA_BUILD_MANAGER` — address of a long-running build
    /// manager process, if builds are delegated rather than run inline.
    pub build_manager: Option<String>,
    /// `FADROMA_BUILD_UNSAFE_MOUNT_KEYS` — mount host signing keys into
    /// the build container; opt-in because it exposes secrets to
    /// arbitrary crate build scripts.
    pub build_unsafe_mount_keys: bool,
    /// `FADROMA_BUILD_NO_FETCH` — mirrors the legacy `_NO_FETCH`
    /// variable `source::ensure_ref_exists` reads directly: forbid
    /// network fetches during Phase 1 source preparation.
    pub build_no_fetch: bool,
    /// `FADROMA_REBUILD` — ignore the on-disk artifact cache.
    pub rebuild: bool,
    /// `FADROMA_UPLOAD_ALWAYS` — skip the "already uploaded" shortcut
    /// and always push a fresh upload.
    pub upload_always: bool,
    /// `FADROMA_DEVNET_MANAGER` — address of a devnet manager process,
    /// if devnet lifecycle is delegated rather than driven locally.
    pub devnet_manager: Option<String>,
    /// `FADROMA_DEVNET_EPHEMERAL` — default `Devnet::ephemeral()`.
    pub devnet_ephemeral: bool,
    /// `FADROMA_DEVNET_HOST` — override the devnet container's
    /// advertised host (spec.md §4.5 `devnet.json.host`).
    pub devnet_host: Option<String>,
    /// `FADROMA_PRINT_TXS` — log every broadcast transaction hash.
    pub print_txs: bool,
    /// Chain-family passthrough (`SCRT_*`), opaque to this crate and
    /// forwarded verbatim to whatever chain-family client consumes it.
    pub scrt: HashMap<String, String>,
}

impl FadromaConfig {
    pub fn from_env() -> Self {
        let mut scrt = HashMap::new();
        for (key, value) in env::vars() {
            if let Some(suffix) = key.strip_prefix("SCRT_") {
                scrt.insert(suffix.to_string(), value);
            }
        }

        Self {
            chain: opt("FADROMA_CHAIN"),
            build_raw: flag("FADROMA_BUILD_RAW"),
            build_manager: opt("FADROMA_BUILD_MANAGER"),
            build_unsafe_mount_keys: flag("FADROMA_BUILD_UNSAFE_MOUNT_KEYS"),
            build_no_fetch: flag("FADROMA_BUILD_NO_FETCH"),
            rebuild: flag("FADROMA_REBUILD"),
            upload_always: flag("FADROMA_UPLOAD_ALWAYS"),
            devnet_manager: opt("FADROMA_DEVNET_MANAGER"),
            devnet_ephemeral: flag("FADROMA_DEVNET_EPHEMERAL"),
            devnet_host: opt("FADROMA_DEVNET_HOST"),
            print_txs: flag("FADROMA_PRINT_TXS"),
            scrt,
        }
    }
}
