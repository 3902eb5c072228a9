//! Content hashes, labels, and the ICC-wire contract link, per
//! spec.md §3. These are the values every receipt stage carries and
//! that `checkHash`/`getLabel`/label composition build on top of.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lowercase hex sha256 of an artifact's bytes. Doubles as the chain's
/// `codeHash` once uploaded — spec.md §3 invariant:
/// `sha256(bytes(artifact)) == codeHash`.
pub fn code_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_lower(&hasher.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// `/` -> `_` in file paths, used when a repository/workspace path is
/// folded into an artifact filename (spec.md §4.2 Sanitization).
pub fn sanitize_path(input: &str) -> String {
    input.replace('/', "_")
}

/// `-` -> `_` in crate names used as filename stems (spec.md §4.2
/// Sanitization).
pub fn sanitize_crate_name(input: &str) -> String {
    input.replace('-', "_")
}

/// Revision string sanitized for use as a directory/file key. Combines
/// both sanitization rules since revisions may contain slashes
/// (`remotes/origin/foo`) as well as dashes.
pub fn sanitize_revision(revision: &str) -> String {
    sanitize_path(&sanitize_crate_name(revision))
}

/// The three-part label structure from spec.md §3:
/// `label = (prefix+"/")? + name + ("+"+suffix)?`.
///
/// Construction is infallible; validity (no embedded `/` in `name` or
/// `suffix`, no embedded `+` in `name`) is enforced by [`Label::compose`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub prefix: Option<String>,
    pub name: String,
    pub suffix: Option<String>,
}

impl Label {
    pub fn new(prefix: Option<String>, name: String, suffix: Option<String>) -> Self {
        Self { prefix, name, suffix }
    }

    /// Compose the full on-chain label string. Fails if `name` contains
    /// `/` or `+`, which would make [`Label::parse`] ambiguous.
    pub fn compose(&self) -> Result<String, crate::error::Error> {
        if self.name.contains('/') || self.name.contains('+') {
            return Err(crate::error::Error::InvalidLabel(
                self.name.clone(),
                "name must not contain '/' or '+'",
            ));
        }
        let mut out = String::new();
        if let Some(prefix) = &self.prefix {
            out.push_str(prefix);
            out.push('/');
        }
        out.push_str(&self.name);
        if let Some(suffix) = &self.suffix {
            out.push('+');
            out.push_str(suffix);
        }
        Ok(out)
    }

    /// Parse a composed label back into its three parts. The prefix is
    /// split on the *first* `/`, the suffix on the *last* `+`, so that
    /// `a/b/c+d` parses as `prefix="a", name="b/c", suffix="d"` — names
    /// themselves never contain `/` per [`Label::compose`]'s invariant,
    /// but a prefix might be reused as a deployment-wide namespace that
    /// happens to repeat a `/`. Round-trips for every label produced by
    /// `compose`.
    pub fn parse(label: &str) -> Self {
        let (prefix, rest) = match label.split_once('/') {
            Some((p, r)) => (Some(p.to_string()), r),
            None => (None, label),
        };
        let (name, suffix) = match rest.rsplit_once('+') {
            Some((n, s)) => (n.to_string(), Some(s.to_string())),
            None => (rest.to_string(), None),
        };
        Self { prefix, name, suffix }
    }
}

/// The ICC-wire form of a deployed contract, derivable from any
/// `ContractInstance` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ContractLink {
    pub address: String,
    pub code_hash: String,
}

impl ContractLink {
    pub fn new(address: impl Into<String>, code_hash: impl Into<String>) -> Self {
        Self { address: address.into(), code_hash: code_hash.into() }
    }
}
