//! Reproducible Builder (spec.md §4.2): source spec in, deterministic
//! WASM artifact out, with disk-level idempotence ("if the target file
//! already exists, the build is skipped").

use crate::error::{bail, AnyResult};
use crate::identity::{code_hash, sanitize_crate_name, sanitize_revision};
use crate::source::{self, ContractSource, HEAD};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Build result: *what* was produced, extending `ContractSource` with
/// the artifact path and its codeHash (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractTemplate {
    pub source: ContractSource,
    pub artifact: PathBuf,
    pub code_hash: String,
}

/// Turns a `ContractSource` into a `ContractTemplate`. Implementors are
/// expected to be cheap to clone/share across concurrent builds; the
/// pull-once-then-fan-out image pull lives on the concrete type, not on
/// this trait.
#[async_trait::async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, source: &ContractSource) -> AnyResult<ContractTemplate>;
}

/// Shared state every `Builder` impl needs: where artifacts land, where
/// scratch git clones go, and a semaphore bounding parallel builds by
/// available CPU parallelism (spec.md §9 Open Question: bounded, not
/// unlimited, fan-out).
pub struct BuildEnv {
    pub output_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub scratch_root: PathBuf,
    permits: Semaphore,
}

impl BuildEnv {
    pub fn new(output_dir: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>, scratch_root: impl Into<PathBuf>) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            output_dir: output_dir.into(),
            workspace_root: workspace_root.into(),
            scratch_root: scratch_root.into(),
            permits: Semaphore::new(parallelism),
        }
    }

    fn artifact_path(&self, crate_name: &str, revision: &str) -> PathBuf {
        self.output_dir.join(format!(
            "{}@{}.wasm",
            sanitize_crate_name(crate_name),
            sanitize_revision(revision)
        ))
    }
}

/// Builds inside a pinned container image with a fixed Rust toolchain
/// and `wasm-opt` (spec.md §4.2). The image is pulled exactly once
/// before fan-out (spec.md §4.2 Parallelism), guarded by `image_pulled`.
pub struct ContainerBuilder {
    pub env: Arc<BuildEnv>,
    pub image: String,
    image_pulled: tokio::sync::OnceCell<()>,
}

impl ContainerBuilder {
    pub fn new(env: Arc<BuildEnv>, image: impl Into<String>) -> Self {
        Self { env, image: image.into(), image_pulled: tokio::sync::OnceCell::new() }
    }

    async fn ensure_image_pulled(&self) -> AnyResult<()> {
        let image = self.image.clone();
        self.image_pulled
            .get_or_try_init(|| async move {
                run(Command::new("docker").args(["pull", &image])).await
            })
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Builder for ContainerBuilder {
    async fn build(&self, source: &ContractSource) -> AnyResult<ContractTemplate> {
        let _permit = self.env.permits.acquire().await?;
        self.ensure_image_pulled().await?;

        let prepared = source::prepare(source, &self.env.workspace_root, &self.env.scratch_root)?;
        let revision = source.revision.as_deref().unwrap_or(HEAD);
        let artifact = self.env.artifact_path(&source.crate_name, revision);

        if !artifact.exists() {
            run(Command::new("docker")
                .arg("run")
                .arg("--rm")
                .arg("-v")
                .arg(format!("{}:/contract", prepared.build_dir.display()))
                .arg("-v")
                .arg(format!("{}:/output", self.env.output_dir.display()))
                .arg("-v")
                .arg("fadroma_cargo_registry:/usr/local/cargo/registry")
                .arg(&self.image)
                .args(["cargo", "build", "-p", &source.crate_name, "--release", "--target", "wasm32-unknown-unknown"]))
            .await?;

            let wasm_opt_in = format!(
                "/contract/target/wasm32-unknown-unknown/release/{}.wasm",
                sanitize_crate_name(&source.crate_name)
            );
            run(Command::new("docker")
                .arg("run")
                .arg("--rm")
                .arg("-v")
                .arg(format!("{}:/contract", prepared.build_dir.display()))
                .arg("-v")
                .arg(format!("{}:/output", self.env.output_dir.display()))
                .arg(&self.image)
                .args(["wasm-opt", "-g", "-Oz", "--strip-dwarf", &wasm_opt_in, "-o"])
                .arg(format!("/output/{}", artifact.file_name().unwrap().to_string_lossy())))
            .await?;
        }

        finish_artifact(artifact, prepared.dirty, source)
    }
}

/// `FADROMA_BUILD_RAW` path: skips the container, uses the host
/// toolchain directly. Shares Phase 1 source preparation with
/// `ContainerBuilder` (spec.md §6 env var table, §4.2 supplement in
/// SPEC_FULL.md).
pub struct RawBuilder {
    pub env: Arc<BuildEnv>,
}

impl RawBuilder {
    pub fn new(env: Arc<BuildEnv>) -> Self {
        Self { env }
    }
}

#[async_trait::async_trait]
impl Builder for RawBuilder {
    async fn build(&self, source: &ContractSource) -> AnyResult<ContractTemplate> {
        let _permit = self.env.permits.acquire().await?;
        let prepared = source::prepare(source, &self.env.workspace_root, &self.env.scratch_root)?;
        let revision = source.revision.as_deref().unwrap_or(HEAD);
        let artifact = self.env.artifact_path(&source.crate_name, revision);

        if !artifact.exists() {
            run(Command::new("cargo")
                .current_dir(&prepared.build_dir)
                .args(["build", "-p", &source.crate_name, "--release", "--target", "wasm32-unknown-unknown"]))
            .await?;

            let built = prepared.build_dir.join(format!(
                "target/wasm32-unknown-unknown/release/{}.wasm",
                sanitize_crate_name(&source.crate_name)
            ));
            run(Command::new("wasm-opt")
                .args(["-g", "-Oz", "--strip-dwarf"])
                .arg(&built)
                .arg("-o")
                .arg(&artifact))
            .await?;
        }

        finish_artifact(artifact, prepared.dirty, source)
    }
}

fn finish_artifact(artifact: PathBuf, dirty: bool, source: &ContractSource) -> AnyResult<ContractTemplate> {
    if !artifact.exists() {
        bail!("build did not produce expected artifact at {}", artifact.display());
    }
    let bytes = std::fs::read(&artifact)?;
    let hash = code_hash(&bytes);
    std::fs::write(artifact.with_extension("wasm.sha256"), &hash)?;

    let mut source = source.clone();
    source.dirty = dirty;
    Ok(ContractTemplate { source, artifact, code_hash: hash })
}

async fn run(cmd: &mut Command) -> AnyResult<()> {
    let program = cmd.get_program().to_owned();
    let args: Vec<_> = cmd.get_args().map(|a| a.to_owned()).collect();
    let mut tokio_cmd = tokio::process::Command::new(program);
    tokio_cmd.args(args);
    if let Some(dir) = cmd.get_current_dir() {
        tokio_cmd.current_dir(dir);
    }
    let status = tokio_cmd.status().await?;
    if !status.success() {
        bail!("command failed with status {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_path_matches_naming_convention() {
        let env = BuildEnv::new("/out", "/ws", "/scratch");
        let path = env.artifact_path("my-token", "v1.0.0");
        assert_eq!(path, PathBuf::from("/out/my_token@v1.0.0.wasm"));
    }

    #[tokio::test]
    async fn raw_build_skips_when_artifact_exists() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let env = Arc::new(BuildEnv::new(&out, dir.path(), dir.path().join("scratch")));
        let builder = RawBuilder::new(env.clone());
        let source = ContractSource::new("my-token");
        let artifact = env.artifact_path("my-token", HEAD);
        std::fs::write(&artifact, b"fake wasm bytes").unwrap();

        let template = builder.build(&source).await.unwrap();
        assert_eq!(template.artifact, artifact);
        assert_eq!(template.code_hash, code_hash(b"fake wasm bytes"));
    }
}
