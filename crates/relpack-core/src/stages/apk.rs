//! Alpine packaging.
//!
//! For every configured [`AlpineSpec`] and every architecture with eligible
//! binaries, one [`ArchJob`] walks a small state machine:
//!
//! ```text
//! Pending --[write APKBUILD]--> DescriptorWritten --[abuild]--> NativeBuilt
//!         --[abuild-sign]--> Signed --[register]--> Registered
//! ```
//!
//! Any transition may instead land in [`ApkState::Failed`], which records the
//! phase and the error. Jobs run under a [`TaskGroup`] so one architecture
//! failing never stops the others.
//!
//! ## Working directory layout
//!
//! Each job owns `<workdir> = <dist>/alpine-<name>/<root>/<branch>/<repository>/<arch>`.
//!
//! | Path | Contents |
//! |---|---|
//! | `<workdir>/APKBUILD` | Rendered descriptor |
//! | `<workdir>/<arch>/<binary>` | Copied binaries (mode 0555) |
//! | `<workdir>/<repository>/<arch>/` | `abuild` output (`$REPODEST/<repo>/<arch>`) |
//!
//! `<arch>` is the `abuild` architecture name (see [`apk_arch`]). Two specs
//! with the same name and repository location are rejected before any job
//! starts, so no directory is ever shared.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use relpack_schema::{Artifact, ArtifactExtra, ArtifactKind, Filter, LINUX, apk_arch};
use tracing::{debug, info, warn};

use crate::config::AlpineSpec;
use crate::context::{ReleaseContext, StageOutcome};
use crate::error::{PipelineError, Result};
use crate::group::TaskGroup;
use crate::io::tool::{ToolInvocation, ToolRunner, run_checked};
use crate::stages::apkbuild::ApkBuild;

/// Descriptor file name expected by `abuild`.
pub const APKBUILD_FILE: &str = "APKBUILD";
/// Index file produced by `abuild -r`.
pub const APKINDEX_FILE: &str = "APKINDEX.tar.gz";
/// Native package builder.
pub const ABUILD: &str = "abuild";
/// Index signer.
pub const ABUILD_SIGN: &str = "abuild-sign";
/// Environment key holding the public key path.
pub const PUBKEY_ENV: &str = "PACKAGER_PUBKEY";
/// Environment key holding the private key path.
pub const PRIVKEY_ENV: &str = "PACKAGER_PRIVKEY";

/// Key pair used to sign `APKINDEX.tar.gz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeys {
    public: PathBuf,
    private: PathBuf,
}

impl SigningKeys {
    /// Validate and wrap a key pair.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingSigningKeys`] if either path is empty.
    pub fn new(public: impl Into<PathBuf>, private: impl Into<PathBuf>) -> Result<Self> {
        let public = public.into();
        let private = private.into();
        if public.as_os_str().is_empty() || private.as_os_str().is_empty() {
            return Err(PipelineError::MissingSigningKeys);
        }
        Ok(Self { public, private })
    }

    /// Read the key pair from `PACKAGER_PUBKEY` / `PACKAGER_PRIVKEY` in the
    /// context environment.
    pub fn from_context(ctx: &ReleaseContext) -> Result<Self> {
        match (ctx.env_var(PUBKEY_ENV), ctx.env_var(PRIVKEY_ENV)) {
            (Some(public), Some(private)) => Self::new(public, private),
            _ => Err(PipelineError::MissingSigningKeys),
        }
    }

    /// Path of the public key.
    pub fn public(&self) -> &Path {
        &self.public
    }

    /// Path of the private key.
    pub fn private(&self) -> &Path {
        &self.private
    }

    /// Directory holding the public key, passed to `abuild-sign -p`.
    pub fn public_dir(&self) -> &Path {
        self.public
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

/// The step a job was attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Rendering and writing `APKBUILD`.
    WriteDescriptor,
    /// Copying binaries and running `abuild`.
    Build,
    /// Running `abuild-sign`.
    Sign,
    /// Adding the package and index to the registry.
    Register,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WriteDescriptor => "write APKBUILD",
            Self::Build => "build",
            Self::Sign => "sign",
            Self::Register => "register",
        };
        write!(f, "{s}")
    }
}

/// State of one `(spec, arch)` job.
#[derive(Debug)]
pub enum ApkState {
    /// Nothing done yet.
    Pending,
    /// `APKBUILD` is on disk.
    DescriptorWritten,
    /// `abuild` produced the package and an unsigned index.
    NativeBuilt {
        /// Built `.apk`.
        package: PathBuf,
        /// Generated `APKINDEX.tar.gz`.
        index: PathBuf,
    },
    /// The index has been signed.
    Signed {
        /// Built `.apk`.
        package: PathBuf,
        /// Signed `APKINDEX.tar.gz`.
        index: PathBuf,
    },
    /// Both artifacts are in the registry.
    Registered,
    /// A transition failed.
    Failed {
        /// Transition that failed.
        phase: Phase,
        /// Why.
        error: PipelineError,
    },
}

impl ApkState {
    /// Returns `true` for `Registered` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Registered | Self::Failed { .. })
    }

    /// The transition that leaves this state.
    fn next_phase(&self) -> Phase {
        match self {
            Self::Pending => Phase::WriteDescriptor,
            Self::DescriptorWritten => Phase::Build,
            Self::NativeBuilt { .. } => Phase::Sign,
            Self::Signed { .. } | Self::Registered | Self::Failed { .. } => Phase::Register,
        }
    }
}

/// One `(spec, arch)` unit of packaging work.
#[derive(Debug, Clone)]
pub struct ArchJob {
    /// Package spec being built.
    pub spec: Arc<AlpineSpec>,
    /// Canonical architecture (`amd64`).
    pub arch: String,
    /// `abuild` architecture (`x86_64`).
    pub native_arch: String,
    /// Binaries to include, all built for `arch`.
    pub binaries: Vec<Artifact>,
    /// Working directory owned by this job alone.
    pub workdir: PathBuf,
}

impl ArchJob {
    fn label(&self) -> String {
        format!(
            "alpine {} [{}] ({})",
            self.spec.name,
            self.spec.repo_subpath(""),
            self.native_arch
        )
    }

    fn descriptor_path(&self) -> PathBuf {
        self.workdir.join(APKBUILD_FILE)
    }

    fn bin_dir(&self) -> PathBuf {
        self.workdir.join(&self.native_arch)
    }

    /// `abuild` writes to `$REPODEST/<repo>/<arch>` where `<repo>` is the
    /// name of the build directory's parent.
    fn output_dir(&self) -> PathBuf {
        let repo = self
            .workdir
            .parent()
            .and_then(Path::file_name)
            .map(PathBuf::from)
            .unwrap_or_default();
        self.workdir.join(repo).join(&self.native_arch)
    }

    fn package_file_name(&self, version: &str) -> String {
        format!("{}-{version}-r{}.apk", self.spec.name, self.spec.rel)
    }

    fn binary_names(&self) -> BTreeMap<String, String> {
        self.binaries
            .iter()
            .filter_map(|b| file_name(&b.path))
            .map(|name| {
                let source = format!("$startdir/{}/{name}", self.native_arch);
                (name, source)
            })
            .collect()
    }
}

/// Final state of one job.
#[derive(Debug)]
pub struct ArchReport {
    /// `alpine <name> [<repository location>] (<arch>)`.
    pub label: String,
    /// Spec name.
    pub spec: String,
    /// Canonical architecture.
    pub arch: String,
    /// `abuild` architecture.
    pub native_arch: String,
    /// Terminal state reached.
    pub state: ApkState,
}

impl ArchReport {
    /// `Ok` when registered, the labelled failure otherwise.
    pub fn into_result(self) -> Result<()> {
        match self.state {
            ApkState::Failed { phase, error } => Err(PipelineError::unit(
                format!("{} {phase}", self.label),
                error,
            )),
            _ => Ok(()),
        }
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn check_binary_names(arch: &str, binaries: &[Artifact]) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for binary in binaries {
        let Some(file) = file_name(&binary.path) else {
            continue;
        };
        if let Some(first) = seen.insert(file.clone(), &binary.name) {
            return Err(PipelineError::Config(format!(
                "linux/{arch} binaries {first} and {} both install as {file}",
                binary.name
            )));
        }
    }
    Ok(())
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Builds and signs `.apk` packages.
#[derive(Debug, Clone)]
pub struct ApkPackager {
    keys: SigningKeys,
    runner: Arc<dyn ToolRunner>,
}

impl ApkPackager {
    /// Create a packager with validated keys.
    pub fn new(keys: SigningKeys, runner: Arc<dyn ToolRunner>) -> Self {
        Self { keys, runner }
    }

    /// Plan one job per `(spec, arch)` pair.
    ///
    /// Eligible inputs are uploadable linux binaries without an architecture
    /// variant. Specs without eligible binaries produce no jobs.
    ///
    /// Fails with [`PipelineError::Config`] when two specs share a name and
    /// repository location, or when two binaries of one architecture would
    /// install under the same file name.
    pub fn plan(&self, ctx: &ReleaseContext) -> Result<Vec<ArchJob>> {
        let eligible = ctx
            .artifacts
            .filter(&Filter::And(vec![
                Filter::by_type(ArtifactKind::UploadableBinary),
                Filter::by_os(LINUX),
                Filter::by_arch_variant(""),
            ]))
            .list();
        debug!("will build {} artifacts", eligible.len());

        let mut by_arch: BTreeMap<String, Vec<Artifact>> = BTreeMap::new();
        for binary in eligible {
            if binary.arch.is_empty() {
                warn!(artifact = %binary.name, "skipping linux binary without an architecture");
                continue;
            }
            by_arch.entry(binary.arch.clone()).or_default().push(binary);
        }
        for (arch, binaries) in &by_arch {
            check_binary_names(arch, binaries)?;
        }

        let dist = std::path::absolute(&ctx.config.dist)
            .map_err(|e| PipelineError::fs("resolve", &ctx.config.dist, e))?;

        let mut locations = HashSet::new();
        let mut jobs = Vec::new();
        for spec in &ctx.config.alpine {
            let location = spec.repo_subpath("");
            if !locations.insert((spec.name.as_str(), location.clone())) {
                return Err(PipelineError::Config(format!(
                    "alpine package {} is configured twice for repository {location}",
                    spec.name
                )));
            }

            let spec = Arc::new(spec.clone());
            let spec_dir = dist.join(format!("alpine-{}", spec.name));
            for (arch, binaries) in &by_arch {
                let native_arch = apk_arch(arch).to_string();
                jobs.push(ArchJob {
                    spec: Arc::clone(&spec),
                    arch: arch.clone(),
                    workdir: spec_dir.join(spec.repo_subpath(&native_arch)),
                    native_arch,
                    binaries: binaries.clone(),
                });
            }
        }
        Ok(jobs)
    }

    /// Drive one job until it reaches a terminal state.
    pub async fn run_job(&self, ctx: &ReleaseContext, job: &ArchJob) -> ArchReport {
        let mut state = ApkState::Pending;
        while !state.is_terminal() {
            state = self.advance(ctx, job, state).await;
        }
        ArchReport {
            label: job.label(),
            spec: job.spec.name.clone(),
            arch: job.arch.clone(),
            native_arch: job.native_arch.clone(),
            state,
        }
    }

    /// Apply the transition leaving `state`.
    pub async fn advance(&self, ctx: &ReleaseContext, job: &ArchJob, state: ApkState) -> ApkState {
        let phase = state.next_phase();
        let result = match state {
            ApkState::Pending => self
                .write_descriptor(ctx, job)
                .await
                .map(|()| ApkState::DescriptorWritten),
            ApkState::DescriptorWritten => self
                .build(ctx, job)
                .await
                .map(|(package, index)| ApkState::NativeBuilt { package, index }),
            ApkState::NativeBuilt { package, index } => self
                .sign(job, &index)
                .await
                .map(|()| ApkState::Signed { package, index }),
            ApkState::Signed { package, index } => self
                .register(ctx, job, package, index)
                .map(|()| ApkState::Registered),
            terminal @ (ApkState::Registered | ApkState::Failed { .. }) => return terminal,
        };

        result.unwrap_or_else(|error| {
            warn!(spec = %job.spec.name, arch = %job.native_arch, %phase, "apk job failed: {error}");
            ApkState::Failed { phase, error }
        })
    }

    async fn write_descriptor(&self, ctx: &ReleaseContext, job: &ArchJob) -> Result<()> {
        tokio::fs::create_dir_all(&job.workdir)
            .await
            .map_err(|e| PipelineError::fs("create directory", &job.workdir, e))?;

        let contents = ApkBuild {
            spec: &job.spec,
            version: &ctx.version,
            binaries: job.binary_names(),
        }
        .render()?;

        let path = job.descriptor_path();
        info!(spec = %job.spec.name, arch = %job.native_arch, path = %path.display(), "writing APKBUILD");
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| PipelineError::fs("write", &path, e))
    }

    async fn build(&self, ctx: &ReleaseContext, job: &ArchJob) -> Result<(PathBuf, PathBuf)> {
        let bin_dir = job.bin_dir();
        tokio::fs::create_dir_all(&bin_dir)
            .await
            .map_err(|e| PipelineError::fs("create directory", &bin_dir, e))?;

        for binary in &job.binaries {
            let Some(name) = file_name(&binary.path) else {
                continue;
            };
            copy_executable(&binary.path, &bin_dir.join(name)).await?;
        }

        info!(spec = %job.spec.name, arch = %job.native_arch, "running abuild");
        let invocation = ToolInvocation::new(ABUILD, &job.workdir)
            .arg("-P")
            .arg(display(&job.workdir))
            .arg("-r")
            .env("CBUILD", &job.native_arch)
            .env(PUBKEY_ENV, display(self.keys.public()))
            .env(PRIVKEY_ENV, display(self.keys.private()));
        run_checked(self.runner.as_ref(), &invocation).await?;

        let output = job.output_dir();
        Ok((
            output.join(job.package_file_name(&ctx.version)),
            output.join(APKINDEX_FILE),
        ))
    }

    async fn sign(&self, job: &ArchJob, index: &Path) -> Result<()> {
        info!(spec = %job.spec.name, arch = %job.native_arch, "signing {APKINDEX_FILE}");
        let invocation = ToolInvocation::new(ABUILD_SIGN, &job.workdir)
            .arg("-k")
            .arg(display(self.keys.private()))
            .arg("-p")
            .arg(display(self.keys.public_dir()))
            .arg(display(index));
        run_checked(self.runner.as_ref(), &invocation).await?;
        Ok(())
    }

    fn register(
        &self,
        ctx: &ReleaseContext,
        job: &ArchJob,
        package: PathBuf,
        index: PathBuf,
    ) -> Result<()> {
        let repo_subpath = job.spec.repo_subpath(&job.native_arch);
        let describe = |kind, name: String, path: PathBuf| {
            Artifact::new(kind, name, path)
                .with_platform(LINUX, job.arch.as_str(), "")
                .with_repo_subpath(repo_subpath.as_str())
                .with_extra(ArtifactExtra::ApkArch(job.native_arch.clone()))
        };

        ctx.artifacts.add_all_unique(vec![
            describe(
                ArtifactKind::ApkPackage,
                job.package_file_name(&ctx.version),
                package,
            ),
            describe(ArtifactKind::ApkIndex, APKINDEX_FILE.to_string(), index),
        ])
    }

    /// Run every planned job under a [`TaskGroup`] bounded by
    /// `ctx.parallelism` and combine their failures.
    pub async fn package(&self, ctx: &ReleaseContext) -> Result<()> {
        let jobs = self.plan(ctx)?;
        let mut group = TaskGroup::new(ctx.parallelism).with_cancellation(ctx.cancel.clone());

        for job in jobs {
            let packager = self.clone();
            let ctx = ctx.clone();
            group
                .spawn(async move { packager.run_job(&ctx, &job).await.into_result() })
                .await;
        }

        group.wait().await
    }
}

async fn copy_executable(from: &Path, to: &Path) -> Result<()> {
    // A previous run leaves read-only copies behind.
    if tokio::fs::try_exists(to).await.unwrap_or(false) {
        tokio::fs::remove_file(to)
            .await
            .map_err(|e| PipelineError::fs("remove", to, e))?;
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| PipelineError::fs("copy binary to", to, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(to, std::fs::Permissions::from_mode(0o555))
            .await
            .map_err(|e| PipelineError::fs("chmod", to, e))?;
    }
    Ok(())
}

/// Run the Alpine stage.
///
/// Skips when no spec is configured. Missing signing keys fail the stage
/// before any directory is created or any tool is started.
pub async fn run(ctx: &ReleaseContext, runner: Arc<dyn ToolRunner>) -> Result<StageOutcome> {
    if ctx.config.alpine.is_empty() {
        return Ok(StageOutcome::Skipped(
            "alpine section is not configured".to_string(),
        ));
    }

    let keys = SigningKeys::from_context(ctx)?;
    ApkPackager::new(keys, runner).package(ctx).await?;
    Ok(StageOutcome::Completed)
}
