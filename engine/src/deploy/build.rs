//! Build toolchain driver: package manager detection, install, build and output detection

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::deploy::command::run_streaming;
use crate::deploy::logger::DeployLogger;
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Conventional output directories, probed in order
pub const OUTPUT_CANDIDATES: &[&str] = &["dist", "build", "public", ".svelte-kit/output", "out", "_site"];

const FORBIDDEN_CHARS: &[&str] = &["&", "|", ";", ">", "<", "`", "$("];
const ALLOWED_PREFIXES: &[&str] = &["npm ", "yarn ", "pnpm ", "bun ", "npx ", "node "];
const SERVER_KEYWORDS: &[&str] = &[" start", " dev", " serve", " preview", " watch"];

/// JavaScript package manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    Bun,
}

impl PackageManager {
    /// Detect from lockfiles; bun, pnpm, yarn, then npm
    pub async fn detect(root: &Path) -> Self {
        let has = |name: &str| File::new(root.join(name));
        if has("bun.lockb").exists().await || has("bun.lock").exists().await {
            PackageManager::Bun
        } else if has("pnpm-lock.yaml").exists().await {
            PackageManager::Pnpm
        } else if has("yarn.lock").exists().await {
            PackageManager::Yarn
        } else {
            PackageManager::Npm
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Bun => "bun",
        }
    }

    /// Install arguments; dev dependencies are always included
    pub fn install_args(&self, has_lockfile: bool) -> &'static [&'static str] {
        match (self, has_lockfile) {
            (PackageManager::Npm, true) => &["ci", "--include=dev"],
            (PackageManager::Npm, false) => &["install", "--include=dev"],
            (PackageManager::Yarn, true) => &["install", "--frozen-lockfile", "--production=false"],
            (PackageManager::Yarn, false) => &["install", "--production=false"],
            (PackageManager::Pnpm, _) => &["install", "--frozen-lockfile", "--production=false"],
            (PackageManager::Bun, _) => &["install"],
        }
    }

    pub fn build_args(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Yarn | PackageManager::Pnpm => &["build"],
            PackageManager::Npm | PackageManager::Bun => &["run", "build"],
        }
    }

    /// Lockfile whose presence selects the strict install variant
    fn lockfile(&self) -> Option<&'static str> {
        match self {
            PackageManager::Npm => Some("package-lock.json"),
            PackageManager::Yarn => Some("yarn.lock"),
            _ => None,
        }
    }
}

/// Check a tenant-supplied build command before anything runs.
///
/// Blank commands are accepted and mean "auto-detect".
pub fn validate_build_command(command: &str) -> Result<(), String> {
    let command = command.trim();
    if command.is_empty() {
        return Ok(());
    }

    if let Some(c) = FORBIDDEN_CHARS.iter().find(|c| command.contains(*c)) {
        return Err(format!("command contains forbidden character: {}", c));
    }

    if !ALLOWED_PREFIXES.iter().any(|p| command.starts_with(p)) {
        return Err("command must start with npm, yarn, pnpm, bun, npx, or node".to_string());
    }

    if let Some(kw) = SERVER_KEYWORDS.iter().find(|kw| command.contains(*kw)) {
        return Err(format!(
            "command looks like a runtime server (contains '{}'), only build commands are allowed",
            kw.trim()
        ));
    }

    Ok(())
}

/// Directory the build runs in; `subdir` may not leave the checkout
pub fn resolve_build_root(checkout: &Path, subdir: Option<&str>) -> Result<PathBuf, EngineError> {
    let Some(subdir) = subdir.map(|s| s.trim().trim_matches('/')).filter(|s| !s.is_empty()) else {
        return Ok(checkout.to_path_buf());
    };
    let relative = Path::new(subdir);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(EngineError::Validation(format!("invalid git subdirectory: {}", subdir)));
    }
    Ok(checkout.join(relative))
}

/// One build invocation
pub struct BuildRequest<'a> {
    pub root: &'a Path,
    pub env: &'a [(String, String)],

    /// Custom build command
    pub command: Option<&'a str>,

    /// Output directory override, relative to `root`
    pub output_dir: Option<&'a str>,
}

/// Build toolchain trait for testability
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Install and build, returning the absolute output directory
    async fn build(&self, request: &BuildRequest<'_>, logger: &DeployLogger) -> Result<PathBuf, EngineError>;
}

/// Toolchain running the detected package manager as child processes
#[derive(Debug, Clone, Default)]
pub struct BuildDriver;

impl BuildDriver {
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        request: &BuildRequest<'_>,
        program: &str,
        args: &[&str],
        logger: &DeployLogger,
    ) -> Result<(), String> {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(request.root)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let status = run_streaming(command, logger)
            .await
            .map_err(|e| format!("failed to run {}: {}", program, e))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("{} exited with {}", program, status))
        }
    }
}

#[async_trait]
impl Toolchain for BuildDriver {
    async fn build(&self, request: &BuildRequest<'_>, logger: &DeployLogger) -> Result<PathBuf, EngineError> {
        let custom = request.command.map(str::trim).filter(|c| !c.is_empty());
        if let Some(command) = custom {
            validate_build_command(command).map_err(|e| EngineError::Build(format!("invalid build command: {}", e)))?;
        }

        let pm = PackageManager::detect(request.root).await;
        let has_manifest = File::new(request.root.join("package.json")).exists().await;

        if has_manifest {
            let has_lockfile = match pm.lockfile() {
                Some(name) => File::new(request.root.join(name)).exists().await,
                None => true,
            };
            let args = pm.install_args(has_lockfile);
            logger
                .log(format!("Installing dependencies with {} {}...", pm.program(), args.join(" ")))
                .await;
            self.run(request, pm.program(), args, logger)
                .await
                .map_err(|e| EngineError::Build(format!("install failed: {}", e)))?;
        }

        if let Some(command) = custom {
            logger.log(format!("Running custom build command: {}", command)).await;
            self.run(request, "sh", &["-c", command], logger)
                .await
                .map_err(|e| EngineError::Build(format!("build failed: {}", e)))?;
        } else if has_manifest {
            let args = pm.build_args();
            logger
                .log(format!("Building with {} {}...", pm.program(), args.join(" ")))
                .await;
            self.run(request, pm.program(), args, logger)
                .await
                .map_err(|e| EngineError::Build(format!("build failed: {}", e)))?;
        }

        match request.output_dir.map(str::trim).filter(|d| !d.is_empty()) {
            Some(dir) => {
                let path = resolve_build_root(request.root, Some(dir))?;
                if !Dir::new(&path).exists().await {
                    return Err(EngineError::Build(format!("output directory {} not found", dir)));
                }
                Ok(path)
            }
            None => detect_output_dir(request.root, logger).await,
        }
    }
}

/// First conventional output directory, else the root if it holds an `index.html`
pub async fn detect_output_dir(root: &Path, logger: &DeployLogger) -> Result<PathBuf, EngineError> {
    for candidate in OUTPUT_CANDIDATES {
        let path = root.join(candidate);
        if Dir::new(&path).exists().await {
            return Ok(path);
        }
    }

    if File::new(root.join("index.html")).exists().await {
        logger
            .log("No build directory detected, but index.html found. Using root directory.")
            .await;
        return Ok(root.to_path_buf());
    }

    Err(EngineError::Build("could not detect build output directory".to_string()))
}
