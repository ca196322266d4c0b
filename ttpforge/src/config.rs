//! Program-config loading and the [`Runtime`] handle shared by every command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ttpforge_core::{Filesystem, OsFilesystem, ProgramConfig, Repo, RepoCollection};

/// Resolved config path plus the loaded document and the filesystem port
/// every command runs against.
pub struct Runtime {
    pub config: ProgramConfig,
    pub config_path: PathBuf,
    pub fs: Arc<dyn Filesystem>,
}

impl Runtime {
    /// Load the program config from `override_path`, or its default
    /// location, creating nothing: a missing file is treated as an empty
    /// config so `ttpforge run <fs-path>` works with no `init` step.
    pub fn load(override_path: Option<PathBuf>) -> Result<Self> {
        let fs: Arc<dyn Filesystem> = Arc::new(OsFilesystem);
        let config_path = override_path
            .or_else(ProgramConfig::default_path)
            .context("could not determine a default config path; pass --config")?;
        let config = if fs.exists(&config_path) {
            let bytes = fs
                .read_file(&config_path)
                .with_context(|| format!("reading config at {}", config_path.display()))?;
            ProgramConfig::from_yaml(&bytes)
                .with_context(|| format!("parsing config at {}", config_path.display()))?
        } else {
            ProgramConfig::default()
        };
        Ok(Self {
            config,
            config_path,
            fs,
        })
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(std::path::Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Write the current config back to `config_path`, creating parent
    /// directories as needed.
    pub fn save(&self) -> Result<()> {
        self.fs
            .write_file(&self.config_path, self.config.to_yaml().as_bytes(), 0o600)
            .with_context(|| format!("writing config to {}", self.config_path.display()))?;
        Ok(())
    }

    /// Build a [`RepoCollection`] by loading every repo the config declares.
    pub fn repo_collection(&self) -> Result<RepoCollection> {
        let config_dir = self.config_dir();
        let mut repos = RepoCollection::new(self.fs.clone());
        for spec in &self.config.repos {
            let repo = Repo::load(spec, &config_dir, self.fs.clone())
                .with_context(|| format!("loading repository `{}`", spec.name))?;
            repos
                .add(repo)
                .with_context(|| format!("registering repository `{}`", spec.name))?;
        }
        Ok(repos)
    }
}
