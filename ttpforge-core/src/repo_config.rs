//! On-disk configuration: the program-wide config listing repositories,
//! and the per-repository config naming its search paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RepositoryErrorKind;

/// `git: {url, branch?}` sub-block of a [`RepoSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSpec {
    /// Clone URL.
    pub url: String,
    /// Branch to check out; defaults to the remote's default branch.
    #[serde(default)]
    pub branch: Option<String>,
}

/// One entry of the program config's `repos:` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSpec {
    /// Name used in `name//path` references.
    pub name: String,
    /// Path relative to the config file, absolute, or `~`-prefixed.
    #[serde(default)]
    pub path: Option<String>,
    /// Git source, used by `ensure_present` when `path` doesn't yet exist.
    #[serde(default)]
    pub git: Option<GitSpec>,
}

impl RepoSpec {
    /// Resolve `path` against `config_dir`, expanding a leading `~`.
    pub fn resolved_path(&self, config_dir: &Path) -> Result<PathBuf, RepositoryErrorKind> {
        let raw = self
            .path
            .as_deref()
            .ok_or_else(|| RepositoryErrorKind::NoSourceConfigured(self.name.clone()))?;
        Ok(expand_and_join(raw, config_dir))
    }
}

fn expand_and_join(raw: &str, base: &Path) -> PathBuf {
    let expanded = if let Some(rest) = raw.strip_prefix("~/") {
        directories::UserDirs::new()
            .map(|d| d.home_dir().join(rest))
            .unwrap_or_else(|| PathBuf::from(raw))
    } else {
        PathBuf::from(raw)
    };
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

/// The whole `~/.ttpforge/config.yaml` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Configured repositories.
    #[serde(default)]
    pub repos: Vec<RepoSpec>,
}

impl ProgramConfig {
    /// Parse a program config document.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, RepositoryErrorKind> {
        serde_yaml::from_slice(bytes)
            .map_err(|e| RepositoryErrorKind::MalformedProgramConfig(PathBuf::new(), e.to_string()))
    }

    /// Serialize back to YAML for writing to disk.
    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_default()
    }

    /// The default path: `$TTPFORGE_CONFIG`, or else
    /// `<config dir>/ttpforge/config.yaml` via `directories::ProjectDirs`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TTPFORGE_CONFIG") {
            return Some(PathBuf::from(path));
        }
        directories::ProjectDirs::from("", "", "ttpforge")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }
}

/// `<repo-root>/ttpforge-repo-config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoConfigFile {
    /// Directories (relative to the repo root) searched for TTP files.
    #[serde(default)]
    pub ttp_search_paths: Vec<String>,
    /// Directories (relative to the repo root) searched for templates.
    #[serde(default)]
    pub template_search_paths: Vec<String>,
}

impl RepoConfigFile {
    /// File name expected at a repo's root.
    pub const FILE_NAME: &'static str = "ttpforge-repo-config.yaml";

    /// Parse a repo config document.
    pub fn from_yaml(bytes: &[u8], repo_root: &Path) -> Result<Self, RepositoryErrorKind> {
        serde_yaml::from_slice(bytes).map_err(|e| {
            RepositoryErrorKind::MalformedRepoConfig(repo_root.join(Self::FILE_NAME), e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_spec_resolves_relative_path_against_config_dir() {
        let spec = RepoSpec {
            name: "r".to_string(),
            path: Some("repos/r".to_string()),
            git: None,
        };
        let resolved = spec.resolved_path(Path::new("/home/u/.ttpforge")).unwrap();
        assert_eq!(resolved, PathBuf::from("/home/u/.ttpforge/repos/r"));
    }

    #[test]
    fn repo_spec_without_path_or_git_errors() {
        let spec = RepoSpec {
            name: "r".to_string(),
            path: None,
            git: None,
        };
        assert!(spec.resolved_path(Path::new("/x")).is_err());
    }

    #[test]
    fn program_config_round_trips_through_yaml() {
        let cfg = ProgramConfig {
            repos: vec![RepoSpec {
                name: "a".to_string(),
                path: Some("/x".to_string()),
                git: None,
            }],
        };
        let yaml = cfg.to_yaml();
        let parsed = ProgramConfig::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(parsed.repos.len(), 1);
        assert_eq!(parsed.repos[0].name, "a");
    }
}
