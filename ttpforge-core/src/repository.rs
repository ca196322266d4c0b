//! A named on-disk TTP tree (`Repo`) plus the index over all configured
//! repos (`RepoCollection`) that resolves `repo//relpath` references.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::info;

use crate::{
    error::RepositoryErrorKind,
    filesystem::Filesystem,
    repo_config::{RepoConfigFile, RepoSpec},
};

/// A single named repository: a root directory plus the search paths its
/// config declares.
#[derive(Clone)]
pub struct Repo {
    /// Name used on the left of `name//path` references.
    pub name: String,
    /// Absolute root directory.
    pub root: PathBuf,
    /// Directories under `root` searched for TTP files, in order.
    pub ttp_search_paths: Vec<PathBuf>,
    /// Directories under `root` searched for templates, in order.
    pub template_search_paths: Vec<PathBuf>,
    /// Filesystem used for all reads/writes against this repo.
    pub fs: Arc<dyn Filesystem>,
}

impl Repo {
    /// Load a repo from `spec`, reading its `ttpforge-repo-config.yaml`.
    pub fn load(
        spec: &RepoSpec,
        config_dir: &Path,
        fs: Arc<dyn Filesystem>,
    ) -> Result<Self, RepositoryErrorKind> {
        let root = spec.resolved_path(config_dir)?;
        Self::ensure_present(spec, &root, fs.as_ref())?;
        let config_path = root.join(RepoConfigFile::FILE_NAME);
        if !fs.exists(&config_path) {
            return Err(RepositoryErrorKind::NoRepoConfigFound(root));
        }
        let bytes = fs
            .read_file(&config_path)
            .map_err(|e| RepositoryErrorKind::MalformedRepoConfig(config_path.clone(), e.to_string()))?;
        let config = RepoConfigFile::from_yaml(&bytes, &root)?;
        Ok(Self {
            name: spec.name.clone(),
            ttp_search_paths: config
                .ttp_search_paths
                .iter()
                .map(|p| root.join(p))
                .collect(),
            template_search_paths: config
                .template_search_paths
                .iter()
                .map(|p| root.join(p))
                .collect(),
            root,
            fs,
        })
    }

    /// Load an ad-hoc repo rooted at `root`, named after its directory, for
    /// bare filesystem-path references resolved by ascending to a
    /// `ttpforge-repo-config.yaml`.
    pub fn load_adhoc(root: PathBuf, fs: Arc<dyn Filesystem>) -> Result<Self, RepositoryErrorKind> {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        let config_path = root.join(RepoConfigFile::FILE_NAME);
        let bytes = fs
            .read_file(&config_path)
            .map_err(|e| RepositoryErrorKind::MalformedRepoConfig(config_path.clone(), e.to_string()))?;
        let config = RepoConfigFile::from_yaml(&bytes, &root)?;
        Ok(Self {
            name,
            ttp_search_paths: config
                .ttp_search_paths
                .iter()
                .map(|p| root.join(p))
                .collect(),
            template_search_paths: config
                .template_search_paths
                .iter()
                .map(|p| root.join(p))
                .collect(),
            root,
            fs,
        })
    }

    fn ensure_present(
        spec: &RepoSpec,
        root: &Path,
        fs: &dyn Filesystem,
    ) -> Result<(), RepositoryErrorKind> {
        if fs.exists(root) {
            return Ok(());
        }
        let git = spec
            .git
            .as_ref()
            .ok_or_else(|| RepositoryErrorKind::NoSourceConfigured(spec.name.clone()))?;
        let branch = git.branch.as_deref().unwrap_or("main");
        info!("cloning {} into {root:?}", git.url);
        let status = std::process::Command::new("git")
            .args(["clone", "--single-branch", "--branch", branch, &git.url])
            .arg(root)
            .status()
            .map_err(|e| {
                RepositoryErrorKind::GitCloneFailed(git.url.clone(), root.to_path_buf(), e.to_string())
            })?;
        if !status.success() {
            return Err(RepositoryErrorKind::GitCloneFailed(
                git.url.clone(),
                root.to_path_buf(),
                format!("git exited with {status}"),
            ));
        }
        Ok(())
    }

    /// Find a TTP by relpath, searching `ttp_search_paths` in order.
    pub fn find_ttp(&self, relpath: &str) -> Result<PathBuf, RepositoryErrorKind> {
        for search_path in &self.ttp_search_paths {
            let candidate = search_path.join(relpath);
            if self.fs.exists(&candidate) {
                return Ok(candidate);
            }
        }
        Err(RepositoryErrorKind::TtpNotFound(
            relpath.to_string(),
            self.name.clone(),
        ))
    }

    /// Find a template by relpath, searching `template_search_paths` in order.
    pub fn find_template(&self, relpath: &str) -> Result<PathBuf, RepositoryErrorKind> {
        for search_path in &self.template_search_paths {
            let candidate = search_path.join(relpath);
            if self.fs.exists(&candidate) {
                return Ok(candidate);
            }
        }
        Err(RepositoryErrorKind::TemplateNotFound(
            relpath.to_string(),
            self.name.clone(),
        ))
    }

    /// List every `*.yaml` file under the TTP search paths as scoped
    /// `repo//relpath` references, forward-slash form regardless of OS.
    pub fn list_ttps(&self) -> Result<Vec<String>, RepositoryErrorKind> {
        let mut out = Vec::new();
        for search_path in &self.ttp_search_paths {
            if !self.fs.exists(search_path) {
                continue;
            }
            let entries = self
                .fs
                .walk(search_path)
                .map_err(|e| RepositoryErrorKind::MalformedRepoConfig(search_path.clone(), e.to_string()))?;
            for entry in entries {
                if entry.extension().is_some_and(|ext| ext == "yaml" || ext == "yml") {
                    if let Ok(rel) = entry.strip_prefix(search_path) {
                        out.push(format!(
                            "{}//{}",
                            self.name,
                            rel.to_string_lossy().replace('\\', "/")
                        ));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Relativise `abs_path` against this repo's TTP search paths.
    pub fn convert_abs_path_to_abs_ref(&self, abs_path: &Path) -> Result<String, RepositoryErrorKind> {
        for search_path in &self.ttp_search_paths {
            if let Ok(rel) = abs_path.strip_prefix(search_path) {
                return Ok(format!(
                    "{}//{}",
                    self.name,
                    rel.to_string_lossy().replace('\\', "/")
                ));
            }
        }
        Err(RepositoryErrorKind::NotUnderSearchPath(
            abs_path.to_path_buf(),
            self.name.clone(),
        ))
    }
}

/// Ordered index over every configured [`Repo`], by name.
#[derive(Clone, Default)]
pub struct RepoCollection {
    repos: Vec<Repo>,
    by_name: BTreeMap<String, usize>,
    fs: Option<Arc<dyn Filesystem>>,
}

impl RepoCollection {
    /// An empty collection that resolves bare filesystem-path references
    /// using `fs` to ascend for a repo config.
    #[must_use]
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self {
            repos: Vec::new(),
            by_name: BTreeMap::new(),
            fs: Some(fs),
        }
    }

    /// Register `repo`. Errors if its name is already taken.
    pub fn add(&mut self, repo: Repo) -> Result<(), RepositoryErrorKind> {
        if self.by_name.contains_key(&repo.name) {
            return Err(RepositoryErrorKind::DuplicateName(repo.name));
        }
        self.by_name.insert(repo.name.clone(), self.repos.len());
        self.repos.push(repo);
        Ok(())
    }

    /// Look up a repo by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Repo> {
        self.by_name.get(name).map(|&i| &self.repos[i])
    }

    /// Resolve a user-supplied `TtpRef` string to `(repo, absolute path)`.
    pub fn resolve_ref(&self, reference: &str) -> Result<(Repo, PathBuf), RepositoryErrorKind> {
        let parts: Vec<&str> = reference.splitn(3, "//").collect();
        match parts.as_slice() {
            [path] => self.resolve_fs_path(path),
            [repo_name, relpath] => {
                let repo = self
                    .get(repo_name)
                    .ok_or_else(|| RepositoryErrorKind::NotFound((*repo_name).to_string()))?;
                let abs = repo.find_ttp(relpath)?;
                Ok((repo.clone(), abs))
            }
            _ => Err(RepositoryErrorKind::TooManySeparators(reference.to_string())),
        }
    }

    fn resolve_fs_path(&self, raw: &str) -> Result<(Repo, PathBuf), RepositoryErrorKind> {
        let fs = self
            .fs
            .clone()
            .ok_or_else(|| RepositoryErrorKind::PathDoesNotExist(PathBuf::from(raw)))?;
        let path = PathBuf::from(raw);
        if !fs.exists(&path) {
            return Err(RepositoryErrorKind::PathDoesNotExist(path));
        }
        let mut current = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        loop {
            if fs.exists(&current.join(RepoConfigFile::FILE_NAME)) {
                let repo = Repo::load_adhoc(current, fs)?;
                return Ok((repo, path));
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Err(RepositoryErrorKind::NoRepoConfigFound(path)),
            }
        }
    }

    /// List every TTP across all repos, in repo registration order.
    pub fn list_ttps(&self) -> Result<Vec<String>, RepositoryErrorKind> {
        let mut out = Vec::new();
        for repo in &self.repos {
            out.extend(repo.list_ttps()?);
        }
        Ok(out)
    }

    /// All registered repos, in registration order.
    #[must_use]
    pub fn repos(&self) -> &[Repo] {
        &self.repos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::OsFilesystem;

    fn write_repo(root: &Path) {
        std::fs::create_dir_all(root.join("ttps")).unwrap();
        std::fs::write(
            root.join(RepoConfigFile::FILE_NAME),
            "ttp_search_paths: [ttps]\ntemplate_search_paths: []\n",
        )
        .unwrap();
        std::fs::write(root.join("ttps/example.yaml"), "name: example\n").unwrap();
    }

    #[test]
    fn resolve_ref_rejects_too_many_separators() {
        let collection = RepoCollection::new(Arc::new(OsFilesystem));
        let err = collection.resolve_ref("a//b//c").unwrap_err();
        assert!(matches!(err, RepositoryErrorKind::TooManySeparators(_)));
    }

    #[test]
    fn find_ttp_and_list_ttps_use_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path());
        let spec = RepoSpec {
            name: "r".to_string(),
            path: Some(dir.path().to_string_lossy().into_owned()),
            git: None,
        };
        let repo = Repo::load(&spec, Path::new("/"), Arc::new(OsFilesystem)).unwrap();
        assert!(repo.find_ttp("example.yaml").is_ok());
        let listed = repo.list_ttps().unwrap();
        assert_eq!(listed, vec!["r//example.yaml".to_string()]);
    }

    #[test]
    fn convert_abs_path_to_abs_ref_round_trips_with_find_ttp() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path());
        let spec = RepoSpec {
            name: "r".to_string(),
            path: Some(dir.path().to_string_lossy().into_owned()),
            git: None,
        };
        let repo = Repo::load(&spec, Path::new("/"), Arc::new(OsFilesystem)).unwrap();
        let abs = repo.find_ttp("example.yaml").unwrap();
        let ref_str = repo.convert_abs_path_to_abs_ref(&abs).unwrap();
        assert_eq!(ref_str, "r//example.yaml");
    }
}
