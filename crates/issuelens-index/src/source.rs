//! Where repository files come from: a git remote, a local checkout, or memory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use git2::{
    BranchType, Cred, FetchOptions, ObjectType, RemoteCallbacks, Repository, TreeWalkMode,
    TreeWalkResult,
};

use crate::error::{IndexError, Result};

/// Read access to the branches and files of one repository.
pub trait RepositorySource {
    /// Every branch the source can serve, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch list cannot be read.
    fn branches(&self) -> Result<Vec<String>>;

    /// Paths of all regular files on `branch`, `/`-separated and relative to the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch does not exist or its tree cannot be read.
    fn list_files(&self, branch: &str) -> Result<Vec<String>>;

    /// # Errors
    ///
    /// Returns [`IndexError::Read`] if the file cannot be read.
    fn read_file(&self, branch: &str, path: &str) -> Result<Vec<u8>>;
}

fn read_error(branch: &str, path: &str, reason: impl std::fmt::Display) -> IndexError {
    IndexError::Read {
        branch: branch.to_owned(),
        path: path.to_owned(),
        reason: reason.to_string(),
    }
}

/// Username and token for HTTPS basic auth against a git host.
#[derive(Clone)]
pub struct GitCredentials {
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct GitCloneOptions {
    pub credentials: Option<GitCredentials>,
    /// History depth to fetch. `None` fetches full history.
    pub depth: Option<i32>,
}

impl Default for GitCloneOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            depth: Some(1),
        }
    }
}

impl GitCloneOptions {
    fn fetch_options(&self) -> FetchOptions<'static> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(creds) = self.credentials.clone() {
            callbacks.credentials(move |_url, _user, _allowed| {
                Cred::userpass_plaintext(&creds.username, &creds.token)
            });
        }
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(callbacks);
        if let Some(depth) = self.depth {
            fetch.depth(depth);
        }
        fetch
    }
}

/// A git repository read straight from its object database; no working tree is
/// checked out.
pub struct GitSource {
    repo: Repository,
    // Keeps a cloned repository on disk for as long as the source lives.
    _dir: Option<tempfile::TempDir>,
}

impl std::fmt::Debug for GitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitSource")
            .field("path", &self.repo.path())
            .finish_non_exhaustive()
    }
}

impl GitSource {
    /// Bare-clone `url` into a temporary directory and fetch every remote branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the clone or the branch fetch fails.
    pub fn clone_remote(url: &str, options: &GitCloneOptions) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        tracing::info!(url, depth = ?options.depth, "cloning repository");
        let repo = git2::build::RepoBuilder::new()
            .bare(true)
            .fetch_options(options.fetch_options())
            .clone(url, dir.path())?;
        {
            let mut remote = repo.find_remote("origin")?;
            remote.fetch(
                &["+refs/heads/*:refs/remotes/origin/*"],
                Some(&mut options.fetch_options()),
                None,
            )?;
        }
        Ok(Self {
            repo,
            _dir: Some(dir),
        })
    }

    /// Open an existing repository, bare or not.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a git repository.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            repo: Repository::open(path)?,
            _dir: None,
        })
    }

    fn branch_tree(&self, branch: &str) -> Result<git2::Tree<'_>> {
        let reference = self
            .repo
            .find_reference(&format!("refs/remotes/origin/{branch}"))
            .or_else(|_| self.repo.find_reference(&format!("refs/heads/{branch}")))?;
        Ok(reference.peel_to_tree()?)
    }
}

impl RepositorySource for GitSource {
    fn branches(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for entry in self.repo.branches(None)? {
            let (branch, kind) = entry?;
            let Some(name) = branch.name()? else {
                continue;
            };
            let name = match kind {
                BranchType::Local => name,
                BranchType::Remote => match name.strip_prefix("origin/") {
                    Some(n) => n,
                    None => continue,
                },
            };
            if name != "HEAD" {
                names.insert(name.to_owned());
            }
        }
        Ok(names.into_iter().collect())
    }

    fn list_files(&self, branch: &str) -> Result<Vec<String>> {
        let tree = self.branch_tree(branch)?;
        let mut files = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob)
                && let Some(name) = entry.name()
            {
                files.push(format!("{root}{name}"));
            }
            TreeWalkResult::Ok
        })?;
        files.sort();
        Ok(files)
    }

    fn read_file(&self, branch: &str, path: &str) -> Result<Vec<u8>> {
        let tree = self
            .branch_tree(branch)
            .map_err(|e| read_error(branch, path, e))?;
        let blob = tree
            .get_path(Path::new(path))
            .and_then(|entry| entry.to_object(&self.repo))
            .and_then(|object| object.peel_to_blob())
            .map_err(|e| read_error(branch, path, e.message()))?;
        Ok(blob.content().to_vec())
    }
}

/// A directory on disk served as a single branch. Honors `.gitignore` and skips
/// hidden files.
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
    branch: String,
}

impl LocalSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            branch: branch.into(),
        }
    }

    fn check_branch(&self, branch: &str, path: &str) -> Result<()> {
        if branch == self.branch {
            Ok(())
        } else {
            Err(read_error(branch, path, "unknown branch"))
        }
    }
}

impl RepositorySource for LocalSource {
    fn branches(&self) -> Result<Vec<String>> {
        Ok(vec![self.branch.clone()])
    }

    fn list_files(&self, branch: &str) -> Result<Vec<String>> {
        self.check_branch(branch, "")?;
        let mut files: Vec<String> = ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .build()
            .flatten()
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&self.root).ok()?;
                let parts: Vec<_> = rel
                    .components()
                    .map(|c| c.as_os_str().to_str())
                    .collect::<Option<_>>()?;
                Some(parts.join("/"))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn read_file(&self, branch: &str, path: &str) -> Result<Vec<u8>> {
        self.check_branch(branch, path)?;
        std::fs::read(self.root.join(path)).map_err(|e| read_error(branch, path, e))
    }
}

/// Branches and files held in memory. A file stored as `None` fails to read.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    branches: BTreeMap<String, BTreeMap<String, Option<Vec<u8>>>>,
}

impl InMemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(
        mut self,
        branch: &str,
        path: &str,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        self.branches
            .entry(branch.to_owned())
            .or_default()
            .insert(path.to_owned(), Some(content.into()));
        self
    }

    #[must_use]
    pub fn with_unreadable(mut self, branch: &str, path: &str) -> Self {
        self.branches
            .entry(branch.to_owned())
            .or_default()
            .insert(path.to_owned(), None);
        self
    }

    fn files(&self, branch: &str) -> Result<&BTreeMap<String, Option<Vec<u8>>>> {
        self.branches
            .get(branch)
            .ok_or_else(|| read_error(branch, "", "unknown branch"))
    }
}

impl RepositorySource for InMemorySource {
    fn branches(&self) -> Result<Vec<String>> {
        Ok(self.branches.keys().cloned().collect())
    }

    fn list_files(&self, branch: &str) -> Result<Vec<String>> {
        Ok(self.files(branch)?.keys().cloned().collect())
    }

    fn read_file(&self, branch: &str, path: &str) -> Result<Vec<u8>> {
        match self.files(branch)?.get(path) {
            Some(Some(content)) => Ok(content.clone()),
            Some(None) => Err(read_error(branch, path, "unreadable")),
            None => Err(read_error(branch, path, "no such file")),
        }
    }
}
