//! Where a repository lives and how its files are addressed.

/// A hosted repository, e.g. `github.com/acme/widgets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocator {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl RepoLocator {
    #[must_use]
    pub fn new(host: impl Into<String>, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Shorthand for a repository on `github.com`.
    #[must_use]
    pub fn github(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self::new("github.com", owner, repo)
    }

    /// `https://<host>/<owner>/<repo>/blob/<branch>/<path>`
    #[must_use]
    pub fn blob_url(&self, branch: &str, path: &str) -> String {
        format!(
            "https://{}/{}/{}/blob/{branch}/{path}",
            self.host, self.owner, self.repo
        )
    }

    #[must_use]
    pub fn clone_url(&self) -> String {
        format!("https://{}/{}/{}.git", self.host, self.owner, self.repo)
    }

    /// Index name for this repository: `<owner>-<lowercased repo>` with underscores
    /// replaced by dashes.
    #[must_use]
    pub fn index_name(&self) -> String {
        format!("{}-{}", self.owner, self.repo.to_lowercase()).replace('_', "-")
    }
}

impl std::fmt::Display for RepoLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.owner, self.repo)
    }
}
