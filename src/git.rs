//! Fetching and updating project source trees with git

use async_trait::async_trait;
use std::path::Path;

use crate::config::{Config, GitConfig};
use crate::error::{Error, Result, Step};
use crate::exec::Invocation;

/// Version control collaborator
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Populate `dest` with a checkout of `repository` (e.g. `user/repo`)
    async fn clone_repo(&self, repository: &str, dest: &Path) -> Result<()>;

    /// Bring the checkout in `dir` up to date
    async fn pull(&self, dir: &Path) -> Result<()>;
}

/// `git` command-line client
#[derive(Debug, Clone)]
pub struct GitCli {
    config: GitConfig,
}

impl GitCli {
    pub fn new(config: GitConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.git.clone())
    }

    /// Remote URL for a repository identifier
    pub fn remote_url(&self, repository: &str) -> String {
        self.config.remote_template.replace("{repository}", repository)
    }

    pub fn clone_invocation(&self, repository: &str, dest: &Path) -> Invocation {
        let mut inv = Invocation::new("git").arg("clone");
        if self.config.clone_depth > 0 {
            inv = inv.args(["--depth".to_string(), self.config.clone_depth.to_string()]);
        }
        inv.arg(self.remote_url(repository))
            .arg(dest.to_string_lossy().into_owned())
    }

    pub fn pull_invocation(&self, dir: &Path) -> Invocation {
        Invocation::new("git")
            .args(["pull", "origin", self.config.branch.as_str()])
            .current_dir(dir)
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn clone_repo(&self, repository: &str, dest: &Path) -> Result<()> {
        self.clone_invocation(repository, dest).run(Step::Clone).await
    }

    async fn pull(&self, dir: &Path) -> Result<()> {
        self.pull_invocation(dir).run(Step::Pull).await
    }
}

/// Derive a project name from a repository identifier: the last path
/// segment with any `.git` suffix removed.
pub fn project_name_from_repository(repository: &str) -> Result<String> {
    let trimmed = repository.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    let name = last.strip_suffix(".git").unwrap_or(last);

    validate_project_name(name)?;
    Ok(name.to_string())
}

/// Project names become directory names and pm2 process names
pub fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("project name cannot be empty".to_string()));
    }
    if name == "." || name == ".." || name.starts_with('.') {
        return Err(Error::InvalidInput(format!(
            "project name '{}' cannot start with '.'",
            name
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(Error::InvalidInput(format!(
            "project name '{}' may only contain letters, digits, '-', '_' and '.'",
            name
        )));
    }
    Ok(())
}
