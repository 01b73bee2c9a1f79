//! Dependency installation and build steps

use async_trait::async_trait;
use std::path::Path;

use crate::config::Config;
use crate::error::{Result, Step};
use crate::exec::Invocation;

/// Package manager collaborator
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Install the dependencies of the project in `dir`
    async fn install(&self, dir: &Path) -> Result<()>;

    /// Run the project's build script
    async fn build(&self, dir: &Path) -> Result<()>;
}

/// npm, run from the project directory
#[derive(Debug, Clone)]
pub struct Npm {
    program: String,
}

impl Npm {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.node.npm.clone())
    }

    pub fn install_invocation(&self, dir: &Path) -> Invocation {
        Invocation::new(&self.program).arg("install").current_dir(dir)
    }

    pub fn build_invocation(&self, dir: &Path) -> Invocation {
        Invocation::new(&self.program)
            .args(["run", "build"])
            .current_dir(dir)
    }
}

impl Default for Npm {
    fn default() -> Self {
        Self::new("npm")
    }
}

#[async_trait]
impl PackageManager for Npm {
    async fn install(&self, dir: &Path) -> Result<()> {
        self.install_invocation(dir).run(Step::Install).await
    }

    async fn build(&self, dir: &Path) -> Result<()> {
        self.build_invocation(dir).run(Step::Build).await
    }
}
