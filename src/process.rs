//! Supervised project processes (pm2)

use async_trait::async_trait;
use std::path::Path;

use crate::config::Config;
use crate::error::{Result, Step};
use crate::exec::Invocation;

/// Process supervisor collaborator
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Start `name` from `dir`, listening on `port`
    async fn start(&self, name: &str, dir: &Path, port: u16) -> Result<()>;

    /// Restart an already registered process
    async fn restart(&self, name: &str) -> Result<()>;

    /// Stop the process and remove it from the supervisor
    async fn stop(&self, name: &str) -> Result<()>;
}

/// pm2 running `npm start`
#[derive(Debug, Clone)]
pub struct Pm2 {
    program: String,
    npm: String,
}

impl Pm2 {
    pub fn new(program: impl Into<String>, npm: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            npm: npm.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.node.pm2.clone(), config.node.npm.clone())
    }

    pub fn start_invocation(&self, name: &str, dir: &Path, port: u16) -> Invocation {
        Invocation::new(&self.program)
            .args(["start", self.npm.as_str(), "--name", name, "--update-env", "--", "start"])
            .current_dir(dir)
            .env("PORT", port.to_string())
    }

    pub fn restart_invocation(&self, name: &str) -> Invocation {
        Invocation::new(&self.program).args(["restart", name])
    }

    pub fn stop_invocations(&self, name: &str) -> [Invocation; 2] {
        [
            Invocation::new(&self.program).args(["stop", name]),
            Invocation::new(&self.program).args(["delete", name]),
        ]
    }
}

impl Default for Pm2 {
    fn default() -> Self {
        Self::new("pm2", "npm")
    }
}

#[async_trait]
impl Supervisor for Pm2 {
    async fn start(&self, name: &str, dir: &Path, port: u16) -> Result<()> {
        self.start_invocation(name, dir, port).run(Step::Start).await
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.restart_invocation(name).run(Step::Restart).await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        for inv in self.stop_invocations(name) {
            inv.run(Step::Stop).await?;
        }
        Ok(())
    }
}
