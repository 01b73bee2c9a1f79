//! Project lifecycle: create, start, update, set-domain, delete
//!
//! The coordinator owns every mutation of the registry. Each mutating
//! operation holds the registry lock from load to save, runs its
//! collaborator steps strictly in order, and stops at the first failure.
//! Work already done by an earlier step (a cloned directory, a persisted
//! record) is left in place; the registry stays the authority.

use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::builder::{Npm, PackageManager};
use crate::config::Config;
use crate::domains::{issuer_from_config, normalize_domain, CertificateIssuer};
use crate::error::{Error, Result, Step};
use crate::git::{project_name_from_repository, validate_project_name, GitCli, SourceControl};
use crate::ports;
use crate::process::{Pm2, Supervisor};
use crate::proxy::{self, CommandReloader, ProxyReloader};
use crate::registry::{ProjectRecord, RegistryLock, RegistryStore};

/// The external tools a coordinator drives
pub struct Collaborators {
    pub source: Box<dyn SourceControl>,
    pub packages: Box<dyn PackageManager>,
    pub supervisor: Box<dyn Supervisor>,
    pub certificates: Box<dyn CertificateIssuer>,
    pub proxy: Box<dyn ProxyReloader>,
}

impl Collaborators {
    /// git, npm, pm2, the configured certificate issuer and reload command
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: Box::new(GitCli::from_config(config)),
            packages: Box::new(Npm::from_config(config)),
            supervisor: Box::new(Pm2::from_config(config)),
            certificates: issuer_from_config(config),
            proxy: Box::new(CommandReloader::from_config(config)),
        }
    }
}

/// Input for [`Coordinator::create`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    /// Repository identifier, e.g. `user/repo`
    pub repository: String,
    /// Project name; defaults to the repository name
    pub name: Option<String>,
    pub domain: Option<String>,
    pub ssl: bool,
    pub build: bool,
}

impl CreateRequest {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn build(mut self, build: bool) -> Self {
        self.build = build;
        self
    }
}

pub struct Coordinator {
    config: Config,
    store: RegistryStore,
    tools: Collaborators,
}

impl Coordinator {
    pub fn new(config: Config, tools: Collaborators) -> Self {
        let store = RegistryStore::from_config(&config);
        Self {
            config,
            store,
            tools,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    async fn lock(&self) -> Result<RegistryLock> {
        RegistryLock::acquire_async(self.config.lock_path()).await
    }

    fn find<'r>(records: &'r [ProjectRecord], name: &str) -> Result<&'r ProjectRecord> {
        records
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::ProjectNotFound(name.to_string()))
    }

    fn position(records: &[ProjectRecord], name: &str) -> Result<usize> {
        records
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::ProjectNotFound(name.to_string()))
    }

    fn ensure_available(name: &str, dir: &Path, records: &[ProjectRecord]) -> Result<()> {
        if records.iter().any(|r| r.name == name) {
            return Err(Error::DuplicateProject(name.to_string()));
        }
        if dir.exists() {
            warn!(project = %name, path = %dir.display(), "Workspace directory already exists");
            return Err(Error::DuplicateProject(name.to_string()));
        }
        Ok(())
    }

    /// Regenerate the proxy configuration and signal the proxy to reload
    async fn publish(&self, records: &[ProjectRecord]) -> Result<()> {
        proxy::write_config(&self.config.proxy_config_path(), records)?;
        self.tools.proxy.reload().await
    }

    /// All registered projects, in registry order
    pub fn list(&self) -> Result<Vec<ProjectRecord>> {
        self.store.load()
    }

    /// Clone, install and register a new project
    pub async fn create(&self, request: CreateRequest) -> Result<ProjectRecord> {
        let name = match request.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => {
                validate_project_name(name)?;
                name.to_string()
            }
            None => project_name_from_repository(&request.repository)?,
        };

        let domain = request
            .domain
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(normalize_domain)
            .transpose()?;

        if request.ssl && domain.is_none() {
            return Err(Error::InvalidInput(
                "TLS requires a domain; pass one with --domain".to_string(),
            ));
        }

        let project_dir = self.config.project_dir(&name);

        // A rejected create must not leave a lock file or base directory behind
        Self::ensure_available(&name, &project_dir, &self.store.load_if_present()?)?;

        let _lock = self.lock().await?;
        let mut records = self.store.load()?;
        Self::ensure_available(&name, &project_dir, &records)?;

        info!(project = %name, repository = %request.repository, "Cloning repository");
        self.tools
            .source
            .clone_repo(&request.repository, &project_dir)
            .await?;

        info!(project = %name, "Installing dependencies");
        self.tools.packages.install(&project_dir).await?;

        let used: HashSet<u16> = records.iter().map(|r| r.port).collect();
        let port = ports::allocate(&used, self.config.port_floor)?;
        info!(project = %name, port, "Assigned port");

        let mut record = ProjectRecord::new(name.clone(), port)
            .with_ssl(request.ssl)
            .with_build(request.build);
        record.domain = domain;

        records.push(record);
        self.store.save(&records)?;

        if request.ssl {
            let idx = records.len() - 1;
            if let Some(domain) = records[idx].domain.clone() {
                let cert = self.tools.certificates.issue(&domain).await?;
                records[idx].certificate = Some(cert);
                self.store.save(&records)?;
            }
        }

        self.publish(&records).await?;

        let created = records[records.len() - 1].clone();
        info!(project = %created.name, port = created.port, "Project created");
        Ok(created)
    }

    /// Build (if configured) and start a project under the supervisor
    pub async fn start(&self, name: &str) -> Result<ProjectRecord> {
        let records = self.store.load()?;
        let record = Self::find(&records, name)?.clone();
        let dir = self.config.project_dir(&record.name);

        if record.build_on_deploy {
            info!(project = %record.name, "Building project");
            self.tools.packages.build(&dir).await?;
        }

        info!(project = %record.name, port = record.port, "Starting project");
        self.tools
            .supervisor
            .start(&record.name, &dir, record.port)
            .await?;

        Ok(record)
    }

    /// Pull, install, build (if configured) and restart a project
    pub async fn update(&self, name: &str) -> Result<ProjectRecord> {
        let records = self.store.load()?;
        let record = Self::find(&records, name)?.clone();
        let dir = self.config.project_dir(&record.name);

        info!(project = %record.name, "Pulling latest code");
        self.tools.source.pull(&dir).await?;

        info!(project = %record.name, "Installing dependencies");
        self.tools.packages.install(&dir).await?;

        if record.build_on_deploy {
            info!(project = %record.name, "Building project");
            self.tools.packages.build(&dir).await?;
        }

        info!(project = %record.name, "Restarting project");
        self.tools.supervisor.restart(&record.name).await?;

        info!(project = %record.name, "Project updated");
        Ok(record)
    }

    /// Point a project at a new domain, dropping any certificate issued for
    /// the old one, and obtain a new certificate if TLS is enabled
    pub async fn set_domain(&self, name: &str, domain: &str) -> Result<ProjectRecord> {
        let domain = normalize_domain(domain)?;

        let _lock = self.lock().await?;
        let mut records = self.store.load()?;
        let idx = Self::position(&records, name)?;

        if let Some(other) = records
            .iter()
            .find(|r| r.name != name && r.domain() == Some(domain.as_str()))
        {
            warn!(project = %name, other = %other.name, domain = %domain, "Domain already used by another project");
        }

        records[idx].domain = Some(domain.clone());
        records[idx].certificate = None;
        self.store.save(&records)?;
        info!(project = %name, domain = %domain, "Domain set");

        self.publish(&records).await?;

        if records[idx].ssl_enabled {
            let cert = self.tools.certificates.issue(&domain).await?;
            records[idx].certificate = Some(cert);
            self.store.save(&records)?;
            self.publish(&records).await?;
            info!(project = %name, domain = %domain, "Certificate installed");
        }

        Ok(records[idx].clone())
    }

    /// Stop a project, remove its workspace and unregister it.
    ///
    /// The registry is only updated once both the process and the
    /// directory are gone.
    pub async fn delete(&self, name: &str) -> Result<ProjectRecord> {
        let _lock = self.lock().await?;
        let mut records = self.store.load()?;
        let idx = Self::position(&records, name)?;

        info!(project = %name, "Stopping project");
        self.tools.supervisor.stop(name).await?;

        let dir = self.config.project_dir(name);
        self.remove_workspace(&dir).await?;

        let removed = records.remove(idx);
        self.store.save(&records)?;
        self.publish(&records).await?;

        info!(project = %name, "Project deleted");
        Ok(removed)
    }

    async fn remove_workspace(&self, dir: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {
                info!(path = %dir.display(), "Workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %dir.display(), "Workspace directory already absent");
                Ok(())
            }
            Err(e) => Err(Error::collaborator(
                Step::RemoveWorkspace,
                format!("{}: {}", dir.display(), e),
            )),
        }
    }

    /// Rewrite the proxy configuration from the registry and reload
    pub async fn regenerate(&self) -> Result<Vec<ProjectRecord>> {
        let _lock = self.lock().await?;
        let records = self.store.load()?;
        self.publish(&records).await?;
        Ok(records)
    }
}
