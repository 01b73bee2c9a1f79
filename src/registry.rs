//! Persistent project registry
//!
//! The registry is a JSON list of [`ProjectRecord`]s stored in the base
//! directory. It is read in full at the start of every operation and
//! replaced in full (temp file + rename) at the end of every mutating one.
//! Records written by older versions of the tool (`buildOption: "yes"`,
//! `ssl: "no"`, `certbot: {}`) are normalized on load and written back in
//! the canonical form.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::domains::normalize_domain;
use crate::error::{Error, Result};
use crate::git::validate_project_name;

/// TLS certificate/key pair issued for a project's current domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub certificate_path: String,
    pub certificate_key_path: String,
}

impl Certificate {
    pub fn new(certificate_path: impl Into<String>, certificate_key_path: impl Into<String>) -> Self {
        Self {
            certificate_path: certificate_path.into(),
            certificate_key_path: certificate_key_path.into(),
        }
    }

    /// Both paths are present
    pub fn is_complete(&self) -> bool {
        !self.certificate_path.is_empty() && !self.certificate_key_path.is_empty()
    }
}

/// One managed project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub name: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub ssl_enabled: bool,
    pub build_on_deploy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
}

impl ProjectRecord {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            domain: None,
            ssl_enabled: false,
            build_on_deploy: false,
            certificate: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_ssl(mut self, enabled: bool) -> Self {
        self.ssl_enabled = enabled;
        self
    }

    pub fn with_build(mut self, enabled: bool) -> Self {
        self.build_on_deploy = enabled;
        self
    }

    pub fn with_certificate(mut self, certificate: Certificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// The domain, if one is set and non-empty
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref().filter(|d| !d.trim().is_empty())
    }

    /// The certificate to serve, if both a domain and complete paths are set
    pub fn tls_certificate(&self) -> Option<&Certificate> {
        self.domain()?;
        self.certificate.as_ref().filter(|c| c.is_complete())
    }
}

/// Boolean flag that older registries stored as `"yes"`/`"no"`
#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn into_bool(self, field: &str) -> std::result::Result<bool, String> {
        match self {
            Flag::Bool(b) => Ok(b),
            Flag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" | "1" => Ok(true),
                "no" | "n" | "false" | "0" | "" => Ok(false),
                other => Err(format!("field '{}' has unrecognized value '{}'", field, other)),
            },
        }
    }
}

#[derive(Deserialize)]
struct StoredCertificate {
    #[serde(default)]
    certificate_path: Option<String>,
    #[serde(default)]
    certificate_key_path: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    name: String,
    port: u16,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default, alias = "ssl")]
    ssl_enabled: Option<Flag>,
    #[serde(default, alias = "buildOption")]
    build_on_deploy: Option<Flag>,
    #[serde(default, alias = "certbot")]
    certificate: Option<StoredCertificate>,
}

impl TryFrom<StoredRecord> for ProjectRecord {
    type Error = String;

    fn try_from(stored: StoredRecord) -> std::result::Result<Self, String> {
        let context = |e: String| format!("project '{}': {}", stored.name, e);

        let ssl_enabled = match stored.ssl_enabled {
            Some(flag) => flag.into_bool("sslEnabled").map_err(context)?,
            None => false,
        };
        let build_on_deploy = match stored.build_on_deploy {
            Some(flag) => flag.into_bool("buildOnDeploy").map_err(context)?,
            None => false,
        };

        let domain = match stored.domain.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(domain) => Some(normalize_domain(domain).map_err(|e| context(e.to_string()))?),
        };

        let certificate = match stored.certificate {
            None => None,
            Some(cert) => {
                let path = cert.certificate_path.filter(|p| !p.is_empty());
                let key = cert.certificate_key_path.filter(|p| !p.is_empty());
                match (path, key) {
                    (None, None) => None,
                    (Some(path), Some(key)) => Some(Certificate::new(path, key)),
                    _ => {
                        return Err(context(
                            "certificate has only one of certificate_path/certificate_key_path"
                                .to_string(),
                        ))
                    }
                }
            }
        };

        Ok(ProjectRecord {
            name: stored.name,
            port: stored.port,
            domain,
            ssl_enabled,
            build_on_deploy,
            certificate,
        })
    }
}

/// Check the registry-wide invariants: valid unique names, unique ports,
/// domains in normalized form and complete certificates only alongside a
/// domain. Anything accepted here loads back unchanged.
pub fn check_invariants(records: &[ProjectRecord]) -> std::result::Result<(), String> {
    let mut names = HashSet::new();
    let mut ports = HashSet::new();

    for record in records {
        if let Err(Error::InvalidInput(reason)) = validate_project_name(&record.name) {
            return Err(reason);
        }
        if !names.insert(record.name.as_str()) {
            return Err(format!("duplicate project name '{}'", record.name));
        }
        if !ports.insert(record.port) {
            return Err(format!(
                "port {} assigned to more than one project (second: '{}')",
                record.port, record.name
            ));
        }
        if let Some(domain) = record.domain.as_deref() {
            let normalized = normalize_domain(domain)
                .map_err(|e| format!("project '{}': {}", record.name, e))?;
            if normalized != domain {
                return Err(format!(
                    "project '{}': domain '{}' is not normalized (expected '{}')",
                    record.name, domain, normalized
                ));
            }
        }
        if let Some(cert) = &record.certificate {
            if record.domain.is_none() {
                return Err(format!(
                    "project '{}' has a certificate but no domain",
                    record.name
                ));
            }
            if !cert.is_complete() {
                return Err(format!(
                    "project '{}': certificate is missing certificate_path or certificate_key_path",
                    record.name
                ));
            }
        }
    }

    Ok(())
}

/// File-backed registry of project records
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.registry_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the storage directory if it does not exist yet
    pub fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
        }
        Ok(())
    }

    /// Read every record, or an empty list if the registry does not exist
    pub fn load(&self) -> Result<Vec<ProjectRecord>> {
        self.ensure_dir()?;
        self.load_if_present()
    }

    /// Like [`load`](Self::load), but never creates the storage directory
    pub fn load_if_present(&self) -> Result<Vec<ProjectRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Registry file not found, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::persistence(&self.path, e)),
        };

        let stored: Vec<StoredRecord> =
            serde_json::from_str(&content).map_err(|e| Error::corrupt(&self.path, e))?;

        let records = stored
            .into_iter()
            .map(ProjectRecord::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::corrupt(&self.path, e))?;

        check_invariants(&records).map_err(|e| Error::corrupt(&self.path, e))?;

        debug!(path = %self.path.display(), count = records.len(), "Registry loaded");
        Ok(records)
    }

    /// Replace the persisted registry with `records`
    pub fn save(&self, records: &[ProjectRecord]) -> Result<()> {
        check_invariants(records).map_err(Error::InvalidInput)?;
        self.ensure_dir()?;

        let mut content = serde_json::to_string_pretty(records)
            .map_err(|e| Error::InvalidInput(format!("cannot serialize registry: {}", e)))?;
        content.push('\n');

        write_atomic(&self.path, content.as_bytes())?;

        info!(path = %self.path.display(), count = records.len(), "Registry saved");
        Ok(())
    }
}

/// Write `contents` to a temporary file next to `path` and rename it into
/// place. On failure the previous file is left untouched.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir,
        None => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::persistence(path, e))?;
    tmp.write_all(contents)
        .map_err(|e| Error::persistence(path, e))?;

    // NamedTempFile is created 0600; keep the replaced file's mode instead
    let permissions = replacement_permissions(path, tmp.as_file())
        .map_err(|e| Error::persistence(path, e))?;
    tmp.as_file()
        .set_permissions(permissions)
        .map_err(|e| Error::persistence(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| Error::persistence(path, e.error))?;

    Ok(())
}

/// Permissions for a file about to replace `path`: those of the existing
/// file, or 0644 for a new one
fn replacement_permissions(path: &Path, _tmp: &File) -> std::io::Result<std::fs::Permissions> {
    if let Ok(meta) = std::fs::metadata(path) {
        return Ok(meta.permissions());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Ok(std::fs::Permissions::from_mode(0o644))
    }

    #[cfg(not(unix))]
    {
        _tmp.metadata().map(|meta| meta.permissions())
    }
}

/// Exclusive advisory lock on the registry, held for a whole
/// load-mutate-save span and released when dropped
#[derive(Debug)]
pub struct RegistryLock {
    _file: File,
}

impl RegistryLock {
    /// Block until the lock at `path` is acquired
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::persistence(path, e))?;

        lock_exclusive(&file).map_err(|e| Error::persistence(path, e))?;

        debug!(path = %path.display(), "Registry lock acquired");
        Ok(Self { _file: file })
    }

    /// Acquire the lock on a blocking thread so the runtime is not stalled
    pub async fn acquire_async(path: PathBuf) -> Result<Self> {
        let lock_path = path.clone();
        tokio::task::spawn_blocking(move || Self::acquire(&lock_path))
            .await
            .map_err(|e| {
                Error::persistence(
                    path,
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                )
            })?
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if result == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    tracing::warn!("Registry locking is not supported on this platform; concurrent runs are not serialized");
    Ok(())
}
