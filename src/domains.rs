//! Project domains and TLS certificate issuance
//!
//! Two issuers are provided: [`Certbot`], which runs certbot and reports the
//! paths of its live certificate files, and [`SelfSignedIssuer`], which
//! generates a certificate locally for development setups.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{CertificateConfig, Config, IssuerKind};
use crate::error::{Error, Result, Step};
use crate::exec::Invocation;
use crate::registry::Certificate;

/// Maximum length of a domain name
const MAX_DOMAIN_LEN: usize = 253;

/// Certificate issuance collaborator
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Obtain a certificate for `domain` and return where it was written
    async fn issue(&self, domain: &str) -> Result<Certificate>;
}

/// Issues certificates with certbot
#[derive(Debug, Clone)]
pub struct Certbot {
    command: String,
    live_dir: PathBuf,
}

impl Certbot {
    pub fn new(command: impl Into<String>, live_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            live_dir: live_dir.into(),
        }
    }

    pub fn from_settings(settings: &CertificateConfig) -> Self {
        Self::new(settings.certbot_command.clone(), settings.live_dir.clone())
    }

    pub fn invocation(&self, domain: &str) -> Result<Invocation> {
        Invocation::from_template(&self.command, &[("domain", domain)])
    }

    /// Where certbot keeps the current certificate for `domain`
    pub fn certificate_for(&self, domain: &str) -> Certificate {
        let dir = self.live_dir.join(domain);
        Certificate::new(
            dir.join("fullchain.pem").to_string_lossy(),
            dir.join("privkey.pem").to_string_lossy(),
        )
    }
}

#[async_trait]
impl CertificateIssuer for Certbot {
    async fn issue(&self, domain: &str) -> Result<Certificate> {
        info!(domain, "Requesting certificate with certbot");
        self.invocation(domain)?.run(Step::IssueCertificate).await?;
        Ok(self.certificate_for(domain))
    }
}

/// Generates self-signed certificates (not for production)
#[derive(Debug, Clone)]
pub struct SelfSignedIssuer {
    cert_dir: PathBuf,
}

impl SelfSignedIssuer {
    pub fn new(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
        }
    }

    pub fn cert_path(&self, domain: &str) -> PathBuf {
        self.cert_dir.join(format!("{}.crt", sanitize_domain(domain)))
    }

    pub fn key_path(&self, domain: &str) -> PathBuf {
        self.cert_dir.join(format!("{}.key", sanitize_domain(domain)))
    }

    fn generate(&self, domain: &str) -> std::result::Result<Certificate, String> {
        use rcgen::{generate_simple_self_signed, CertifiedKey};

        std::fs::create_dir_all(&self.cert_dir)
            .map_err(|e| format!("cannot create {}: {}", self.cert_dir.display(), e))?;

        let subject_alt_names = match domain.strip_prefix("*.") {
            Some(base) => vec![domain.to_string(), base.to_string()],
            None => vec![domain.to_string()],
        };

        let CertifiedKey { cert, key_pair } = generate_simple_self_signed(subject_alt_names)
            .map_err(|e| format!("cannot generate certificate: {}", e))?;

        let cert_path = self.cert_path(domain);
        let key_path = self.key_path(domain);

        std::fs::write(&cert_path, cert.pem())
            .map_err(|e| format!("cannot write {}: {}", cert_path.display(), e))?;
        std::fs::write(&key_path, key_pair.serialize_pem())
            .map_err(|e| format!("cannot write {}: {}", key_path.display(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| format!("cannot restrict {}: {}", key_path.display(), e))?;
        }

        Ok(Certificate::new(
            cert_path.to_string_lossy(),
            key_path.to_string_lossy(),
        ))
    }
}

#[async_trait]
impl CertificateIssuer for SelfSignedIssuer {
    async fn issue(&self, domain: &str) -> Result<Certificate> {
        info!(domain, dir = %self.cert_dir.display(), "Generating self-signed certificate");
        let cert = self
            .generate(domain)
            .map_err(|e| Error::collaborator(Step::IssueCertificate, e))?;
        info!(domain, cert = %cert.certificate_path, "Certificate generated");
        Ok(cert)
    }
}

/// The issuer selected in the configuration
pub fn issuer_from_config(config: &Config) -> Box<dyn CertificateIssuer> {
    match config.certificates.issuer {
        IssuerKind::Certbot => Box::new(Certbot::from_settings(&config.certificates)),
        IssuerKind::SelfSigned => Box::new(SelfSignedIssuer::new(config.self_signed_dir())),
    }
}

/// Normalize a domain name (lowercase, trim whitespace) and check it can be
/// used as an nginx `server_name`
pub fn normalize_domain(domain: &str) -> Result<String> {
    let normalized = domain.trim().to_lowercase();
    let invalid = |reason: &str| Error::InvalidDomain {
        domain: domain.to_string(),
        reason: reason.to_string(),
    };

    if normalized.is_empty() {
        return Err(invalid("domain cannot be empty"));
    }

    if normalized.len() > MAX_DOMAIN_LEN {
        return Err(invalid("domain name too long"));
    }

    if !normalized.contains('.') {
        return Err(invalid("domain must contain at least one '.'"));
    }

    let valid_chars = normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '*');
    if !valid_chars {
        return Err(invalid("domain contains invalid characters"));
    }

    // Wildcard must be at the start
    if normalized.contains('*') && !(normalized.starts_with("*.") && normalized.matches('*').count() == 1) {
        return Err(invalid("wildcard (*) must be at the start of the domain"));
    }

    if normalized.starts_with('.') || normalized.ends_with('.') || normalized.contains("..") {
        return Err(invalid("domain has an empty label"));
    }

    Ok(normalized)
}

/// Sanitize domain for use in filenames
fn sanitize_domain(domain: &str) -> String {
    domain.replace('*', "wildcard").replace('.', "_")
}

/// Both certificate files are present on disk
pub fn certificate_files_exist(cert: &Certificate) -> bool {
    Path::new(&cert.certificate_path).is_file() && Path::new(&cert.certificate_key_path).is_file()
}
