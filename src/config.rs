use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the base directory
pub const BASE_DIR_ENV: &str = "BASE_DIR";

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "NODEPLOY_CONFIG";

/// Configuration file looked up inside the base directory
pub const CONFIG_FILE_NAME: &str = "nodeploy.toml";

/// Global configuration, built once at startup and passed to every component
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Directory holding project checkouts, the registry and the proxy config
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Registry file (default: `<base_dir>/projects.json`)
    pub registry_file: Option<PathBuf>,

    /// Rendered reverse-proxy configuration (default: `<base_dir>/nginx.conf`)
    pub proxy_config_file: Option<PathBuf>,

    /// Lowest port handed out to new projects
    #[serde(default = "default_port_floor")]
    pub port_floor: u16,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub certificates: CertificateConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    /// Remote URL template; `{repository}` is replaced with e.g. `user/repo`
    #[serde(default = "default_remote_template")]
    pub remote_template: String,

    /// Depth passed to `git clone --depth` (0 clones full history)
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,

    /// Branch pulled on update
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote_template: default_remote_template(),
            clone_depth: default_clone_depth(),
            branch: default_branch(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    /// Package manager executable
    #[serde(default = "default_npm")]
    pub npm: String,

    /// Process supervisor executable
    #[serde(default = "default_pm2")]
    pub pm2: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            npm: default_npm(),
            pm2: default_pm2(),
        }
    }
}

/// How TLS certificates are obtained
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum IssuerKind {
    /// Run certbot and read the certificates from its live directory (default)
    #[default]
    Certbot,
    /// Generate a self-signed certificate locally (development only)
    SelfSigned,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CertificateConfig {
    #[serde(default)]
    pub issuer: IssuerKind,

    /// Certbot invocation; `{domain}` is replaced with the project domain
    #[serde(default = "default_certbot_command")]
    pub certbot_command: String,

    /// Directory certbot writes `<domain>/fullchain.pem` and `<domain>/privkey.pem` to
    #[serde(default = "default_live_dir")]
    pub live_dir: PathBuf,

    /// Output directory for self-signed certificates (default: `<base_dir>/certs`)
    pub self_signed_dir: Option<PathBuf>,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            issuer: IssuerKind::default(),
            certbot_command: default_certbot_command(),
            live_dir: default_live_dir(),
            self_signed_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Command that makes the reverse proxy re-read its configuration
    #[serde(default = "default_reload_command")]
    pub reload_command: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            reload_command: default_reload_command(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            registry_file: None,
            proxy_config_file: None,
            port_floor: default_port_floor(),
            git: GitConfig::default(),
            node: NodeConfig::default(),
            certificates: CertificateConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs_next::home_dir()
        .map(|home| home.join("pm2-apps"))
        .unwrap_or_else(|| PathBuf::from("./pm2-apps"))
}

fn default_port_floor() -> u16 {
    3000
}

fn default_remote_template() -> String {
    "git@github.com:{repository}.git".to_string()
}

fn default_clone_depth() -> u32 {
    1
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_npm() -> String {
    "npm".to_string()
}

fn default_pm2() -> String {
    "pm2".to_string()
}

fn default_certbot_command() -> String {
    "certbot certonly --nginx --non-interactive -d {domain}".to_string()
}

fn default_live_dir() -> PathBuf {
    PathBuf::from("/etc/letsencrypt/live")
}

fn default_reload_command() -> String {
    "systemctl reload nginx".to_string()
}

impl Config {
    /// Configuration rooted at `base_dir` with every other setting defaulted
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build the process configuration from an explicit file, the base
    /// directory's `nodeploy.toml`, or defaults, with `BASE_DIR` taking
    /// precedence over any file setting.
    pub fn resolve(config_path: Option<PathBuf>, base_dir: Option<PathBuf>) -> Result<Self> {
        let candidate = config_path.or_else(|| {
            let base = base_dir.clone().unwrap_or_else(default_base_dir);
            let path = base.join(CONFIG_FILE_NAME);
            path.is_file().then_some(path)
        });

        let mut config = match candidate {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(base) = base_dir {
            config.base_dir = base;
        }

        config.validate()?;
        Ok(config)
    }

    /// `resolve` driven by `NODEPLOY_CONFIG` and `BASE_DIR`
    pub fn from_env() -> Result<Self> {
        let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let base_dir = std::env::var_os(BASE_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::resolve(config_path, base_dir)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry_file
            .clone()
            .unwrap_or_else(|| self.base_dir.join("projects.json"))
    }

    pub fn proxy_config_path(&self) -> PathBuf {
        self.proxy_config_file
            .clone()
            .unwrap_or_else(|| self.base_dir.join("nginx.conf"))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".projects.lock")
    }

    pub fn self_signed_dir(&self) -> PathBuf {
        self.certificates
            .self_signed_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("certs"))
    }

    /// Checkout directory of a project
    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Validate all configuration
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.base_dir.as_os_str().is_empty() {
            errors.push("base_dir must not be empty".to_string());
        }
        if self.port_floor == 0 {
            errors.push("port_floor must be non-zero".to_string());
        }
        if !self.git.remote_template.contains("{repository}") {
            errors.push("git.remote_template must contain {repository}".to_string());
        }
        if self.git.branch.trim().is_empty() {
            errors.push("git.branch must not be empty".to_string());
        }
        if self.certificates.issuer == IssuerKind::Certbot
            && !self.certificates.certbot_command.contains("{domain}")
        {
            errors.push("certificates.certbot_command must contain {domain}".to_string());
        }
        for (key, command) in [
            ("certificates.certbot_command", &self.certificates.certbot_command),
            ("proxy.reload_command", &self.proxy.reload_command),
        ] {
            match shell_words::split(command) {
                Ok(words) if words.is_empty() => errors.push(format!("{} is empty", key)),
                Ok(_) => {}
                Err(e) => errors.push(format!("{} is not a valid command: {}", key, e)),
            }
        }

        if !errors.is_empty() {
            return Err(Error::Config(format!(
                "Configuration errors:\n  - {}",
                errors.join("\n  - ")
            )));
        }

        Ok(())
    }
}
