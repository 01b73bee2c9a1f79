//! Error types shared by the registry, renderer and lifecycle coordinator

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using nodeploy's Error
pub type Result<T> = std::result::Result<T, Error>;

/// A step performed by an external collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Cloning the project repository
    Clone,
    /// Pulling the latest code into an existing checkout
    Pull,
    /// Installing dependencies
    Install,
    /// Running the project's build script
    Build,
    /// Starting the supervised process
    Start,
    /// Restarting the supervised process
    Restart,
    /// Stopping and unregistering the supervised process
    Stop,
    /// Removing the project's workspace directory
    RemoveWorkspace,
    /// Obtaining a TLS certificate for a domain
    IssueCertificate,
    /// Signalling the reverse proxy to reload its configuration
    ReloadProxy,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Clone => "clone repository",
            Step::Pull => "pull latest code",
            Step::Install => "install dependencies",
            Step::Build => "build project",
            Step::Start => "start process",
            Step::Restart => "restart process",
            Step::Stop => "stop process",
            Step::RemoveWorkspace => "remove workspace directory",
            Step::IssueCertificate => "issue certificate",
            Step::ReloadProxy => "reload reverse proxy",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Project '{0}' already exists")]
    DuplicateProject(String),

    #[error("Project '{0}' not found. Run `nodeploy list` to see all projects.")]
    ProjectNotFound(String),

    #[error("Registry {} is corrupt: {reason}", path.display())]
    CorruptRegistry { path: PathBuf, reason: String },

    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free port at or above {0}")]
    PortExhaustion(u16),

    #[error("Failed to {step}: {message}")]
    CollaboratorFailure { step: Step, message: String },

    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Persistence {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Error::CorruptRegistry {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn collaborator(step: Step, message: impl fmt::Display) -> Self {
        Error::CollaboratorFailure {
            step,
            message: message.to_string(),
        }
    }

    /// The collaborator step that failed, if this is a collaborator failure
    pub fn failed_step(&self) -> Option<Step> {
        match self {
            Error::CollaboratorFailure { step, .. } => Some(*step),
            _ => None,
        }
    }
}
