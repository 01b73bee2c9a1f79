//! Running external commands as collaborator steps
//!
//! Every collaborator (git, npm, pm2, certbot, the proxy reload) shells out
//! through [`Invocation`]. Commands inherit stdio so the operator sees their
//! output, and are awaited to completion before the next step runs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result, Step};

/// A fully resolved command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Split a configured command template into words and substitute
    /// `{name}` placeholders inside each word. Substitution happens after
    /// splitting, so values never introduce extra arguments.
    pub fn from_template(template: &str, vars: &[(&str, &str)]) -> Result<Self> {
        let words = shell_words::split(template)
            .map_err(|e| Error::Config(format!("invalid command '{}': {}", template, e)))?;

        let mut words = words.into_iter().map(|word| {
            vars.iter().fold(word, |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        });

        let program = words
            .next()
            .ok_or_else(|| Error::Config("empty command".to_string()))?;

        Ok(Self {
            program,
            args: words.collect(),
            cwd: None,
            env: Vec::new(),
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.env
    }

    /// Shell-quoted command line, for logs and error messages
    pub fn command_line(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }

    /// Run to completion, mapping spawn failures and non-zero exits to a
    /// collaborator failure for `step`
    pub async fn run(&self, step: Step) -> Result<()> {
        let command_line = self.command_line();
        info!(step = %step, command = %command_line, "Running");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let status = cmd
            .status()
            .await
            .map_err(|e| Error::collaborator(step, format!("cannot run `{}`: {}", command_line, e)))?;

        if !status.success() {
            return Err(Error::collaborator(
                step,
                format!("`{}` exited with {}", command_line, status),
            ));
        }

        debug!(step = %step, command = %command_line, "Completed");
        Ok(())
    }
}
