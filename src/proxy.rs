//! nginx configuration generated from the project registry
//!
//! The whole file is regenerated from the registry on every mutating
//! operation; it is never patched in place. Rendering is a pure function of
//! the records: same input, byte-identical output, in registry order.

use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::error::{Result, Step};
use crate::exec::Invocation;
use crate::registry::{write_atomic, ProjectRecord};

/// Headers forwarded to every upstream, in emission order
const FORWARDED_HEADERS: [(&str, &str); 4] = [
    ("Host", "$host"),
    ("X-Real-IP", "$remote_addr"),
    ("X-Forwarded-For", "$proxy_add_x_forwarded_for"),
    ("X-Forwarded-Proto", "$scheme"),
];

/// TLS listener port used when a project has a certificate
pub const TLS_PORT: u16 = 443;

/// Render one `server` block per record that has a domain.
///
/// Records without a domain are skipped: a block without `server_name`
/// cannot be routed.
pub fn render(records: &[ProjectRecord]) -> String {
    let blocks: Vec<String> = records.iter().filter_map(render_server_block).collect();
    blocks.join("\n")
}

/// The `server` block for one record, or `None` if it has no domain
pub fn render_server_block(record: &ProjectRecord) -> Option<String> {
    let domain = record.domain()?;

    let mut block = format!(
        "server {{\n    listen {port};\n    server_name {domain};\n\n    location / {{\n        proxy_pass http://localhost:{port};\n",
        port = record.port,
        domain = domain,
    );
    for (header, value) in FORWARDED_HEADERS {
        block.push_str(&format!("        proxy_set_header {} {};\n", header, value));
    }
    block.push_str("    }\n");

    if let Some(cert) = record.tls_certificate() {
        block.push_str(&format!(
            "\n    listen {} ssl;\n    ssl_certificate {};\n    ssl_certificate_key {};\n",
            TLS_PORT, cert.certificate_path, cert.certificate_key_path
        ));
    }

    block.push_str("}\n");
    Some(block)
}

/// Render `records` and atomically replace the file at `path`
pub fn write_config(path: &Path, records: &[ProjectRecord]) -> Result<()> {
    let text = render(records);
    write_atomic(path, text.as_bytes())?;

    let served = records.iter().filter(|r| r.domain().is_some()).count();
    info!(path = %path.display(), server_blocks = served, "Proxy configuration written");
    Ok(())
}

/// Tells the running reverse proxy to re-read its configuration
#[async_trait]
pub trait ProxyReloader: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Reloads the proxy by running a configured command
#[derive(Debug, Clone)]
pub struct CommandReloader {
    command: String,
}

impl CommandReloader {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.proxy.reload_command.clone())
    }

    pub fn invocation(&self) -> Result<Invocation> {
        Invocation::from_template(&self.command, &[])
    }
}

#[async_trait]
impl ProxyReloader for CommandReloader {
    async fn reload(&self) -> Result<()> {
        self.invocation()?.run(Step::ReloadProxy).await
    }
}
