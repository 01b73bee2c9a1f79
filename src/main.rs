//! nodeploy - manage Node.js projects served through nginx
//!
//! Usage:
//!   nodeploy create <user/repo> [--name N] [--domain D] [--ssl] [--build]
//!   nodeploy start <name>
//!   nodeploy update <name>
//!   nodeploy set-domain <name> <domain>
//!   nodeploy delete <name> [--yes]
//!   nodeploy list
//!   nodeploy render

use anyhow::{Context, Result};
use nodeploy::config::Config;
use nodeploy::domains::certificate_files_exist;
use nodeploy::lifecycle::{Collaborators, Coordinator, CreateRequest};
use std::env;
use std::io::Write;
use tracing::info;

#[derive(Debug, PartialEq)]
enum Command {
    Create(CreateRequest),
    Start { name: String },
    Update { name: String },
    SetDomain { name: String, domain: String },
    Delete { name: String, yes: bool },
    List,
    Render,
    Help,
    Version,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nodeploy=info".parse().expect("valid log directive")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = parse_command(&args)
        .map_err(|usage| anyhow::anyhow!("{}\n\nRun `nodeploy help` for usage.", usage))?;

    match command {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            print_version();
            return Ok(());
        }
        _ => {}
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        base_dir = %config.base_dir.display(),
        registry = %config.registry_path().display(),
        proxy_config = %config.proxy_config_path().display(),
        "Configuration loaded"
    );

    let coordinator = Coordinator::new(config.clone(), Collaborators::from_config(&config));

    match command {
        Command::Create(request) => {
            let record = coordinator.create(request).await?;
            println!();
            println!("Project {} created on port {}.", record.name, record.port);
            if let Some(domain) = record.domain() {
                let scheme = if record.tls_certificate().is_some() { "https" } else { "http" };
                println!("It will be served at {}://{}", scheme, domain);
            }
            println!("Start it with:");
            println!("  nodeploy start {}", record.name);
        }
        Command::Start { name } => {
            let record = coordinator.start(&name).await?;
            println!("Project {} started on port {}.", record.name, record.port);
        }
        Command::Update { name } => {
            let record = coordinator.update(&name).await?;
            println!("Project {} has been updated and restarted.", record.name);
        }
        Command::SetDomain { name, domain } => {
            let record = coordinator.set_domain(&name, &domain).await?;
            println!(
                "Domain {} has been set for project {}.",
                record.domain().unwrap_or_default(),
                record.name
            );
            if record.ssl_enabled && record.tls_certificate().is_none() {
                println!("TLS is enabled but no certificate is installed yet.");
            }
        }
        Command::Delete { name, yes } => {
            if !yes && !confirm_delete(&name)? {
                println!("Aborted - name did not match");
                return Ok(());
            }
            coordinator.delete(&name).await?;
            println!("Project {} has been deleted.", name);
        }
        Command::List => {
            let records = coordinator.list()?;
            if records.is_empty() {
                println!("No projects yet. Create one with: nodeploy create <user/repo>");
            }
            for record in records {
                let domain = record.domain().unwrap_or("-");
                let tls = match record.tls_certificate() {
                    Some(cert) if certificate_files_exist(cert) => "tls",
                    Some(_) => "tls (certificate files missing)",
                    None if record.ssl_enabled => "tls pending",
                    None => "plain",
                };
                let build = if record.build_on_deploy { ", build" } else { "" };
                println!("  {} ({}) - {} [{}{}]", record.name, record.port, domain, tls, build);
            }
        }
        Command::Render => {
            let records = coordinator.regenerate().await?;
            println!(
                "Wrote {} ({} server blocks) and reloaded the proxy.",
                coordinator.config().proxy_config_path().display(),
                records.iter().filter(|r| r.domain().is_some()).count()
            );
        }
        Command::Help | Command::Version => {}
    }

    Ok(())
}

fn confirm_delete(name: &str) -> Result<bool> {
    println!("Deleting project: {}", name);
    println!();
    println!("This will:");
    println!("  - Stop and remove the pm2 process");
    println!("  - Delete the project directory");
    println!("  - Remove the project from the nginx configuration");
    println!();

    print!("Type the project name to confirm: ");
    std::io::stdout().flush()?;
    let mut confirmation = String::new();
    std::io::stdin().read_line(&mut confirmation)?;

    Ok(confirmation.trim() == name)
}

fn parse_command(args: &[String]) -> std::result::Result<Command, String> {
    let Some(first) = args.first() else {
        return Ok(Command::Help);
    };
    let rest = &args[1..];

    match first.as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "version" | "--version" | "-v" => Ok(Command::Version),
        "create" | "new" => parse_create_command(rest),
        "start" => Ok(Command::Start {
            name: positional(rest, 0, "start <name>")?,
        }),
        "update" | "deploy" => Ok(Command::Update {
            name: positional(rest, 0, "update <name>")?,
        }),
        "set-domain" | "domain" => Ok(Command::SetDomain {
            name: positional(rest, 0, "set-domain <name> <domain>")?,
            domain: positional(rest, 1, "set-domain <name> <domain>")?,
        }),
        "delete" | "rm" | "destroy" => Ok(Command::Delete {
            name: positional(rest, 0, "delete <name> [--yes]")?,
            yes: rest.iter().any(|a| a == "--yes" || a == "-y"),
        }),
        "list" | "ls" => Ok(Command::List),
        "render" | "regenerate" => Ok(Command::Render),
        other => Err(format!("Unknown command: {}", other)),
    }
}

/// The `index`-th argument that is not a flag
fn positional(args: &[String], index: usize, usage: &str) -> std::result::Result<String, String> {
    args.iter()
        .filter(|a| !a.starts_with('-'))
        .nth(index)
        .cloned()
        .ok_or_else(|| format!("Usage: nodeploy {}", usage))
}

fn parse_create_command(args: &[String]) -> std::result::Result<Command, String> {
    const USAGE: &str = "Usage: nodeploy create <user/repo> [--name N] [--domain D] [--ssl] [--build]";

    let mut request = CreateRequest::default();
    let mut repository = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--name" | "-n" => {
                request.name = Some(args.get(i + 1).cloned().ok_or(USAGE)?);
                i += 2;
            }
            "--domain" | "-d" => {
                request.domain = Some(args.get(i + 1).cloned().ok_or(USAGE)?);
                i += 2;
            }
            "--ssl" | "--tls" => {
                request.ssl = true;
                i += 1;
            }
            "--build" | "-b" => {
                request.build = true;
                i += 1;
            }
            flag if flag.starts_with('-') => {
                return Err(format!("Unknown option for create: {}", flag));
            }
            value => {
                if repository.is_some() {
                    return Err(USAGE.to_string());
                }
                repository = Some(value.to_string());
                i += 1;
            }
        }
    }

    request.repository = repository.ok_or(USAGE)?;
    Ok(Command::Create(request))
}

fn print_help() {
    println!(
        r#"
nodeploy - Node.js project manager for pm2 and nginx

USAGE:
    nodeploy <command> [options]

COMMANDS:
    create <user/repo>         Clone, install and register a new project
        --name <name>          Project name (defaults to the repository name)
        --domain <domain>      Domain served by nginx
        --ssl                  Obtain a TLS certificate for the domain
        --build                Run `npm run build` before start/update
    start <name>               Build (if enabled) and start with pm2
    update <name>              Pull, install, build and restart
    set-domain <name> <domain> Change a project's domain
    delete <name> [--yes]      Stop, remove and unregister a project
    list                       List registered projects
    render                     Regenerate nginx.conf and reload nginx

ENVIRONMENT:
    BASE_DIR                   Project directory (default: ~/pm2-apps)
    NODEPLOY_CONFIG            Configuration file (default: $BASE_DIR/nodeploy.toml)
    RUST_LOG                   Log filter (default: nodeploy=info)
"#
    );
}

fn print_version() {
    println!("nodeploy {}", env!("CARGO_PKG_VERSION"));
}
