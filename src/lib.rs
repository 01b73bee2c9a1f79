//! nodeploy - provision and serve small Node.js projects behind nginx
//!
//! This library provides:
//! - A persistent registry of projects (name, port, domain, TLS certificate)
//! - Lowest-free port assignment for new projects
//! - Deterministic nginx configuration rendered from the registry
//! - A lifecycle coordinator driving git, npm, pm2, certbot and nginx reloads

pub mod builder;
pub mod config;
pub mod domains;
pub mod error;
pub mod exec;
pub mod git;
pub mod lifecycle;
pub mod ports;
pub mod process;
pub mod proxy;
pub mod registry;
