//! Integration tests for the project lifecycle
//!
//! Drives the coordinator against a temporary base directory with in-memory
//! collaborators that record every call, covering:
//! - Project creation and port assignment
//! - Domain changes and certificate issuance
//! - Deletion ordering and failure handling
//! - Start/update step sequencing
//! - Proxy configuration regeneration

use async_trait::async_trait;
use nodeploy::builder::PackageManager;
use nodeploy::config::Config;
use nodeploy::domains::CertificateIssuer;
use nodeploy::error::{Error, Result, Step};
use nodeploy::git::SourceControl;
use nodeploy::lifecycle::{Collaborators, Coordinator, CreateRequest};
use nodeploy::process::Supervisor;
use nodeploy::proxy::ProxyReloader;
use nodeploy::registry::{Certificate, ProjectRecord, RegistryStore};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Steps that should fail when reached
#[derive(Clone, Default)]
struct Failures(HashSet<&'static str>);

impl Failures {
    fn on(mut self, step: &'static str) -> Self {
        self.0.insert(step);
        self
    }

    fn check(&self, key: &'static str, step: Step) -> Result<()> {
        if self.0.contains(key) {
            return Err(Error::CollaboratorFailure {
                step,
                message: format!("simulated {} failure", key),
            });
        }
        Ok(())
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

struct FakeGit {
    log: CallLog,
    failures: Failures,
}

#[async_trait]
impl SourceControl for FakeGit {
    async fn clone_repo(&self, repository: &str, dest: &Path) -> Result<()> {
        self.log.push(format!("clone {} {}", repository, dir_name(dest)));
        self.failures.check("clone", Step::Clone)?;
        std::fs::create_dir_all(dest).unwrap();
        std::fs::write(dest.join("package.json"), "{}").unwrap();
        Ok(())
    }

    async fn pull(&self, dir: &Path) -> Result<()> {
        self.log.push(format!("pull {}", dir_name(dir)));
        self.failures.check("pull", Step::Pull)
    }
}

struct FakeNpm {
    log: CallLog,
    failures: Failures,
}

#[async_trait]
impl PackageManager for FakeNpm {
    async fn install(&self, dir: &Path) -> Result<()> {
        self.log.push(format!("install {}", dir_name(dir)));
        self.failures.check("install", Step::Install)
    }

    async fn build(&self, dir: &Path) -> Result<()> {
        self.log.push(format!("build {}", dir_name(dir)));
        self.failures.check("build", Step::Build)
    }
}

struct FakePm2 {
    log: CallLog,
    failures: Failures,
}

#[async_trait]
impl Supervisor for FakePm2 {
    async fn start(&self, name: &str, dir: &Path, port: u16) -> Result<()> {
        self.log.push(format!("start {} {} {}", name, dir_name(dir), port));
        self.failures.check("start", Step::Start)
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.log.push(format!("restart {}", name));
        self.failures.check("restart", Step::Restart)
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.log.push(format!("stop {}", name));
        self.failures.check("stop", Step::Stop)
    }
}

struct FakeIssuer {
    log: CallLog,
    failures: Failures,
}

#[async_trait]
impl CertificateIssuer for FakeIssuer {
    async fn issue(&self, domain: &str) -> Result<Certificate> {
        self.log.push(format!("issue {}", domain));
        self.failures.check("issue", Step::IssueCertificate)?;
        Ok(issued_for(domain))
    }
}

struct FakeReloader {
    log: CallLog,
    failures: Failures,
}

#[async_trait]
impl ProxyReloader for FakeReloader {
    async fn reload(&self) -> Result<()> {
        self.log.push("reload".to_string());
        self.failures.check("reload", Step::ReloadProxy)
    }
}

fn issued_for(domain: &str) -> Certificate {
    Certificate::new(
        format!("/etc/letsencrypt/live/{}/fullchain.pem", domain),
        format!("/etc/letsencrypt/live/{}/privkey.pem", domain),
    )
}

struct Harness {
    tmp: TempDir,
    log: CallLog,
}

impl Harness {
    fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
            log: CallLog::default(),
        }
    }

    fn config(&self) -> Config {
        Config::with_base_dir(self.tmp.path())
    }

    fn coordinator(&self) -> Coordinator {
        self.coordinator_with(Failures::default())
    }

    fn coordinator_with(&self, failures: Failures) -> Coordinator {
        let tools = Collaborators {
            source: Box::new(FakeGit {
                log: self.log.clone(),
                failures: failures.clone(),
            }),
            packages: Box::new(FakeNpm {
                log: self.log.clone(),
                failures: failures.clone(),
            }),
            supervisor: Box::new(FakePm2 {
                log: self.log.clone(),
                failures: failures.clone(),
            }),
            certificates: Box::new(FakeIssuer {
                log: self.log.clone(),
                failures: failures.clone(),
            }),
            proxy: Box::new(FakeReloader {
                log: self.log.clone(),
                failures,
            }),
        };
        Coordinator::new(self.config(), tools)
    }

    fn store(&self) -> RegistryStore {
        RegistryStore::from_config(&self.config())
    }

    fn records(&self) -> Vec<ProjectRecord> {
        self.store().load().unwrap()
    }

    fn registry_bytes(&self) -> Option<Vec<u8>> {
        std::fs::read(self.config().registry_path()).ok()
    }

    fn nginx_conf(&self) -> Option<String> {
        std::fs::read_to_string(self.config().proxy_config_path()).ok()
    }

    fn project_dir(&self, name: &str) -> std::path::PathBuf {
        self.config().project_dir(name)
    }
}

// ============================================================================
// Create Tests
// ============================================================================

mod create_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_lowest_free_ports() {
        let h = Harness::new();
        let coordinator = h.coordinator();

        for repo in ["hadi/a", "hadi/b", "hadi/c"] {
            coordinator.create(CreateRequest::new(repo)).await.unwrap();
        }

        let records = h.records();
        let ports: Vec<u16> = records.iter().map(|r| r.port).collect();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(ports, vec![3000, 3001, 3002]);
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_create_reuses_gap_left_by_delete() {
        let h = Harness::new();
        let coordinator = h.coordinator();

        for repo in ["hadi/a", "hadi/b", "hadi/c"] {
            coordinator.create(CreateRequest::new(repo)).await.unwrap();
        }
        coordinator.delete("b").await.unwrap();

        let record = coordinator.create(CreateRequest::new("hadi/d")).await.unwrap();
        assert_eq!(record.port, 3001);

        let ports: HashSet<u16> = h.records().iter().map(|r| r.port).collect();
        assert_eq!(ports.len(), 3);
    }

    #[tokio::test]
    async fn test_create_respects_port_floor() {
        let h = Harness::new();
        let mut config = h.config();
        config.port_floor = 8000;
        let tools = Collaborators {
            source: Box::new(FakeGit { log: h.log.clone(), failures: Failures::default() }),
            packages: Box::new(FakeNpm { log: h.log.clone(), failures: Failures::default() }),
            supervisor: Box::new(FakePm2 { log: h.log.clone(), failures: Failures::default() }),
            certificates: Box::new(FakeIssuer { log: h.log.clone(), failures: Failures::default() }),
            proxy: Box::new(FakeReloader { log: h.log.clone(), failures: Failures::default() }),
        };
        let coordinator = Coordinator::new(config, tools);

        let record = coordinator.create(CreateRequest::new("hadi/a")).await.unwrap();
        assert_eq!(record.port, 8000);
    }

    #[tokio::test]
    async fn test_create_name_override_and_defaults() {
        let h = Harness::new();
        let coordinator = h.coordinator();

        let record = coordinator
            .create(CreateRequest::new("hadi/blog-frontend").name("blog").build(true))
            .await
            .unwrap();

        assert_eq!(record.name, "blog");
        assert!(record.build_on_deploy);
        assert!(!record.ssl_enabled);
        assert!(record.domain.is_none());
        assert!(record.certificate.is_none());
        assert!(h.project_dir("blog").join("package.json").exists());
        assert_eq!(
            h.log.entries(),
            vec!["clone hadi/blog-frontend blog", "install blog", "reload"]
        );
    }

    #[tokio::test]
    async fn test_create_with_domain_renders_block() {
        let h = Harness::new();
        let coordinator = h.coordinator();

        coordinator
            .create(CreateRequest::new("hadi/shop").domain("Shop.Example.com"))
            .await
            .unwrap();

        let records = h.records();
        assert_eq!(records[0].domain.as_deref(), Some("shop.example.com"));

        let conf = h.nginx_conf().unwrap();
        assert!(conf.contains("server_name shop.example.com;"));
        assert!(conf.contains("proxy_pass http://localhost:3000;"));
        assert!(!conf.contains("ssl_certificate"));
    }

    #[tokio::test]
    async fn test_create_with_ssl_issues_before_rendering() {
        let h = Harness::new();
        let coordinator = h.coordinator();

        let record = coordinator
            .create(CreateRequest::new("hadi/shop").domain("shop.example.com").ssl(true))
            .await
            .unwrap();

        assert_eq!(record.certificate, Some(issued_for("shop.example.com")));
        assert_eq!(h.records(), vec![record]);
        assert_eq!(
            h.log.entries(),
            vec![
                "clone hadi/shop shop",
                "install shop",
                "issue shop.example.com",
                "reload"
            ]
        );

        let conf = h.nginx_conf().unwrap();
        assert!(conf.contains("listen 443 ssl;"));
        assert!(conf.contains(
            "ssl_certificate /etc/letsencrypt/live/shop.example.com/fullchain.pem;"
        ));
    }

    #[tokio::test]
    async fn test_create_duplicate_name_changes_nothing() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        coordinator.create(CreateRequest::new("hadi/blog")).await.unwrap();

        let registry_before = h.registry_bytes();
        let conf_before = h.nginx_conf();
        let calls_before = h.log.entries().len();

        let err = coordinator
            .create(CreateRequest::new("someone-else/blog"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DuplicateProject(ref name) if name == "blog"));
        assert_eq!(h.registry_bytes(), registry_before);
        assert_eq!(h.nginx_conf(), conf_before);
        assert_eq!(h.log.entries().len(), calls_before);
    }

    #[tokio::test]
    async fn test_create_existing_directory_is_duplicate() {
        let h = Harness::new();
        std::fs::create_dir_all(h.project_dir("orphan")).unwrap();

        let err = h
            .coordinator()
            .create(CreateRequest::new("hadi/orphan"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DuplicateProject(_)));
        assert_eq!(h.log.count("clone"), 0);
        assert!(h.registry_bytes().is_none());
    }

    #[tokio::test]
    async fn test_rejected_create_leaves_base_dir_untouched() {
        let h = Harness::new();
        std::fs::create_dir_all(h.project_dir("blog")).unwrap();

        let err = h
            .coordinator()
            .create(CreateRequest::new("hadi/blog"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateProject(_)));

        let entries: Vec<_> = std::fs::read_dir(h.tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("blog")]);
    }

    #[tokio::test]
    async fn test_create_ssl_requires_domain() {
        let h = Harness::new();
        let err = h
            .coordinator()
            .create(CreateRequest::new("hadi/blog").ssl(true))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(h.log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_domain() {
        let h = Harness::new();
        let err = h
            .coordinator()
            .create(CreateRequest::new("hadi/blog").domain("localhost"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidDomain { .. }));
        assert!(h.log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_clone_failure_registers_nothing() {
        let h = Harness::new();
        let err = h
            .coordinator_with(Failures::default().on("clone"))
            .create(CreateRequest::new("hadi/blog"))
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(Step::Clone));
        assert!(h.records().is_empty());
        assert!(h.nginx_conf().is_none());
        assert_eq!(h.log.count("install"), 0);
    }

    #[tokio::test]
    async fn test_install_failure_leaves_orphaned_checkout() {
        let h = Harness::new();
        let err = h
            .coordinator_with(Failures::default().on("install"))
            .create(CreateRequest::new("hadi/blog"))
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(Step::Install));
        assert!(h.records().is_empty());
        assert!(h.project_dir("blog").exists());
    }

    #[tokio::test]
    async fn test_certificate_failure_keeps_record_without_certificate() {
        let h = Harness::new();
        let err = h
            .coordinator_with(Failures::default().on("issue"))
            .create(CreateRequest::new("hadi/blog").domain("blog.example.com").ssl(true))
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(Step::IssueCertificate));

        let records = h.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].domain.as_deref(), Some("blog.example.com"));
        assert!(records[0].certificate.is_none());
        assert_eq!(h.log.count("reload"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_creates_get_distinct_ports() {
        let h = Harness::new();
        let first = h.coordinator();
        let second = h.coordinator();

        let (a, b) = tokio::join!(
            first.create(CreateRequest::new("hadi/a")),
            second.create(CreateRequest::new("hadi/b"))
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.port, b.port);
        let records = h.records();
        assert_eq!(records.len(), 2);
        let ports: HashSet<u16> = records.iter().map(|r| r.port).collect();
        assert_eq!(ports, HashSet::from([3000, 3001]));
    }
}

// ============================================================================
// Delete Tests
// ============================================================================

mod delete_tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_unknown_project_changes_nothing() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        coordinator.create(CreateRequest::new("hadi/blog")).await.unwrap();

        let before = h.registry_bytes();
        let err = coordinator.delete("nope").await.unwrap_err();

        assert!(matches!(err, Error::ProjectNotFound(ref name) if name == "nope"));
        assert_eq!(h.registry_bytes(), before);
        assert_eq!(h.log.count("stop"), 0);
    }

    #[tokio::test]
    async fn test_delete_stops_removes_and_unregisters() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        coordinator
            .create(CreateRequest::new("hadi/blog").domain("blog.example.com"))
            .await
            .unwrap();
        coordinator.create(CreateRequest::new("hadi/api")).await.unwrap();

        let removed = coordinator.delete("blog").await.unwrap();

        assert_eq!(removed.name, "blog");
        assert!(!h.project_dir("blog").exists());
        assert!(h.project_dir("api").exists());
        assert_eq!(h.records().iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["api"]);
        assert_eq!(h.nginx_conf().unwrap(), "");

        let entries = h.log.entries();
        let tail: Vec<&str> = entries.iter().rev().take(2).rev().map(String::as_str).collect();
        assert_eq!(tail, vec!["stop blog", "reload"]);
    }

    #[tokio::test]
    async fn test_delete_stop_failure_keeps_registry_and_directory() {
        let h = Harness::new();
        h.coordinator().create(CreateRequest::new("hadi/blog")).await.unwrap();
        let before = h.registry_bytes();

        let err = h
            .coordinator_with(Failures::default().on("stop"))
            .delete("blog")
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(Step::Stop));
        assert_eq!(h.registry_bytes(), before);
        assert!(h.project_dir("blog").exists());
    }

    #[tokio::test]
    async fn test_delete_refuses_names_outside_base_dir() {
        let h = Harness::new();
        std::fs::write(
            h.config().registry_path(),
            r#"[{"name": "../victim", "port": 3000}, {"name": "/etc", "port": 3001}]"#,
        )
        .unwrap();

        for name in ["../victim", "/etc"] {
            let err = h.coordinator().delete(name).await.unwrap_err();
            assert!(matches!(err, Error::CorruptRegistry { .. }), "{}: {}", name, err);
        }
        assert_eq!(h.log.count("stop"), 0);
    }

    #[tokio::test]
    async fn test_delete_with_missing_directory_still_unregisters() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        coordinator.create(CreateRequest::new("hadi/blog")).await.unwrap();
        std::fs::remove_dir_all(h.project_dir("blog")).unwrap();

        coordinator.delete("blog").await.unwrap();
        assert!(h.records().is_empty());
    }
}

// ============================================================================
// Set-Domain Tests
// ============================================================================

mod set_domain_tests {
    use super::*;

    #[tokio::test]
    async fn test_set_domain_replaces_certificate() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        coordinator
            .create(CreateRequest::new("hadi/blog").domain("old.example.com").ssl(true))
            .await
            .unwrap();

        let record = coordinator.set_domain("blog", "new.example.com").await.unwrap();

        assert_eq!(record.domain.as_deref(), Some("new.example.com"));
        assert_eq!(record.certificate, Some(issued_for("new.example.com")));
        assert_eq!(h.records(), vec![record]);

        let conf = h.nginx_conf().unwrap();
        assert!(conf.contains("server_name new.example.com;"));
        assert!(conf.contains("/etc/letsencrypt/live/new.example.com/privkey.pem"));
        assert!(!conf.contains("old.example.com"));
    }

    #[tokio::test]
    async fn test_set_domain_without_tls_skips_issuance() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        coordinator.create(CreateRequest::new("hadi/blog")).await.unwrap();
        assert_eq!(h.nginx_conf().unwrap(), "");

        let record = coordinator.set_domain("blog", "blog.example.com").await.unwrap();

        assert!(record.certificate.is_none());
        assert_eq!(h.log.count("issue"), 0);
        let conf = h.nginx_conf().unwrap();
        assert_eq!(conf.matches("server {").count(), 1);
        assert!(conf.contains("listen 3000;"));
    }

    #[tokio::test]
    async fn test_set_domain_issuance_failure_keeps_domain() {
        let h = Harness::new();
        h.coordinator()
            .create(CreateRequest::new("hadi/blog").domain("old.example.com").ssl(true))
            .await
            .unwrap();

        let err = h
            .coordinator_with(Failures::default().on("issue"))
            .set_domain("blog", "new.example.com")
            .await
            .unwrap_err();
        assert_eq!(err.failed_step(), Some(Step::IssueCertificate));

        let records = h.records();
        assert_eq!(records[0].domain.as_deref(), Some("new.example.com"));
        assert!(records[0].certificate.is_none());

        let conf = h.nginx_conf().unwrap();
        assert!(conf.contains("server_name new.example.com;"));
        assert!(!conf.contains("ssl_certificate"));
    }

    #[tokio::test]
    async fn test_set_domain_errors() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        coordinator.create(CreateRequest::new("hadi/blog")).await.unwrap();

        let err = coordinator.set_domain("ghost", "ghost.example.com").await.unwrap_err();
        assert!(matches!(err, Error::ProjectNotFound(_)));

        let before = h.registry_bytes();
        let err = coordinator.set_domain("blog", "no-dots").await.unwrap_err();
        assert!(matches!(err, Error::InvalidDomain { .. }));
        assert_eq!(h.registry_bytes(), before);
    }
}

// ============================================================================
// Start / Update Tests
// ============================================================================

mod start_update_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_builds_only_when_enabled() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        coordinator
            .create(CreateRequest::new("hadi/web").build(true))
            .await
            .unwrap();
        coordinator.create(CreateRequest::new("hadi/api")).await.unwrap();

        coordinator.start("web").await.unwrap();
        coordinator.start("api").await.unwrap();

        let entries = h.log.entries();
        let tail: Vec<&str> = entries[entries.len() - 3..].iter().map(String::as_str).collect();
        assert_eq!(tail, vec!["build web", "start web web 3000", "start api api 3001"]);
    }

    #[tokio::test]
    async fn test_start_build_failure_skips_start() {
        let h = Harness::new();
        h.coordinator()
            .create(CreateRequest::new("hadi/web").build(true))
            .await
            .unwrap();

        let err = h
            .coordinator_with(Failures::default().on("build"))
            .start("web")
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(Step::Build));
        assert_eq!(h.log.count("start"), 0);
    }

    #[tokio::test]
    async fn test_update_sequence_does_not_touch_registry() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        coordinator
            .create(CreateRequest::new("hadi/web").build(true))
            .await
            .unwrap();
        let before = h.registry_bytes();
        let calls_before = h.log.entries().len();

        coordinator.update("web").await.unwrap();

        let entries = h.log.entries();
        assert_eq!(
            &entries[calls_before..],
            &["pull web", "install web", "build web", "restart web"]
        );
        assert_eq!(h.registry_bytes(), before);
    }

    #[tokio::test]
    async fn test_update_pull_failure_stops_early() {
        let h = Harness::new();
        h.coordinator().create(CreateRequest::new("hadi/web")).await.unwrap();

        let err = h
            .coordinator_with(Failures::default().on("pull"))
            .update("web")
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(Step::Pull));
        assert_eq!(h.log.count("restart"), 0);
    }

    #[tokio::test]
    async fn test_start_unknown_project() {
        let h = Harness::new();
        let err = h.coordinator().start("ghost").await.unwrap_err();
        assert!(matches!(err, Error::ProjectNotFound(_)));
    }
}

// ============================================================================
// Proxy Configuration Tests
// ============================================================================

mod proxy_config_tests {
    use super::*;

    #[tokio::test]
    async fn test_regenerate_from_registry() {
        let h = Harness::new();
        h.store()
            .save(&[
                ProjectRecord::new("a", 3000).with_domain("a.example.com"),
                ProjectRecord::new("b", 3001),
            ])
            .unwrap();
        std::fs::write(h.config().proxy_config_path(), "stale").unwrap();

        h.coordinator().regenerate().await.unwrap();

        let conf = h.nginx_conf().unwrap();
        assert_eq!(conf.matches("server {").count(), 1);
        assert!(conf.contains("    listen 3000;\n"));
        assert!(conf.contains("    server_name a.example.com;\n"));
        assert!(conf.contains("proxy_pass http://localhost:3000;"));
        assert!(!conf.contains("3001"));
        assert_eq!(h.log.entries(), vec!["reload"]);
    }

    #[tokio::test]
    async fn test_regenerate_is_stable() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        coordinator
            .create(CreateRequest::new("hadi/a").domain("a.example.com").ssl(true))
            .await
            .unwrap();
        coordinator
            .create(CreateRequest::new("hadi/b").domain("b.example.com"))
            .await
            .unwrap();

        let first = h.nginx_conf().unwrap();
        coordinator.regenerate().await.unwrap();
        assert_eq!(h.nginx_conf().unwrap(), first);
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_written_config() {
        let h = Harness::new();
        let err = h
            .coordinator_with(Failures::default().on("reload"))
            .create(CreateRequest::new("hadi/a").domain("a.example.com"))
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(Step::ReloadProxy));
        assert_eq!(h.records().len(), 1);
        assert!(h.nginx_conf().unwrap().contains("server_name a.example.com;"));
    }

    #[tokio::test]
    async fn test_corrupt_registry_blocks_operations() {
        let h = Harness::new();
        std::fs::write(h.config().registry_path(), "{ not json").unwrap();

        let err = h
            .coordinator()
            .create(CreateRequest::new("hadi/a"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CorruptRegistry { .. }));
        assert!(h.log.entries().is_empty());
    }
}
