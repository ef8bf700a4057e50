//! CLI tests for the siteaudit binary.
//!
//! Every test points `--db` at a fresh temporary directory and runs from
//! there so no config file or database leaks between tests.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// A siteaudit command bound to a temporary workspace.
fn siteaudit(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("siteaudit");
    cmd.current_dir(dir.path())
        .env_remove("SITEAUDIT_CONFIG")
        .env_remove("SITEAUDIT_DB")
        .env("RUST_LOG", "off")
        .arg("--db")
        .arg(dir.path().join("audits.db"));
    cmd
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("worker"))
            .stdout(predicate::str::contains("status"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_database() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Database ready"))
            .stdout(predicate::str::contains("18 checks defined (18 active)"));

        assert!(dir.path().join("audits.db").exists());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir).arg("init").assert().success();
        siteaudit(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("18 checks defined"));
    }
}

// =============================================================================
// Check catalog
// =============================================================================

mod checks {
    use super::*;

    #[test]
    fn test_checks_lists_catalog() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .arg("checks")
            .assert()
            .success()
            .stdout(predicate::str::contains("page_title"))
            .stdout(predicate::str::contains("content_clarity"))
            .stdout(predicate::str::contains("value_proposition"));
    }

    #[test]
    fn test_checks_category_filter() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .args(["checks", "--category", "seo"])
            .assert()
            .success()
            .stdout(predicate::str::contains("meta_description"))
            .stdout(predicate::str::contains("readability").not());
    }

    #[test]
    fn test_checks_unknown_category_fails() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .args(["checks", "--category", "vibes"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("vibes"));
    }

    #[test]
    fn test_disable_then_enable_check() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .args(["checks", "disable", "page_title"])
            .assert()
            .success()
            .stdout(predicate::str::contains("page_title disabled"));

        siteaudit(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("(17 active)"));

        siteaudit(&dir)
            .args(["checks", "enable", "page_title"])
            .assert()
            .success()
            .stdout(predicate::str::contains("page_title enabled"));
    }

    #[test]
    fn test_unknown_check_is_rejected() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .args(["checks", "disable", "no_such_check"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown check: no_such_check"));
    }

    #[test]
    fn test_set_instructions() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .args(["checks", "instructions", "readability", "Aim for grade 8."])
            .assert()
            .success()
            .stdout(predicate::str::contains("Instructions updated for readability"));
    }
}

// =============================================================================
// Audits
// =============================================================================

mod audits {
    use super::*;

    #[test]
    fn test_list_without_audits() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("No audits yet"));
    }

    #[test]
    fn test_status_of_missing_audit_fails() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .args(["status", "99"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Audit 99 not found"));
    }

    #[test]
    fn test_run_rejects_invalid_url() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .args(["run", "not a url"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid URL"));
    }

    #[test]
    fn test_run_rejects_non_http_scheme() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .args(["run", "ftp://files.example.com/"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Only http and https"));
    }

    #[test]
    fn test_checks_and_no_checks_conflict() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .args(["run", "https://example.com", "--checks", "page_title", "--no-checks"])
            .assert()
            .failure();
    }

    #[test]
    fn test_unreachable_site_fails_audit() {
        let dir = TempDir::new().unwrap();
        siteaudit(&dir)
            .args(["run", "http://127.0.0.1:9/", "--no-checks"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Audit 1 created"))
            .stderr(predicate::str::contains("collecting"));

        siteaudit(&dir)
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("failed"));

        siteaudit(&dir)
            .args(["status", "1", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\": \"failed\""))
            .stdout(predicate::str::contains("\"audit_id\": 1"));
    }
}
