use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn wordlist(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}

/// Dry run reports the pending cross product and exits 0 without contacting the target.
#[test]
fn test_dry_run_counts_pending_pairs() {
    let users = wordlist(&["alice", "bob", ""]);
    let passwords = wordlist(&["one", "two", "three"]);
    let state = TempDir::new().unwrap();

    cargo_bin_cmd!("credstorm")
        .args(["-u", "http://127.0.0.1:9/login"])
        .args(["-d", "user=^USER^&pass=^PASS^", "--fail", "Invalid"])
        .arg("-U")
        .arg(users.path())
        .arg("-P")
        .arg(passwords.path())
        .arg("--state-dir")
        .arg(state.path())
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("6 of 6 pair(s) pending"))
        .stdout(predicate::str::contains("[DRY RUN] Would attempt 6 pair(s)"));

    assert!(state.path().join("127.0.0.1").join("found_credentials.txt").exists());
}

/// Repeated wordlist entries count once in the pair total.
#[test]
fn test_dry_run_ignores_duplicate_entries() {
    let users = wordlist(&["alice", "alice", "bob"]);
    let passwords = wordlist(&["x", "y", "x"]);
    let state = TempDir::new().unwrap();

    cargo_bin_cmd!("credstorm")
        .args(["-u", "http://127.0.0.1:9/login"])
        .args(["-d", "user=^USER^&pass=^PASS^", "--fail", "Invalid"])
        .arg("-U")
        .arg(users.path())
        .arg("-P")
        .arg(passwords.path())
        .arg("--state-dir")
        .arg(state.path())
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("4 of 4 pair(s) pending"));
}

/// Missing target URL is a setup error with exit code 1.
#[test]
fn test_missing_url_fails() {
    let users = wordlist(&["alice"]);
    let passwords = wordlist(&["one"]);

    cargo_bin_cmd!("credstorm")
        .args(["-d", "u=^USER^&p=^PASS^", "--success", "Welcome"])
        .arg("-U")
        .arg(users.path())
        .arg("-P")
        .arg(passwords.path())
        .arg("--dry-run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing required target URL"));
}

/// Missing keyword is a setup error with exit code 1.
#[test]
fn test_missing_keyword_fails() {
    let users = wordlist(&["alice"]);
    let passwords = wordlist(&["one"]);

    cargo_bin_cmd!("credstorm")
        .args(["-u", "http://127.0.0.1:9/login", "-d", "u=^USER^&p=^PASS^"])
        .arg("-U")
        .arg(users.path())
        .arg("-P")
        .arg(passwords.path())
        .arg("--dry-run")
        .assert()
        .code(1);
}

/// Unreadable wordlist aborts before any state is created.
#[test]
fn test_unreadable_wordlist_fails() {
    let passwords = wordlist(&["one"]);
    let state = TempDir::new().unwrap();

    cargo_bin_cmd!("credstorm")
        .args(["-u", "http://127.0.0.1:9/login", "-d", "u=^USER^", "--success", "ok"])
        .args(["-U", "/nonexistent/credstorm-users.txt"])
        .arg("-P")
        .arg(passwords.path())
        .arg("--state-dir")
        .arg(state.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read"));

    assert!(!state.path().join("127.0.0.1").exists());
}

/// Success and fail keywords are mutually exclusive.
#[test]
fn test_success_and_fail_conflict() {
    let users = wordlist(&["alice"]);
    let passwords = wordlist(&["one"]);

    cargo_bin_cmd!("credstorm")
        .args(["-u", "http://127.0.0.1:9/login", "-d", "u=^USER^"])
        .args(["--success", "Welcome", "--fail", "Invalid"])
        .arg("-U")
        .arg(users.path())
        .arg("-P")
        .arg(passwords.path())
        .assert()
        .failure();
}
