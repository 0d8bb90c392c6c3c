use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use credstorm_core::{
    prepare_pending, AttackConfig, AttackEngine, LogSink, ResponseMatcher, StandardThrottle,
    ThrottleMode,
};
use httpmock::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn config(server: &MockServer, state: &Path) -> AttackConfig {
    let mut cfg = AttackConfig {
        url: server.url("/login"),
        payload: "username=^USER^&password=^PASS^".to_string(),
        matcher: ResponseMatcher::Success("Welcome".to_string()),
        throttle_mode: ThrottleMode::NoLimit,
        threads: 4,
        timeout: 5,
        state_dir: Some(state.to_path_buf()),
        ..AttackConfig::default()
    };
    cfg.apply_defaults();
    cfg
}

fn lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn attempts_file(dir: &Path) -> std::path::PathBuf {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().is_some_and(|ext| ext == "attempts"))
        .expect("attempts file missing")
}

#[test]
fn test_finds_the_valid_password_and_resumes() {
    init_logging();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/login").body("username=alice&password=correct");
        then.status(200).body("<h1>Welcome alice</h1>");
    });
    server.mock(|when, then| {
        when.method(POST).path("/login").body("username=alice&password=wrong");
        then.status(200).body("Invalid credentials");
    });

    let state = tempfile::tempdir().unwrap();
    let cfg = config(&server, state.path());
    let users = list(&["alice"]);
    let passwords = list(&["wrong", "correct"]);

    let (store, pending) = prepare_pending(&cfg, &users, &passwords).unwrap();
    assert_eq!(pending.len(), 2);
    let target_dir = store.dir().to_path_buf();

    let stats = AttackEngine::new(cfg.clone(), store, LogSink::new_ref())
        .unwrap()
        .run(pending)
        .unwrap();
    assert_eq!(stats.attempted(), 2);
    assert_eq!(stats.found(), 1);

    assert_eq!(lines(&target_dir.join("found_credentials.txt")), vec!["alice:correct"]);
    assert_eq!(lines(&attempts_file(&target_dir)).len(), 2);

    let (_store, pending) = prepare_pending(&cfg, &users, &passwords).unwrap();
    assert!(pending.is_empty());
}

#[test]
fn test_throttled_pairs_are_retried_then_abandoned() {
    init_logging();
    let server = MockServer::start();
    let login = server.mock(|when, then| {
        when.method(POST).path("/login");
        then.status(429).body("slow down");
    });

    let state = tempfile::tempdir().unwrap();
    let mut cfg = config(&server, state.path());
    cfg.throttle_mode = ThrottleMode::Standard;
    cfg.retry_limit = 2;
    cfg.threads = 2;
    let users = list(&["alice"]);
    let passwords = list(&["one", "two"]);

    let (store, pending) = prepare_pending(&cfg, &users, &passwords).unwrap();
    let target_dir = store.dir().to_path_buf();

    let throttle = Arc::new(StandardThrottle::new(600_000, Duration::from_millis(20)));
    let engine = AttackEngine::new(cfg.clone(), store, LogSink::new_ref())
        .unwrap()
        .with_throttle(throttle.clone());
    let stats = engine.run(pending).unwrap();

    // one original request plus two retries per pair
    login.assert_hits(6);
    assert_eq!(stats.retries(), 4);
    assert_eq!(stats.abandoned(), 2);
    assert_eq!(stats.attempted(), 0);
    assert!(throttle.snapshot().episodes >= 1);

    assert!(lines(&attempts_file(&target_dir)).is_empty());
    let (_store, pending) = prepare_pending(&cfg, &users, &passwords).unwrap();
    assert_eq!(pending.len(), 2);
}

#[test]
fn test_ambiguous_responses_are_not_recorded() {
    init_logging();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/login").body("username=bob&password=a");
        then.status(500).body("internal error");
    });
    server.mock(|when, then| {
        when.method(POST).path("/login").body("username=bob&password=b");
        then.status(200).body("Login failed");
    });

    let state = tempfile::tempdir().unwrap();
    let mut cfg = config(&server, state.path());
    cfg.matcher = ResponseMatcher::Fail("Login failed".to_string());
    let users = list(&["bob"]);
    let passwords = list(&["a", "b"]);

    let (store, pending) = prepare_pending(&cfg, &users, &passwords).unwrap();
    let stats = AttackEngine::new(cfg.clone(), store, LogSink::new_ref())
        .unwrap()
        .run(pending)
        .unwrap();
    assert_eq!(stats.attempted(), 1);
    assert_eq!(stats.errors(), 1);
    assert_eq!(stats.found(), 0);

    let (_store, pending) = prepare_pending(&cfg, &users, &passwords).unwrap();
    assert_eq!(pending, vec![credstorm_core::Attempt::new("bob", "a")]);
}

#[test]
fn test_csrf_protected_login() {
    init_logging();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/login");
        then.status(200)
            .body(r#"<form method="post"><input type="hidden" name="csrf" value="f00d"></form>"#);
    });
    let login = server.mock(|when, then| {
        when.method(POST)
            .path("/login")
            .body("username=admin&password=admin&csrf=f00d");
        then.status(200).body("Welcome admin");
    });
    server.mock(|when, then| {
        when.method(POST).path("/login").body("username=admin&password=guest&csrf=f00d");
        then.status(200).body("nope");
    });

    let state = tempfile::tempdir().unwrap();
    let mut cfg = config(&server, state.path());
    cfg.payload = "username=^USER^&password=^PASS^&csrf=^CSRF^".to_string();
    cfg.csrf_field = Some("csrf".to_string());
    cfg.apply_defaults();

    let (store, pending) = prepare_pending(&cfg, &list(&["admin"]), &list(&["guest", "admin"])).unwrap();
    let target_dir = store.dir().to_path_buf();
    let stats = AttackEngine::new(cfg, store, LogSink::new_ref())
        .unwrap()
        .run(pending)
        .unwrap();

    login.assert();
    assert_eq!(stats.found(), 1);
    assert_eq!(lines(&target_dir.join("found_credentials.txt")), vec!["admin:admin"]);
}
