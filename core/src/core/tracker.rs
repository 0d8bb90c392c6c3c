//! Append-only pair stores that make a run resumable.
//!
//! Each store keeps an in-memory set for membership tests and a single writer
//! thread that appends one record per line. `mark` only queues the record, so
//! workers never wait on disk I/O; `close` drains the queue before returning.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};

use super::Attempt;
use crate::utils::{list_digest, sha256_hex};
use crate::AttackConfig;

const WRITE_QUEUE_CAPACITY: usize = 100;
const STATE_ROOT: &str = ".credstorm";
const FOUND_FILE: &str = "found_credentials.txt";

/// How a pair is written to the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// Hex SHA-256 of `user:pass`; used for the attempted-pairs store.
    Hashed,
    /// Readable `user:pass`; used for the found-credentials store.
    Plain,
}

impl RecordFormat {
    pub fn record(&self, attempt: &Attempt) -> String {
        match self {
            RecordFormat::Hashed => sha256_hex(&attempt.key()),
            RecordFormat::Plain => attempt.key(),
        }
    }
}

pub struct PairStore {
    path: PathBuf,
    format: RecordFormat,
    seen: RwLock<HashSet<String>>,
    queue: Mutex<Option<Sender<String>>>,
    writer: Mutex<Option<JoinHandle<io::Result<u64>>>>,
}

impl PairStore {
    /// Loads every existing record, then starts the writer on the same file.
    pub fn open(path: impl Into<PathBuf>, format: RecordFormat) -> anyhow::Result<Self> {
        let path = path.into();
        let seen = load_records(&path)
            .with_context(|| format!("failed to load records from {}", path.display()))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {} for appending", path.display()))?;

        let (tx, rx) = bounded(WRITE_QUEUE_CAPACITY);
        let writer = thread::Builder::new()
            .name("store-writer".to_string())
            .spawn(move || write_records(file, rx))
            .context("failed to spawn store writer")?;

        debug!("opened {} with {} record(s)", path.display(), seen.len());

        Ok(Self {
            path,
            format,
            seen: RwLock::new(seen),
            queue: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn has_seen(&self, attempt: &Attempt) -> bool {
        let record = self.format.record(attempt);
        self.seen.read().unwrap_or_else(|e| e.into_inner()).contains(&record)
    }

    /// Records the pair. Only the first mark of a pair reaches the file.
    pub fn mark(&self, attempt: &Attempt) {
        let record = self.format.record(attempt);
        {
            let mut seen = self.seen.write().unwrap_or_else(|e| e.into_inner());
            if !seen.insert(record.clone()) {
                return;
            }
        }

        let tx = self.queue.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match tx {
            Some(tx) => {
                if tx.send(record).is_err() {
                    warn!("writer for {} stopped; record for {} not persisted", self.path.display(), attempt.username);
                }
            }
            None => warn!("{} already closed; record for {} not persisted", self.path.display(), attempt.username),
        }
    }

    /// Closes the queue and waits until every pending record is on disk.
    /// Safe to call more than once.
    pub fn close(&self) -> anyhow::Result<()> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).take();

        let handle = self.writer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let written = handle
                .join()
                .map_err(|_| anyhow!("writer for {} panicked", self.path.display()))?
                .with_context(|| format!("failed writing {}", self.path.display()))?;
            debug!("closed {} after appending {} record(s)", self.path.display(), written);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PairStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{:#}", e);
        }
    }
}

fn load_records(path: &Path) -> io::Result<HashSet<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e),
    };
    let mut seen = HashSet::new();
    for line in io::BufReader::new(file).lines() {
        let line = line?;
        if !line.is_empty() {
            seen.insert(line);
        }
    }
    Ok(seen)
}

fn write_records(file: File, rx: Receiver<String>) -> io::Result<u64> {
    let mut out = LineWriter::new(file);
    let mut written = 0;
    for record in rx.iter() {
        writeln!(out, "{}", record)?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

/// The attempted-pairs and found-credentials stores of one target.
pub struct SessionStore {
    pub attempts: PairStore,
    pub found: PairStore,
    dir: PathBuf,
}

impl SessionStore {
    /// Opens both stores under `dir`. The attempts file name is derived from the
    /// two wordlists so each list pair resumes independently.
    pub fn open(dir: impl Into<PathBuf>, users: &[String], passwords: &[String]) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create state directory {}", dir.display()))?;

        let attempts = PairStore::open(dir.join(attempts_file_name(users, passwords)), RecordFormat::Hashed)?;
        let found = PairStore::open(dir.join(FOUND_FILE), RecordFormat::Plain)?;

        Ok(Self { attempts, found, dir })
    }

    /// `<state root>/<target host>`, the root defaulting to `~/.credstorm`.
    pub fn dir_for(config: &AttackConfig) -> anyhow::Result<PathBuf> {
        let root = match config.state_dir {
            Some(ref dir) => dir.clone(),
            None => dirs::home_dir()
                .ok_or_else(|| anyhow!("cannot determine home directory; pass a state directory"))?
                .join(STATE_ROOT),
        };
        Ok(root.join(config.target_domain()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn close(&self) -> anyhow::Result<()> {
        self.attempts.close()?;
        self.found.close()
    }
}

pub fn attempts_file_name(users: &[String], passwords: &[String]) -> String {
    format!("{}_{}.attempts", list_digest(users), list_digest(passwords))
}

/// Cross product of the wordlists minus every pair already recorded.
/// Duplicate wordlist entries collapse to one pair.
pub fn filter_unseen(store: &PairStore, users: &[String], passwords: &[String]) -> Vec<Attempt> {
    let users = unique(users);
    let passwords = unique(passwords);

    let mut pending = Vec::new();
    for user in &users {
        for pass in &passwords {
            let attempt = Attempt::new(*user, *pass);
            if !store.has_seen(&attempt) {
                pending.push(attempt);
            }
        }
    }
    pending
}

fn unique(list: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    list.iter()
        .map(String::as_str)
        .filter(|s| seen.insert(*s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mark_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pairs.attempts");
        let a = Attempt::new("alice", "hunter2");

        let store = PairStore::open(&path, RecordFormat::Hashed).unwrap();
        assert!(!store.has_seen(&a));
        store.mark(&a);
        assert!(store.has_seen(&a));
        store.close().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n", sha256_hex("alice:hunter2")));

        let reopened = PairStore::open(&path, RecordFormat::Hashed).unwrap();
        assert!(reopened.has_seen(&a));
        assert!(!reopened.has_seen(&Attempt::new("alice", "other")));
    }

    #[test]
    fn test_plain_format_and_no_duplicate_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("found.txt");
        let store = PairStore::open(&path, RecordFormat::Plain).unwrap();
        let a = Attempt::new("alice", "correct");
        store.mark(&a);
        store.mark(&a);
        store.close().unwrap();
        store.close().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "alice:correct\n");
    }

    #[test]
    fn test_concurrent_marks_are_all_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pairs.attempts");
        let store = Arc::new(PairStore::open(&path, RecordFormat::Plain).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..250 {
                        store.mark(&Attempt::new(format!("user{}", t), format!("pass{}", i)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        store.close().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: HashSet<&str> = content.lines().collect();
        assert_eq!(content.lines().count(), 2000);
        assert_eq!(lines.len(), 2000);
        assert!(lines.iter().all(|l| l.starts_with("user") && l.contains(":pass")));
    }

    #[test]
    fn test_mark_after_close_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("found.txt");
        let store = PairStore::open(&path, RecordFormat::Plain).unwrap();
        store.close().unwrap();
        store.mark(&Attempt::new("late", "pair"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_filter_unseen_excludes_recorded_pairs() {
        let dir = TempDir::new().unwrap();
        let users = strings(&["alice", "bob", "carol"]);
        let passwords = strings(&["one", "two"]);

        let session = SessionStore::open(dir.path(), &users, &passwords).unwrap();
        session.attempts.mark(&Attempt::new("alice", "two"));
        session.attempts.mark(&Attempt::new("carol", "one"));
        session.attempts.mark(&Attempt::new("mallory", "one"));
        session.close().unwrap();

        let session = SessionStore::open(dir.path(), &users, &passwords).unwrap();
        let pending = filter_unseen(&session.attempts, &users, &passwords);

        assert_eq!(pending.len(), 3 * 2 - 2);
        assert!(!pending.contains(&Attempt::new("alice", "two")));
        assert!(!pending.contains(&Attempt::new("carol", "one")));
        for expected in [("alice", "one"), ("bob", "one"), ("bob", "two"), ("carol", "two")] {
            assert_eq!(
                pending.iter().filter(|a| **a == Attempt::new(expected.0, expected.1)).count(),
                1
            );
        }
    }

    #[test]
    fn test_filter_unseen_collapses_duplicate_entries() {
        let dir = TempDir::new().unwrap();
        let store = PairStore::open(dir.path().join("a"), RecordFormat::Hashed).unwrap();
        let pending = filter_unseen(&store, &strings(&["alice", "alice"]), &strings(&["x", "y", "x"]));
        assert_eq!(pending, vec![Attempt::new("alice", "x"), Attempt::new("alice", "y")]);
    }

    #[test]
    fn test_attempts_file_depends_on_wordlists() {
        let dir = TempDir::new().unwrap();
        let users = strings(&["alice"]);
        let a = SessionStore::open(dir.path(), &users, &strings(&["one"])).unwrap();
        let b = SessionStore::open(dir.path(), &users, &strings(&["two"])).unwrap();
        assert_ne!(a.attempts.path(), b.attempts.path());
        assert_eq!(a.found.path(), b.found.path());
        assert!(a.attempts.path().to_string_lossy().ends_with(".attempts"));
    }

    #[test]
    fn test_dir_for_uses_state_root_and_host() {
        let config = AttackConfig {
            url: "http://lab.local:8080/login".to_string(),
            state_dir: Some(PathBuf::from("/tmp/cs-state")),
            ..AttackConfig::default()
        };
        assert_eq!(
            SessionStore::dir_for(&config).unwrap(),
            PathBuf::from("/tmp/cs-state/lab.local")
        );
    }
}
