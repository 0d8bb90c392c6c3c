pub mod csrf;

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::path::Path;

use sha2::{Digest, Sha256};

pub use csrf::extract_csrf_token;

/// Reads a file line-by-line, returning all non-empty trimmed lines.
pub fn read_lines(path: impl AsRef<Path>) -> io::Result<Vec<String>> {
    let file = File::open(path.as_ref())?;
    let reader = io::BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    Ok(lines)
}

/// Hex SHA-256 of a string.
pub fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Fingerprint of a whole wordlist, so each list pair gets its own resume file.
pub fn list_digest(list: &[String]) -> String {
    sha256_hex(&list.join(","))
}
