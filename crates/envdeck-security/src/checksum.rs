use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

const READ_CHUNK: usize = 64 * 1024;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_reader_hex(reader: &mut impl Read) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; READ_CHUNK];
    loop {
        let read = reader
            .read(&mut buffer)
            .context("failed reading data for sha256")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open file for sha256: {}", path.display()))?;
    sha256_reader_hex(&mut BufReader::new(file))
        .with_context(|| format!("failed to hash file: {}", path.display()))
}

/// Extracts the digest from a `sha256sum`-style line (`<hex>  <file>`) or a
/// bare digest.
pub fn parse_checksum_line(line: &str) -> Result<String> {
    let digest = line
        .split_whitespace()
        .next()
        .context("checksum file is empty")?;
    normalize_expected(digest)
}

fn normalize_expected(expected_hex: &str) -> Result<String> {
    let normalized = expected_hex.trim().to_ascii_lowercase();
    let bytes = hex::decode(&normalized)
        .with_context(|| format!("invalid sha256 hex digest '{}'", expected_hex.trim()))?;
    if bytes.len() != 32 {
        anyhow::bail!(
            "invalid sha256 digest length: expected 32 bytes, got {}",
            bytes.len()
        );
    }
    Ok(normalized)
}
