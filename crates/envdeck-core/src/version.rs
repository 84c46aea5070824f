use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}': segment '{segment}' is not a non-negative integer")]
pub struct VersionParseError {
    pub input: String,
    pub segment: String,
}

/// A dotted numeric version such as `1.2.0`.
///
/// Ordering pads the shorter segment list with zeros, so `1.2` and `1.2.0`
/// compare equal even though they display differently.
#[derive(Debug, Clone)]
pub struct DottedVersion {
    segments: Vec<u64>,
}

impl DottedVersion {
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        let mut segments = Vec::new();
        for segment in trimmed.split('.') {
            let value = segment
                .parse::<u64>()
                .ok()
                .filter(|_| segment.bytes().all(|byte| byte.is_ascii_digit()))
                .ok_or_else(|| VersionParseError {
                    input: input.to_string(),
                    segment: segment.to_string(),
                })?;
            segments.push(value);
        }
        Ok(Self { segments })
    }
}

impl PartialEq for DottedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DottedVersion {}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.segments.len().max(other.segments.len());
        for index in 0..width {
            let left = self.segments.get(index).copied().unwrap_or(0);
            let right = other.segments.get(index).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                decided => return decided,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for DottedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .segments
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&rendered)
    }
}

pub fn compare_versions(left: &str, right: &str) -> Result<Ordering, VersionParseError> {
    Ok(DottedVersion::parse(left)?.cmp(&DottedVersion::parse(right)?))
}

/// True only when `candidate` is strictly newer than `current`.
pub fn is_newer(candidate: &str, current: &str) -> Result<bool, VersionParseError> {
    Ok(compare_versions(candidate, current)? == Ordering::Greater)
}
