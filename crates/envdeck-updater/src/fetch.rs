use std::time::Duration;

use envdeck_core::{is_newer, ArchiveType};
use serde::Deserialize;
use tracing::{debug, info};

use crate::FetchError;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub download_url: String,
    pub size: Option<u64>,
}

impl ReleaseAsset {
    pub fn archive_type(&self) -> Option<ArchiveType> {
        ArchiveType::infer_from_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseMetadata {
    /// Tag with any leading `v` removed.
    pub tag_version: String,
    pub notes: Option<String>,
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDecision {
    pub available: bool,
    pub current_version: String,
    pub latest_version: String,
    pub notes: Option<String>,
    /// Archive assets only; empty means the update cannot be applied automatically.
    pub assets: Vec<ReleaseAsset>,
    /// `<archive>.sha256` sidecars published next to the archives.
    pub checksums: Vec<ReleaseAsset>,
}

impl UpdateDecision {
    pub fn archive_asset(&self) -> Option<&ReleaseAsset> {
        self.assets.first()
    }

    pub fn checksum_for(&self, asset: &ReleaseAsset) -> Option<&ReleaseAsset> {
        let expected = format!("{}.sha256", asset.name).to_ascii_lowercase();
        self.checksums
            .iter()
            .find(|candidate| candidate.name.to_ascii_lowercase() == expected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSource {
    pub api_base: String,
    /// `owner/name`.
    pub repo: String,
}

impl ReleaseSource {
    pub fn new(api_base: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            repo: repo.into(),
        }
    }

    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            self.repo.trim_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: Option<u64>,
}

pub fn parse_release_metadata(body: &str) -> Result<ReleaseMetadata, FetchError> {
    let release: GithubRelease =
        serde_json::from_str(body).map_err(|err| FetchError::MetadataFormat {
            message: err.to_string(),
        })?;

    let tag = release
        .tag_name
        .as_deref()
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .ok_or_else(|| FetchError::MetadataFormat {
            message: "missing tag_name".to_string(),
        })?;

    Ok(ReleaseMetadata {
        tag_version: strip_tag_prefix(tag).to_string(),
        notes: release.body.filter(|notes| !notes.trim().is_empty()),
        assets: release
            .assets
            .into_iter()
            .map(|asset| ReleaseAsset {
                name: asset.name,
                download_url: asset.browser_download_url,
                size: asset.size,
            })
            .collect(),
    })
}

/// Compares `current` against the release. Available only when the release
/// is strictly newer.
pub fn decide_update(
    current: &str,
    release: ReleaseMetadata,
) -> Result<UpdateDecision, FetchError> {
    let current = strip_tag_prefix(current.trim());
    let available = is_newer(&release.tag_version, current)?;

    let (assets, rest): (Vec<_>, Vec<_>) = release
        .assets
        .into_iter()
        .partition(|asset| asset.archive_type().is_some());
    let checksums = rest
        .into_iter()
        .filter(|asset| asset.name.to_ascii_lowercase().ends_with(".sha256"))
        .collect();

    Ok(UpdateDecision {
        available,
        current_version: current.to_string(),
        latest_version: release.tag_version,
        notes: release.notes,
        assets,
        checksums,
    })
}

/// Fetches and parses the latest release through `fetcher`, which receives
/// the endpoint URL and returns the response body.
pub fn check_for_update_with_fetcher<F>(
    source: &ReleaseSource,
    current: &str,
    fetcher: F,
) -> Result<UpdateDecision, FetchError>
where
    F: FnOnce(&ReleaseSource, &str) -> Result<String, FetchError>,
{
    let url = source.latest_release_url();
    debug!(url = %url, "checking for update");
    let body = fetcher(source, &url)?;
    let decision = decide_update(current, parse_release_metadata(&body)?)?;
    info!(
        current = %decision.current_version,
        latest = %decision.latest_version,
        available = decision.available,
        "update check finished"
    );
    Ok(decision)
}

pub fn check_for_update(
    source: &ReleaseSource,
    current: &str,
) -> Result<UpdateDecision, FetchError> {
    check_for_update_with_fetcher(source, current, fetch_release_body)
}

fn fetch_release_body(source: &ReleaseSource, url: &str) -> Result<String, FetchError> {
    let http_err = |message: String| FetchError::Http {
        url: url.to_string(),
        message,
    };

    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("envdeck/", env!("CARGO_PKG_VERSION")))
        .timeout(METADATA_TIMEOUT)
        .build()
        .map_err(|err| http_err(format!("failed to create HTTP client: {err}")))?;

    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, GITHUB_ACCEPT)
        .send()
        .map_err(|err| http_err(err.to_string()))?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(FetchError::ReleaseNotFound {
            repo: source.repo.clone(),
        });
    }
    if !response.status().is_success() {
        return Err(http_err(format!("HTTP {}", response.status())));
    }

    response.text().map_err(|err| http_err(err.to_string()))
}

fn strip_tag_prefix(tag: &str) -> &str {
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}
